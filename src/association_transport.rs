//! [SubOperationTransport] over the association on which the C-GET-RQ was received.

use std::error::Error;
use std::net::TcpStream;
use std::time::Duration;

use dicom::ul::association::server::ServerAssociation;
use dicom::ul::pdu::{PDataValue, PDataValueType};
use dicom::ul::Pdu;
use std::io::Write;

use crate::cancellation::CancellationFlag;
use crate::command::{self, ReceivedCommand};
use crate::composite_status::SubOperationTally;
use crate::status;
use crate::transport::{SubOperation, SubOperationTransport, TransportFault};

/// Size of the PDU and PDV item headers for a P-DATA-TF carrying two PDVs.
const PDATA_OVERHEAD: usize = 6 + 2 * 6;

/// Pushes sub-operations of one C-GET to its requester.
pub struct AssociationTransport<'a> {
    association: &'a mut ServerAssociation<TcpStream>,
    /// Largest PDU the requester accepts.
    max_pdu_length: u32,
    /// Handle to the socket of `association`, used to bound the wait for a C-STORE-RSP.
    socket: &'a TcpStream,
    cancellation: CancellationFlag,
    ack_timeout: Duration,
    /// Message ID of the C-GET-RQ.
    get_message_id: u16,
    /// Presentation context ID of the C-GET-RQ.
    get_context_id: u8,
    get_sop_class_uid: &'a str,
    next_message_id: u16,
}

impl<'a> AssociationTransport<'a> {
    pub fn new(
        association: &'a mut ServerAssociation<TcpStream>,
        max_pdu_length: u32,
        socket: &'a TcpStream,
        ack_timeout: Duration,
        get_context_id: u8,
        get_message_id: u16,
        get_sop_class_uid: &'a str,
    ) -> Self {
        Self {
            association,
            max_pdu_length,
            socket,
            cancellation: CancellationFlag::new(),
            ack_timeout,
            get_message_id,
            get_context_id,
            get_sop_class_uid,
            next_message_id: 1,
        }
    }

    fn take_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    fn send_store_rq(
        &mut self,
        sub_operation: SubOperation,
        message_id: u16,
    ) -> Result<(), TransportFault> {
        let cmd = command::store_rq_command(
            sub_operation.sop_class_uid.as_str(),
            sub_operation.sop_instance_uid.as_str(),
            message_id,
        );
        let cmd_data = command::encode_command(&cmd)
            .map_err(|e| TransportFault::Send("C-STORE-RQ", Box::new(e)))?;
        let pc_id = sub_operation.presentation_context_id;
        let nbytes = cmd_data.len() + sub_operation.dataset.len() + PDATA_OVERHEAD;
        if nbytes <= self.max_pdu_length as usize {
            let pdu = Pdu::PData {
                data: vec![
                    PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Command,
                        is_last: true,
                        data: cmd_data,
                    },
                    PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Data,
                        is_last: true,
                        data: sub_operation.dataset.to_vec(),
                    },
                ],
            };
            self.association
                .send(&pdu)
                .map_err(|e| TransportFault::Send("C-STORE-RQ", Box::new(e)))?;
        } else {
            let pdu = command_pdu(pc_id, cmd_data);
            self.association
                .send(&pdu)
                .map_err(|e| TransportFault::Send("C-STORE-RQ command", Box::new(e)))?;
            let mut pdata = self.association.send_pdata(pc_id);
            pdata
                .write_all(&sub_operation.dataset)
                .map_err(|e| TransportFault::Send("C-STORE-RQ P-Data", Box::new(e)))?;
            pdata
                .finish()
                .map_err(|e| TransportFault::Send("C-STORE-RQ P-Data", Box::new(e)))?;
        }
        Ok(())
    }

    /// Wait for the C-STORE-RSP to `message_id`, latching any C-CANCEL-RQ received meanwhile.
    ///
    /// The remaining PDVs of the P-DATA-TF carrying the C-STORE-RSP are read too.
    /// Returns `None` if the acknowledgment did not arrive in time.
    fn receive_store_rsp(&mut self, message_id: u16) -> Result<Option<u16>, TransportFault> {
        let mut command_buffer: Vec<u8> = Vec::new();
        let mut store_status = None;
        loop {
            let pdu = match self.association.receive() {
                Ok(pdu) => pdu,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(TransportFault::Receive(Box::new(e))),
            };
            match pdu {
                Pdu::PData { data } => {
                    for mut pdv in data {
                        if pdv.value_type != PDataValueType::Command {
                            continue;
                        }
                        command_buffer.append(&mut pdv.data);
                        if !pdv.is_last {
                            continue;
                        }
                        let cmd = ReceivedCommand::read(&command_buffer)
                            .map_err(|e| TransportFault::Receive(Box::new(e)))?;
                        command_buffer.clear();
                        match cmd.command_field {
                            command::C_STORE_RSP
                                if store_status.is_none()
                                    && cmd.message_id_being_responded_to == Some(message_id) =>
                            {
                                store_status =
                                    Some(cmd.status.unwrap_or(status::PROCESSING_FAILURE));
                            }
                            command::C_STORE_RSP => {
                                tracing::debug!(
                                    MessageIDBeingRespondedTo = cmd.message_id_being_responded_to,
                                    "ignoring late C-STORE-RSP"
                                );
                            }
                            command::C_CANCEL_RQ => {
                                tracing::info!(
                                    MessageIDBeingRespondedTo = cmd.message_id_being_responded_to,
                                    "received C-CANCEL-RQ"
                                );
                                self.cancellation.cancel();
                            }
                            other => {
                                return Err(TransportFault::Unexpected(format!(
                                    "command field {other:#06x} while waiting for C-STORE-RSP"
                                )));
                            }
                        }
                    }
                    if store_status.is_some() {
                        return Ok(store_status);
                    }
                }
                Pdu::ReleaseRQ => return Err(TransportFault::Released),
                Pdu::AbortRQ { .. } => return Err(TransportFault::Aborted),
                other => {
                    return Err(TransportFault::Unexpected(
                        other.short_description().to_string(),
                    ));
                }
            }
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportFault> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| TransportFault::Receive(Box::new(e)))
    }
}

impl SubOperationTransport for AssociationTransport<'_> {
    fn push_sub_operation(&mut self, sub_operation: SubOperation) -> Result<u16, TransportFault> {
        let message_id = self.take_message_id();
        let sop_instance_uid = sub_operation.sop_instance_uid.clone();
        self.send_store_rq(sub_operation, message_id)?;
        self.set_read_timeout(Some(self.ack_timeout))?;
        let received = self.receive_store_rsp(message_id);
        self.set_read_timeout(None)?;
        match received? {
            Some(status) => Ok(status),
            None => {
                tracing::warn!(
                    SOPInstanceUID = sop_instance_uid.as_str(),
                    timeout = ?self.ack_timeout,
                    "C-STORE-RSP was not received in time"
                );
                Ok(status::OUT_OF_RESOURCES)
            }
        }
    }

    fn poll_cancellation(&mut self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn report_pending(&mut self, tally: &SubOperationTally) -> Result<(), TransportFault> {
        let cmd = command::pending_get_rsp_command(
            self.get_sop_class_uid,
            self.get_message_id,
            tally,
        );
        let cmd_data = command::encode_command(&cmd)
            .map_err(|e| TransportFault::Send("pending C-GET-RSP", Box::new(e)))?;
        self.association
            .send(&command_pdu(self.get_context_id, cmd_data))
            .map_err(|e| TransportFault::Send("pending C-GET-RSP", Box::new(e)))
    }
}

pub(crate) fn command_pdu(presentation_context_id: u8, data: Vec<u8>) -> Pdu {
    Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data,
        }],
    }
}

/// Whether a read timed out somewhere in the source chain of `error`.
fn is_timeout(error: &(dyn Error + 'static)) -> bool {
    let mut source: Option<&(dyn Error + 'static)> = Some(error);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = e.source();
    }
    false
}
