//! Handles an association from a C-GET requester.
//!
//! Receiving PDUs follows the storescp example of dicom-rs.
//! https://github.com/Enet4/dicom-rs/blob/dbd41ed3a0d1536747c6b8ea2b286e4c6e8ccc8a/storescp/src/main.rs

use std::net::TcpStream;
use std::time::Duration;

use dicom::dictionary_std::tags;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::InMemDicomObject;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::association::server::{AcceptAny, ServerAssociation};
use dicom::ul::pdu::{PDataValue, PDataValueType, PresentationContextResultReason};
use dicom::ul::{Pdu, ServerAssociationOptions};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use ulid::Ulid;

use crate::association_error::{AssociationError, AssociationError::*};
use crate::association_request::AssociationRequest;
use crate::association_transport::{command_pdu, AssociationTransport};
use crate::command::{self, ReceivedCommand};
use crate::composite_status::CompositeResult;
use crate::executor::SubOperationExecutor;
use crate::identifier::RetrieveIdentifier;
use crate::resolver::{QueryResolver, StorageIndex};
use crate::session::{RetrievalSession, RetrieveRequest};
use crate::transcode::{DatasetReader, Transcoder};
use crate::transport::{AcceptedContext, TransportFault};
use crate::types::TransferSyntaxUid;

/// Everything needed to answer C-GET requests, shared by all associations.
pub struct RetrieveService<I, S> {
    resolver: QueryResolver<I>,
    executor: SubOperationExecutor<S>,
    ack_timeout: Duration,
    pending_responses: bool,
}

impl<I: StorageIndex, S: DatasetReader + Transcoder> RetrieveService<I, S> {
    pub fn new(index: I, source: S, ack_timeout: Duration, pending_responses: bool) -> Self {
        Self {
            resolver: QueryResolver::new(index),
            executor: SubOperationExecutor::new(source),
            ack_timeout,
            pending_responses,
        }
    }
}

/// A command which is waiting for its data set.
struct PendingCommand {
    command: ReceivedCommand,
    presentation_context_id: u8,
}

/// Handle an "association" from an "SCU" (i.e. someone who wants DICOM files from us).
///
/// C-ECHO and C-GET requests are answered until the requester releases the association.
pub fn handle_association<I, S>(
    scu_stream: TcpStream,
    options: &ServerAssociationOptions<AcceptAny>,
    service: &RetrieveService<I, S>,
    ulid: Ulid,
) -> Result<(), AssociationError>
where
    I: StorageIndex,
    S: DatasetReader + Transcoder,
{
    let socket = scu_stream.try_clone()?;
    let association_rq = AssociationRequest::peek(&scu_stream)?.unwrap_or_default();
    let mut association = options.establish(scu_stream).map_err(CouldNotEstablish)?;
    let context = opentelemetry::Context::current();
    let aec = association.client_ae_title().to_string();
    context
        .span()
        .set_attribute(KeyValue::new("aec", aec.clone()));
    tracing::info!(association_ulid = ulid.to_string(), aec, "association established");

    let mut command_buffer: Vec<u8> = Vec::new();
    let mut data_buffer: Vec<u8> = Vec::new();
    let mut pending: Option<PendingCommand> = None;

    while let Some(pdu) = bubble_no_pdu(association.receive())? {
        tracing::trace!("scu ----> scp: {}", pdu.short_description());
        match pdu {
            Pdu::PData { data } => {
                if data.is_empty() {
                    tracing::debug!("Ignoring empty PData PDU");
                    continue;
                }
                for mut pdv in data {
                    match pdv.value_type {
                        PDataValueType::Command => {
                            command_buffer.append(&mut pdv.data);
                            if !pdv.is_last {
                                continue;
                            }
                            let received = ReceivedCommand::read(&command_buffer)?;
                            command_buffer.clear();
                            data_buffer.clear();
                            if received.has_dataset {
                                pending = Some(PendingCommand {
                                    command: received,
                                    presentation_context_id: pdv.presentation_context_id,
                                });
                            } else {
                                handle_command(
                                    &mut association,
                                    &received,
                                    pdv.presentation_context_id,
                                )?;
                            }
                        }
                        PDataValueType::Data => {
                            data_buffer.append(&mut pdv.data);
                            if !pdv.is_last {
                                continue;
                            }
                            let Some(PendingCommand {
                                command,
                                presentation_context_id,
                            }) = pending.take()
                            else {
                                tracing::warn!("Ignoring data set without a command");
                                data_buffer.clear();
                                continue;
                            };
                            if command.command_field != command::C_GET_RQ {
                                return Err(UnsupportedCommand(command.command_field));
                            }
                            let identifier = std::mem::take(&mut data_buffer);
                            let outcome = handle_get(
                                &mut association,
                                &association_rq,
                                &socket,
                                service,
                                &command,
                                presentation_context_id,
                                &identifier,
                                ulid,
                            );
                            match outcome {
                                Ok(()) => (),
                                Err(Transport(TransportFault::Released)) => {
                                    tracing::warn!(
                                        association_ulid = ulid.to_string(),
                                        "association released during C-GET"
                                    );
                                    release(&mut association, &context);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
            }
            Pdu::ReleaseRQ => {
                release(&mut association, &context);
                tracing::info!(
                    association_ulid = ulid.to_string(),
                    "Released association with {}",
                    association.client_ae_title()
                );
            }
            Pdu::AbortRQ { .. } => {
                return Err(Aborted);
            }
            _ => return Err(UnhandledPdu(pdu.short_description().to_string())),
        }
    }
    tracing::info!(
        association_ulid = ulid.to_string(),
        "Dropping connection with {}",
        association.client_ae_title()
    );
    Ok(())
}

/// Handle a command which has no data set.
fn handle_command(
    association: &mut ServerAssociation<TcpStream>,
    received: &ReceivedCommand,
    presentation_context_id: u8,
) -> Result<(), AssociationError> {
    match received.command_field {
        command::C_ECHO_RQ => {
            let message_id = received.message_id.ok_or(MissingTag(tags::MESSAGE_ID))?;
            let cmd_data = command::encode_command(&command::echo_rsp_command(message_id))?;
            association
                .send(&command_pdu(presentation_context_id, cmd_data))
                .map_err(|e| CannotRespond("failed to send C-ECHO response object to SCU", Box::new(e)))
        }
        command::C_CANCEL_RQ => {
            // the C-GET it refers to has already finished.
            tracing::debug!("Ignoring C-CANCEL-RQ outside of a C-GET");
            Ok(())
        }
        other => Err(UnsupportedCommand(other)),
    }
}

/// Run one C-GET to its end and send its final response.
fn handle_get<I, S>(
    association: &mut ServerAssociation<TcpStream>,
    association_rq: &AssociationRequest,
    socket: &TcpStream,
    service: &RetrieveService<I, S>,
    received: &ReceivedCommand,
    presentation_context_id: u8,
    identifier_data: &[u8],
    ulid: Ulid,
) -> Result<(), AssociationError>
where
    I: StorageIndex,
    S: DatasetReader + Transcoder,
{
    let message_id = received.message_id.ok_or(MissingTag(tags::MESSAGE_ID))?;
    let pc = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == presentation_context_id)
        .ok_or(MissingPresentationContext(presentation_context_id))?;
    let sop_class_uid = received
        .affected_sop_class_uid
        .clone()
        .or_else(|| {
            association_rq
                .abstract_syntax(presentation_context_id)
                .map(|uid| uid.as_str().to_string())
        })
        .ok_or(MissingTag(tags::AFFECTED_SOP_CLASS_UID))?;
    let transfer_syntax = TransferSyntaxUid::from_padded(&pc.transfer_syntax);
    let accepted = accepted_contexts(association, association_rq);
    tracing::info!(
        association_ulid = ulid.to_string(),
        event = "c_get",
        MessageID = message_id,
        AffectedSOPClassUID = &sop_class_uid,
    );

    let identifier = TransferSyntaxRegistry
        .get(transfer_syntax.as_str())
        .and_then(|ts| InMemDicomObject::read_dataset_with_ts(identifier_data, ts).ok());
    let result = match identifier {
        Some(dcm) => {
            let request = RetrieveRequest {
                identifier: RetrieveIdentifier::from_dataset(&dcm),
                accepted,
            };
            let mut transport = AssociationTransport::new(
                association,
                association_rq.max_pdu_length(),
                socket,
                service.ack_timeout,
                presentation_context_id,
                message_id,
                &sop_class_uid,
            );
            RetrievalSession::new(&service.resolver, &service.executor)
                .with_pending_responses(service.pending_responses)
                .run(&request, &mut transport)?
        }
        None => {
            tracing::warn!(
                association_ulid = ulid.to_string(),
                "could not decode C-GET identifier"
            );
            CompositeResult::unable_to_process()
        }
    };
    send_final_response(
        association,
        &sop_class_uid,
        message_id,
        presentation_context_id,
        &transfer_syntax,
        &result,
    )
}

fn send_final_response(
    association: &mut ServerAssociation<TcpStream>,
    sop_class_uid: &str,
    message_id: u16,
    presentation_context_id: u8,
    transfer_syntax: &TransferSyntaxUid,
    result: &CompositeResult,
) -> Result<(), AssociationError> {
    let (cmd, identifier) = command::final_get_rsp(sop_class_uid, message_id, result);
    let cmd_data = command::encode_command(&cmd)?;
    association
        .send(&command_pdu(presentation_context_id, cmd_data))
        .map_err(|e| CannotRespond("failed to send C-GET response to SCU", Box::new(e)))?;
    if let Some(identifier) = identifier {
        let ts = TransferSyntaxRegistry
            .get(transfer_syntax.as_str())
            .ok_or(MissingPresentationContext(presentation_context_id))?;
        let mut iod_data = Vec::with_capacity(128);
        identifier
            .write_dataset_with_ts(&mut iod_data, ts)
            .map_err(|e| CannotRespond("could not write C-GET response identifier", Box::new(e)))?;
        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Data,
                is_last: true,
                data: iod_data,
            }],
        };
        association
            .send(&pdu)
            .map_err(|e| CannotRespond("failed to send C-GET response identifier", Box::new(e)))?;
    }
    Ok(())
}

/// The presentation contexts in which the requester can receive C-STORE sub-operations.
///
/// The negotiated contexts only carry their ID and transfer syntax, so their abstract
/// syntax is taken from what the requester proposed.
fn accepted_contexts(
    association: &ServerAssociation<TcpStream>,
    association_rq: &AssociationRequest,
) -> Vec<AcceptedContext> {
    association
        .presentation_contexts()
        .iter()
        .filter(|pc| pc.reason == PresentationContextResultReason::Acceptance)
        .filter_map(|pc| {
            let abstract_syntax = association_rq.abstract_syntax(pc.id)?;
            Some(AcceptedContext {
                id: pc.id,
                abstract_syntax: abstract_syntax.clone(),
                transfer_syntax: TransferSyntaxUid::from_padded(&pc.transfer_syntax),
            })
        })
        .collect()
}

fn release(association: &mut ServerAssociation<TcpStream>, context: &opentelemetry::Context) {
    association.send(&Pdu::ReleaseRP).unwrap_or_else(|e| {
        let a = vec![KeyValue::new("error", e.to_string())];
        context
            .span()
            .add_event("failed_to_send_association_release", a);
    });
}

/// Returns `None` if source is [dicom::ul::pdu::reader::Error::NoPduAvailable]
/// or the requester closed the connection.
fn bubble_no_pdu(
    pdu: Result<Pdu, dicom::ul::association::server::Error>,
) -> Result<Option<Pdu>, dicom::ul::association::server::Error> {
    pdu.map(Some).or_else(|e| {
        if matches!(e, dicom::ul::association::server::Error::ConnectionClosed) {
            Ok(None)
        } else if let dicom::ul::association::server::Error::Receive { source } = &e {
            if matches!(source, dicom::ul::pdu::reader::Error::NoPduAvailable { .. }) {
                Ok(None)
            } else {
                Err(e)
            }
        } else {
            Err(e)
        }
    })
}
