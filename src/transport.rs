//! The channel through which sub-operations are pushed to the C-GET requester.

use bytes::Bytes;

use crate::composite_status::SubOperationTally;
use crate::types::{SopClassUid, SopInstanceUid, TransferSyntaxUid};

/// A presentation context accepted on the association, on which the requester can
/// receive instances of `abstract_syntax` encoded in `transfer_syntax`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedContext {
    pub id: u8,
    pub abstract_syntax: SopClassUid,
    pub transfer_syntax: TransferSyntaxUid,
}

/// One C-STORE sub-operation ready to be transmitted.
#[derive(Debug, Clone)]
pub struct SubOperation {
    pub presentation_context_id: u8,
    pub sop_class_uid: SopClassUid,
    pub sop_instance_uid: SopInstanceUid,
    /// The data set, encoded in the transfer syntax of the presentation context.
    pub dataset: Bytes,
}

/// The association was lost or became unusable. No response can be sent to the requester.
#[derive(thiserror::Error, Debug)]
pub enum TransportFault {
    #[error("Association aborted by peer")]
    Aborted,

    #[error("Peer requested release during a C-GET")]
    Released,

    #[error("Failed to send {0}")]
    Send(&'static str, #[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Failed to receive C-STORE-RSP")]
    Receive(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Unexpected message from peer: {0}")]
    Unexpected(String),
}

/// Transmits sub-operations to the requester over an open association.
pub trait SubOperationTransport {
    /// Send one C-STORE-RQ and block until its C-STORE-RSP arrives.
    ///
    /// Returns the status of the response. A sub-operation which was not acknowledged in
    /// time is reported with a failure status rather than as a [TransportFault].
    fn push_sub_operation(&mut self, sub_operation: SubOperation) -> Result<u16, TransportFault>;

    /// Whether the requester has sent a cancel indication. Once true, stays true.
    fn poll_cancellation(&mut self) -> bool;

    /// Report progress to the requester after a sub-operation.
    fn report_pending(&mut self, _tally: &SubOperationTally) -> Result<(), TransportFault> {
        Ok(())
    }
}
