#![allow(non_snake_case)]

use aliri_braid::braid;
use camino::Utf8PathBuf;

/// SOP Class UID of a stored instance, also the abstract syntax of its sub-operation.
#[braid(serde)]
pub struct SopClassUid;

/// SOP Instance UID of a stored instance.
#[braid(serde)]
pub struct SopInstanceUid;

/// UID of a transfer syntax.
#[braid(serde)]
pub struct TransferSyntaxUid;

impl TransferSyntaxUid {
    /// Create from a UID as found in DICOM data, which may be padded with a NUL byte.
    pub fn from_padded(uid: &str) -> Self {
        Self::from(uid.trim_end_matches(['\0', ' ']))
    }
}

/// One stored instance selected for retrieval.
///
/// This is a snapshot taken when the request was resolved: later changes to the
/// storage do not affect an ongoing retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedObject {
    /// Location of the stored DICOM file.
    pub path: Utf8PathBuf,
    pub sop_class_uid: SopClassUid,
    pub sop_instance_uid: SopInstanceUid,
    /// The transfer syntax the instance is stored in.
    pub transfer_syntax: TransferSyntaxUid,
    pub PatientID: String,
    pub StudyInstanceUID: String,
    pub SeriesInstanceUID: String,
}

impl MatchedObject {
    /// Whether this object can be transmitted in the given transfer syntax without transcoding.
    pub fn is_stored_as(&self, transfer_syntax: &TransferSyntaxUid) -> bool {
        &self.transfer_syntax == transfer_syntax
    }
}
