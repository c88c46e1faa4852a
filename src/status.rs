//! DIMSE status codes and the outcome of a single C-STORE sub-operation.
//!
//! <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.4.3.3.html>

/// Success.
pub const SUCCESS: u16 = 0x0000;
/// Sub-operations complete, one or more failures or warnings.
pub const WARNING: u16 = 0xB000;
/// Sub-operations terminated due to cancel indication.
pub const CANCEL: u16 = 0xFE00;
/// Sub-operations are continuing.
pub const PENDING: u16 = 0xFF00;
/// Failed: unable to process.
pub const UNABLE_TO_PROCESS: u16 = 0xC000;
/// Refused: out of resources, unable to perform sub-operations.
pub const OUT_OF_RESOURCES: u16 = 0xA702;
/// Processing failure.
pub const PROCESSING_FAILURE: u16 = 0x0110;
/// Refused: SOP class not supported.
pub const SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;

/// The outcome of one sub-operation, as acknowledged by the receiver of the pushed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubOperationOutcome {
    Success,
    Warning(u16),
    Failure(u16),
}

impl SubOperationOutcome {
    /// Classify the status of a C-STORE-RSP.
    ///
    /// <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_B.2.3.html>
    pub fn from_store_status(status: u16) -> Self {
        match status {
            SUCCESS => Self::Success,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => Self::Warning(status),
            _ => Self::Failure(status),
        }
    }

    /// The status code reported for this sub-operation.
    pub fn code(&self) -> u16 {
        match self {
            Self::Success => SUCCESS,
            Self::Warning(code) | Self::Failure(code) => *code,
        }
    }
}
