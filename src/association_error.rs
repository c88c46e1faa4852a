use dicom::core::{DataDictionary, Tag};
use dicom::dictionary_std::StandardDataDictionary;

use crate::command::CommandError;
use crate::transport::TransportFault;

/// Error which ends an association.
#[derive(thiserror::Error, Debug)]
pub(crate) enum AssociationError {
    #[error("Could not establish association.")]
    CouldNotEstablish(#[source] dicom::ul::association::server::Error),

    #[error("Failed to receive PDU")]
    Receive(#[from] dicom::ul::association::server::Error),

    #[error("Could not configure socket")]
    Socket(#[from] std::io::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{0}")]
    CannotRespond(
        &'static str,
        #[source] Box<dyn std::error::Error + Send + Sync>,
    ),

    #[error("Missing {}", name_of(.0))]
    MissingTag(Tag),

    #[error("Presentation context {0} was not negotiated")]
    MissingPresentationContext(u8),

    #[error("Unsupported DIMSE command {0:#06x}")]
    UnsupportedCommand(u16),

    #[error("Association aborted by peer")]
    Aborted,

    #[error("C-GET interrupted")]
    Transport(#[from] TransportFault),

    #[error("Unhandled PDU: {0}")]
    UnhandledPdu(String),
}

/// Get the standard name of a tag.
fn name_of(tag: &Tag) -> &'static str {
    StandardDataDictionary
        .by_tag(*tag)
        .map(|e| e.alias)
        .unwrap_or("unknown attribute")
}
