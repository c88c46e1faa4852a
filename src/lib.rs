//! A DICOM C-GET SCP: matches stored instances to a retrieve identifier, then sends each
//! of them back to the requester as a C-STORE sub-operation on the same association.

mod abstract_syntaxes;
mod association_error;
mod association_request;
mod association_transport;
mod cancellation;
mod command;
mod composite_status;
mod config;
mod dicomrs_settings;
mod directory_index;
mod executor;
mod identifier;
mod listener_tcp_loop;
mod resolver;
mod run_from_env;
mod scp;
mod session;
mod settings;
mod status;
mod thread_pool;
mod transcode;
mod transport;
mod types;

pub use cancellation::CancellationFlag;
pub use composite_status::{
    compute_composite_result, CompositeResult, CompositeStatus, SubOperationCounts,
    SubOperationTally,
};
pub use config::get_config;
pub use dicomrs_settings::{ClientAETitle, DicomRsSettings, OurAETitle};
pub use directory_index::{DirectoryIndex, DirectoryIndexError};
pub use executor::{select_context, SubOperationExecutor};
pub use identifier::{
    KeyMatcher, MalformedRequest, MatchingKey, RetrieveIdentifier, RetrieveLevel,
};
pub use resolver::{QueryResolver, ResolveError, StorageIndex, StorageIndexError};
pub use run_from_env::{run_everything, run_everything_from_env};
pub use session::{
    InvalidTransition, RetrievalEvent, RetrievalSession, RetrievalState, RetrieveRequest,
};
pub use settings::OxigetEnvOptions;
pub use status::SubOperationOutcome;
pub use transcode::{DatasetReader, DicomFileSource, TranscodeError, Transcoder};
pub use transport::{AcceptedContext, SubOperation, SubOperationTransport, TransportFault};
pub use types::{MatchedObject, SopClassUid, SopInstanceUid, TransferSyntaxUid};

/// DIMSE status codes.
pub mod status_codes {
    pub use crate::status::{
        CANCEL, OUT_OF_RESOURCES, PENDING, PROCESSING_FAILURE, SOP_CLASS_NOT_SUPPORTED, SUCCESS,
        UNABLE_TO_PROCESS, WARNING,
    };
}
