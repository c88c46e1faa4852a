//! Reading stored instances and changing their transfer syntax.

use bytes::Bytes;
use dicom::dictionary_std::uids;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::{DefaultDicomObject, open_file};
use dicom::transfer_syntax::TransferSyntaxRegistry;

use crate::types::{MatchedObject, TransferSyntaxUid};

/// Transfer syntaxes whose pixel data is not encapsulated. Data sets can be converted
/// between these without a pixel data codec.
const NATIVE_TRANSFER_SYNTAXES: [&str; 3] = [
    uids::IMPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_BIG_ENDIAN,
];

#[derive(thiserror::Error, Debug)]
pub enum TranscodeError {
    #[error("Could not read stored DICOM file")]
    Read(#[from] dicom::object::ReadError),

    #[error("Could not encode data set")]
    Write(#[from] dicom::object::WriteError),

    #[error("Unknown transfer syntax {0}")]
    UnknownTransferSyntax(TransferSyntaxUid),

    #[error("Cannot transcode from {from} to {to}")]
    Unsupported {
        from: TransferSyntaxUid,
        to: TransferSyntaxUid,
    },
}

/// Reads the data set of a stored instance in the transfer syntax it is stored in.
pub trait DatasetReader {
    fn read_dataset(&self, object: &MatchedObject) -> Result<Bytes, TranscodeError>;
}

/// Produces the data set of a stored instance in a different transfer syntax.
pub trait Transcoder {
    fn transcode(
        &self,
        object: &MatchedObject,
        target: &TransferSyntaxUid,
    ) -> Result<Bytes, TranscodeError>;
}

/// Reads stored instances from DICOM files.
///
/// Transcoding is supported between native transfer syntaxes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomFileSource;

impl DicomFileSource {
    fn encode(
        &self,
        dcm: &DefaultDicomObject,
        transfer_syntax: &TransferSyntaxUid,
    ) -> Result<Bytes, TranscodeError> {
        let ts = TransferSyntaxRegistry
            .get(transfer_syntax.as_str())
            .ok_or_else(|| TranscodeError::UnknownTransferSyntax(transfer_syntax.clone()))?;
        let mut data = Vec::with_capacity(1024 * 1024);
        dcm.write_dataset_with_ts(&mut data, ts)?;
        Ok(Bytes::from(data))
    }
}

impl DatasetReader for DicomFileSource {
    fn read_dataset(&self, object: &MatchedObject) -> Result<Bytes, TranscodeError> {
        let dcm = open_file(&object.path)?;
        self.encode(&dcm, &object.transfer_syntax)
    }
}

impl Transcoder for DicomFileSource {
    fn transcode(
        &self,
        object: &MatchedObject,
        target: &TransferSyntaxUid,
    ) -> Result<Bytes, TranscodeError> {
        if !is_native(&object.transfer_syntax) || !is_native(target) {
            return Err(TranscodeError::Unsupported {
                from: object.transfer_syntax.clone(),
                to: target.clone(),
            });
        }
        let dcm = open_file(&object.path)?;
        self.encode(&dcm, target)
    }
}

fn is_native(transfer_syntax: &TransferSyntaxUid) -> bool {
    NATIVE_TRANSFER_SYNTAXES.contains(&transfer_syntax.as_str())
}
