//! A [StorageIndex] of the DICOM files found under a directory.
#![allow(non_snake_case)]

use camino::{Utf8Path, Utf8PathBuf};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, OpenFileOptions};

use crate::identifier::{MatchingKey, RetrieveLevel};
use crate::resolver::{StorageIndex, StorageIndexError};
use crate::types::{MatchedObject, SopClassUid, SopInstanceUid, TransferSyntaxUid};

#[derive(thiserror::Error, Debug)]
pub enum DirectoryIndexError {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Path is not valid UTF-8: {0:?}")]
    NonUtf8Path(std::path::PathBuf),
}

#[derive(Debug, Clone)]
struct IndexedInstance {
    object: MatchedObject,
    InstanceNumber: Option<i32>,
}

impl IndexedInstance {
    fn attribute(&self, tag: Tag) -> Option<&str> {
        match tag {
            tags::PATIENT_ID => Some(&self.object.PatientID),
            tags::STUDY_INSTANCE_UID => Some(&self.object.StudyInstanceUID),
            tags::SERIES_INSTANCE_UID => Some(&self.object.SeriesInstanceUID),
            tags::SOP_INSTANCE_UID => Some(self.object.sop_instance_uid.as_str()),
            _ => None,
        }
    }

    fn sort_key(&self) -> (&str, &str, Option<i32>, &str) {
        (
            &self.object.StudyInstanceUID,
            &self.object.SeriesInstanceUID,
            self.InstanceNumber,
            self.object.sop_instance_uid.as_str(),
        )
    }
}

/// An in-memory index of the DICOM files under a directory, built once when opened.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    instances: Vec<IndexedInstance>,
}

impl DirectoryIndex {
    /// Scan `root` recursively for DICOM files.
    ///
    /// Files which are not DICOM, or lack one of the UIDs needed to retrieve them,
    /// are skipped with a warning.
    pub fn open(root: &Utf8Path) -> Result<Self, DirectoryIndexError> {
        let mut paths = Vec::new();
        collect_files(root, &mut paths)?;
        paths.sort();
        let mut instances: Vec<_> = paths
            .into_iter()
            .filter_map(|path| match read_instance(&path) {
                Ok(instance) => Some(instance),
                Err(reason) => {
                    tracing::warn!(path = path.as_str(), reason, "skipping file");
                    None
                }
            })
            .collect();
        instances.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        instances.dedup_by(|a, b| a.object.sop_instance_uid == b.object.sop_instance_uid);
        tracing::info!(
            root = root.as_str(),
            instances = instances.len(),
            "indexed DICOM files"
        );
        Ok(Self { instances })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl StorageIndex for DirectoryIndex {
    fn find(
        &self,
        _level: RetrieveLevel,
        keys: &[MatchingKey],
    ) -> Result<Vec<MatchedObject>, StorageIndexError> {
        let matchers: Vec<_> = keys.iter().map(|key| (key.tag, key.matcher())).collect();
        // every instance belongs to all levels, so a match at any level
        // includes all of the instances below it.
        let matches = self
            .instances
            .iter()
            .filter(|instance| {
                matchers.iter().all(|(tag, matcher)| {
                    instance
                        .attribute(*tag)
                        .is_none_or(|value| matcher.matches(value))
                })
            })
            .map(|instance| instance.object.clone())
            .collect();
        Ok(matches)
    }
}

fn collect_files(dir: &Utf8Path, paths: &mut Vec<Utf8PathBuf>) -> Result<(), DirectoryIndexError> {
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(DirectoryIndexError::NonUtf8Path)?;
        if entry.file_type()?.is_dir() {
            collect_files(&path, paths)?;
        } else {
            paths.push(path);
        }
    }
    Ok(())
}

fn read_instance(path: &Utf8Path) -> Result<IndexedInstance, &'static str> {
    let dcm = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|_| "not a DICOM file")?;
    let sop_class_uid = tt(&dcm, tags::SOP_CLASS_UID)
        .or_else(|| Some(trim(dcm.meta().media_storage_sop_class_uid())).filter(|s| !s.is_empty()))
        .ok_or("missing SOPClassUID")?;
    let sop_instance_uid = tt(&dcm, tags::SOP_INSTANCE_UID).ok_or("missing SOPInstanceUID")?;
    let object = MatchedObject {
        path: path.to_path_buf(),
        sop_class_uid: SopClassUid::from(sop_class_uid),
        sop_instance_uid: SopInstanceUid::from(sop_instance_uid),
        transfer_syntax: TransferSyntaxUid::from_padded(dcm.meta().transfer_syntax()),
        PatientID: tt(&dcm, tags::PATIENT_ID).unwrap_or_default().to_string(),
        StudyInstanceUID: tt(&dcm, tags::STUDY_INSTANCE_UID)
            .ok_or("missing StudyInstanceUID")?
            .to_string(),
        SeriesInstanceUID: tt(&dcm, tags::SERIES_INSTANCE_UID)
            .ok_or("missing SeriesInstanceUID")?
            .to_string(),
    };
    let InstanceNumber = tt(&dcm, tags::INSTANCE_NUMBER).and_then(|s| s.parse().ok());
    Ok(IndexedInstance {
        object,
        InstanceNumber,
    })
}

/// Try to get the trimmed string value of a DICOM object.
fn tt(dcm: &DefaultDicomObject, tag: Tag) -> Option<&str> {
    dcm.element(tag)
        .ok()
        .and_then(|e| e.string().map(trim).ok())
        .filter(|s| !s.is_empty())
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}
