//! In-memory collaborators of a retrieval, scripted by each test.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bytes::Bytes;
use dicom::dictionary_std::tags;
use oxiget::{
    DatasetReader, MatchedObject, MatchingKey, RetrieveLevel, StorageIndex, StorageIndexError,
    SubOperation, SubOperationTally, SubOperationTransport, TranscodeError, TransferSyntaxUid,
    Transcoder, TransportFault,
};

/// A [StorageIndex] of a fixed list of instances.
#[derive(Default)]
pub struct MemoryIndex {
    objects: Vec<MatchedObject>,
    broken: bool,
    pub queries: Mutex<usize>,
}

impl MemoryIndex {
    pub fn new(objects: Vec<MatchedObject>) -> Self {
        Self {
            objects,
            ..Default::default()
        }
    }

    /// An index which fails every lookup.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

impl StorageIndex for MemoryIndex {
    fn find(
        &self,
        _level: RetrieveLevel,
        keys: &[MatchingKey],
    ) -> Result<Vec<MatchedObject>, StorageIndexError> {
        *self.queries.lock().unwrap() += 1;
        if self.broken {
            return Err(StorageIndexError("database is down".to_string()));
        }
        let found = self
            .objects
            .iter()
            .filter(|o| {
                keys.iter().all(|key| {
                    let value = match key.tag {
                        tags::PATIENT_ID => o.PatientID.as_str(),
                        tags::STUDY_INSTANCE_UID => o.StudyInstanceUID.as_str(),
                        tags::SERIES_INSTANCE_UID => o.SeriesInstanceUID.as_str(),
                        tags::SOP_INSTANCE_UID => o.sop_instance_uid.as_str(),
                        _ => return true,
                    };
                    key.matcher().matches(value)
                })
            })
            .cloned()
            .collect();
        Ok(found)
    }
}

/// Produces a fake data set for each instance: its SOP Instance UID followed by the
/// transfer syntax it was encoded in.
#[derive(Default)]
pub struct FakeSource {
    unreadable: HashSet<String>,
    pub transcoded: Mutex<Vec<(String, String)>>,
}

impl FakeSource {
    pub fn with_unreadable(uids: &[&str]) -> Self {
        Self {
            unreadable: uids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn encode(
        &self,
        object: &MatchedObject,
        ts: &TransferSyntaxUid,
    ) -> Result<Bytes, TranscodeError> {
        if self.unreadable.contains(object.sop_instance_uid.as_str()) {
            return Err(TranscodeError::UnknownTransferSyntax(ts.clone()));
        }
        Ok(Bytes::from(format!("{}@{}", object.sop_instance_uid, ts)))
    }
}

impl DatasetReader for FakeSource {
    fn read_dataset(&self, object: &MatchedObject) -> Result<Bytes, TranscodeError> {
        self.encode(object, &object.transfer_syntax)
    }
}

impl Transcoder for FakeSource {
    fn transcode(
        &self,
        object: &MatchedObject,
        target: &TransferSyntaxUid,
    ) -> Result<Bytes, TranscodeError> {
        self.transcoded.lock().unwrap().push((
            object.sop_instance_uid.to_string(),
            target.to_string(),
        ));
        self.encode(object, target)
    }
}

/// Pending response counters: (remaining, completed, failed, warning).
pub type PendingCounts = (usize, usize, usize, usize);

/// A requester which acknowledges sub-operations with scripted statuses.
#[derive(Default)]
pub struct ScriptedTransport {
    statuses: HashMap<String, u16>,
    /// Deliver a cancel indication once this many sub-operations were pushed.
    cancel_after: Option<usize>,
    /// Lose the association when this sub-operation (0-indexed) is pushed.
    fault_at: Option<usize>,
    cancelled: bool,
    pub pushed: Vec<SubOperation>,
    pub pending: Vec<PendingCounts>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge the sub-operation of `sop_instance_uid` with `status`, instead of success.
    pub fn respond(mut self, sop_instance_uid: &str, status: u16) -> Self {
        self.statuses.insert(sop_instance_uid.to_string(), status);
        self
    }

    pub fn cancel_after(mut self, n: usize) -> Self {
        self.cancel_after = Some(n);
        self
    }

    pub fn fault_at(mut self, n: usize) -> Self {
        self.fault_at = Some(n);
        self
    }

    pub fn pushed_uids(&self) -> Vec<&str> {
        self.pushed.iter().map(|s| s.sop_instance_uid.as_str()).collect()
    }
}

impl SubOperationTransport for ScriptedTransport {
    fn push_sub_operation(&mut self, sub_operation: SubOperation) -> Result<u16, TransportFault> {
        if self.fault_at == Some(self.pushed.len()) {
            return Err(TransportFault::Aborted);
        }
        let status = self
            .statuses
            .get(sub_operation.sop_instance_uid.as_str())
            .copied()
            .unwrap_or(0x0000);
        self.pushed.push(sub_operation);
        if self.cancel_after == Some(self.pushed.len()) {
            self.cancelled = true;
        }
        Ok(status)
    }

    fn poll_cancellation(&mut self) -> bool {
        self.cancelled
    }

    fn report_pending(&mut self, tally: &SubOperationTally) -> Result<(), TransportFault> {
        self.pending.push((
            tally.remaining(),
            tally.completed,
            tally.failed,
            tally.warning,
        ));
        Ok(())
    }
}
