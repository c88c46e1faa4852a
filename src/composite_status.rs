//! Computation of the final C-GET-RSP from the outcomes of all sub-operations.
//!
//! <https://dicom.nema.org/medical/dicom/current/output/chtml/part04/sect_C.4.3.html#table_C.4-3>

use crate::status::{self, SubOperationOutcome};
use crate::types::SopInstanceUid;

/// Running counts of a retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubOperationTally {
    /// Number of matched objects, fixed when the request is resolved.
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub warning: usize,
    /// Status code of the first failed sub-operation.
    pub first_failure: Option<u16>,
    /// SOP Instance UIDs of the failed sub-operations, in the order they were attempted.
    pub failed_instances: Vec<SopInstanceUid>,
}

impl SubOperationTally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Count the outcome of a sub-operation.
    pub fn record(&mut self, sop_instance_uid: &SopInstanceUid, outcome: SubOperationOutcome) {
        match outcome {
            SubOperationOutcome::Success => self.completed += 1,
            SubOperationOutcome::Warning(_) => self.warning += 1,
            SubOperationOutcome::Failure(code) => {
                self.failed += 1;
                self.first_failure.get_or_insert(code);
                self.failed_instances.push(sop_instance_uid.clone());
            }
        }
    }

    /// Number of sub-operations which were not attempted.
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.completed + self.failed + self.warning)
    }
}

/// Status of a C-GET-RSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeStatus {
    Success,
    /// One or more sub-operations failed or had warnings.
    Warning,
    /// Every sub-operation failed, the value being the code reported by the first one.
    Failure(u16),
    Cancelled,
    UnableToProcess,
}

impl CompositeStatus {
    pub fn code(&self) -> u16 {
        match self {
            Self::Success => status::SUCCESS,
            Self::Warning => status::WARNING,
            Self::Failure(code) => *code,
            Self::Cancelled => status::CANCEL,
            Self::UnableToProcess => status::UNABLE_TO_PROCESS,
        }
    }
}

/// Counters of a C-GET-RSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubOperationCounts {
    pub completed: usize,
    pub failed: usize,
    pub warning: usize,
}

/// The final response to a C-GET request.
///
/// The fields are private so that only [compute_composite_result] creates it:
/// the number of remaining sub-operations is present if and only if the status is
/// [CompositeStatus::Cancelled], and the counters are absent if and only if the
/// status is [CompositeStatus::UnableToProcess].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeResult {
    status: CompositeStatus,
    counts: Option<SubOperationCounts>,
    remaining: Option<usize>,
    failed_instances: Vec<SopInstanceUid>,
}

impl CompositeResult {
    /// Result for a request which is malformed or matched nothing.
    pub fn unable_to_process() -> Self {
        Self {
            status: CompositeStatus::UnableToProcess,
            counts: None,
            remaining: None,
            failed_instances: Vec::new(),
        }
    }

    pub fn status(&self) -> CompositeStatus {
        self.status
    }

    /// Counters of the response, `None` when no sub-operation was meaningful.
    pub fn counts(&self) -> Option<SubOperationCounts> {
        self.counts
    }

    /// Number of sub-operations which were not attempted. Only present for a cancelled retrieval.
    pub fn remaining(&self) -> Option<usize> {
        self.remaining
    }

    pub fn completed(&self) -> usize {
        self.counts.map(|c| c.completed).unwrap_or(0)
    }

    pub fn failed(&self) -> usize {
        self.counts.map(|c| c.failed).unwrap_or(0)
    }

    pub fn warning(&self) -> usize {
        self.counts.map(|c| c.warning).unwrap_or(0)
    }

    /// SOP Instance UIDs of the sub-operations which failed.
    pub fn failed_instances(&self) -> &[SopInstanceUid] {
        &self.failed_instances
    }
}

/// Compute the final response of a retrieval.
///
/// `tally` is `None` when the request was malformed. A cancelled retrieval is always
/// reported as cancelled, even if the cancel indication arrived after the last sub-operation
/// was attempted.
pub fn compute_composite_result(
    tally: Option<&SubOperationTally>,
    cancelled: bool,
) -> CompositeResult {
    let tally = match tally {
        Some(tally) if tally.total > 0 => tally,
        _ => return CompositeResult::unable_to_process(),
    };
    let counts = SubOperationCounts {
        completed: tally.completed,
        failed: tally.failed,
        warning: tally.warning,
    };
    let (status, remaining) = if cancelled {
        (CompositeStatus::Cancelled, Some(tally.remaining()))
    } else if tally.failed == 0 && tally.warning == 0 && tally.completed == tally.total {
        (CompositeStatus::Success, None)
    } else if tally.completed == 0 && tally.warning == 0 && tally.failed == tally.total {
        let code = tally.first_failure.unwrap_or(status::OUT_OF_RESOURCES);
        (CompositeStatus::Failure(code), None)
    } else {
        (CompositeStatus::Warning, None)
    };
    debug_assert!(
        remaining.is_none() || status == CompositeStatus::Cancelled,
        "remaining sub-operations are only reported for a cancelled retrieval"
    );
    CompositeResult {
        status,
        counts: Some(counts),
        remaining,
        failed_instances: tally.failed_instances.clone(),
    }
}
