use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A latched cancel indication for one retrieval.
///
/// The transport sets it when a C-CANCEL-RQ arrives; the retrieval loop reads it
/// before every sub-operation. Once set, it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
