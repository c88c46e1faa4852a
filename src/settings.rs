//! Oxiget settings, which are configurable using environment variables.
use crate::dicomrs_settings::DicomRsSettings;
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct OxigetEnvOptions {
    /// Directory of the DICOM files to serve.
    pub files_root: Utf8PathBuf,
    #[serde(default)]
    pub scp: DicomRsSettings,
    #[serde(default = "default_max_pdu_length")]
    pub scp_max_pdu_length: u32,
    #[serde(default = "default_listener_threads")]
    pub listener_threads: NonZeroUsize,
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    /// How long to wait for the C-STORE-RSP of a sub-operation.
    #[serde(with = "humantime_serde", default = "default_ack_timeout")]
    pub ack_timeout: Duration,
    /// Whether to send a pending C-GET-RSP after each sub-operation.
    #[serde(default = "default_true")]
    pub pending_responses: bool,
}

fn default_max_pdu_length() -> u32 {
    16384
}

fn default_listener_threads() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

fn default_listener_port() -> u16 {
    11111
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}
