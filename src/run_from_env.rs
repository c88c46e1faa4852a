use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use crate::config::get_config;
use crate::directory_index::DirectoryIndex;
use crate::listener_tcp_loop::dicom_listener_tcp_loop;
use crate::scp::RetrieveService;
use crate::settings::OxigetEnvOptions;
use crate::transcode::DicomFileSource;

/// Calls [run_everything] using configuration from environment variables.
///
/// `finite_connections`: shut down the server after the given number of DICOM associations.
pub async fn run_everything_from_env(finite_connections: Option<usize>) -> anyhow::Result<()> {
    let config = get_config();
    let settings = config.extract()?;
    run_everything(settings, finite_connections, None::<fn(SocketAddr)>).await
}

/// Index the files under `files_root`, then serve them to C-GET requesters.
///
/// `on_start` is called with the address of the listener once it is ready for connections.
pub async fn run_everything<F>(
    OxigetEnvOptions {
        files_root,
        scp,
        scp_max_pdu_length,
        listener_threads,
        listener_port,
        ack_timeout,
        pending_responses,
    }: OxigetEnvOptions,
    finite_connections: Option<usize>,
    on_start: Option<F>,
) -> anyhow::Result<()>
where
    F: FnOnce(SocketAddr) + Send + 'static,
{
    let index = tokio::task::spawn_blocking(move || DirectoryIndex::open(&files_root)).await??;
    let service = Arc::new(RetrieveService::new(
        index,
        DicomFileSource,
        ack_timeout,
        pending_responses,
    ));
    let options = scp.into_options(scp_max_pdu_length);
    let listener_handle = tokio::task::spawn_blocking(move || {
        dicom_listener_tcp_loop(
            SocketAddrV4::new(Ipv4Addr::from(0), listener_port),
            options,
            service,
            finite_connections,
            listener_threads,
            on_start,
        )
    });
    listener_handle.await?
}
