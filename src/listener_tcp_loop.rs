use crate::resolver::StorageIndex;
use crate::scp::{handle_association, RetrieveService};
use crate::thread_pool::ThreadPool;
use crate::transcode::{DatasetReader, Transcoder};
use dicom::ul::association::server::AcceptAny;
use dicom::ul::ServerAssociationOptions;
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_semantic_conventions as semconv;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Listen for C-GET requesters on a TCP port.
///
/// Every TCP connection is handled by [handle_association] in a thread of a pool of
/// `n_threads`. `on_start` is called with the bound address once the port is open.
pub fn dicom_listener_tcp_loop<I, S, F>(
    address: SocketAddrV4,
    options: ServerAssociationOptions<'static, AcceptAny>,
    service: Arc<RetrieveService<I, S>>,
    finite_connections: Option<usize>,
    n_threads: NonZeroUsize,
    on_start: Option<F>,
) -> anyhow::Result<()>
where
    I: StorageIndex + Send + Sync + 'static,
    S: DatasetReader + Transcoder + Send + Sync + 'static,
    F: FnOnce(SocketAddr),
{
    let listener = TcpListener::bind(address)?;
    let local_addr = listener.local_addr()?;
    tracing::info!("listening on: tcp://{}", local_addr);
    if let Some(f) = on_start {
        f(local_addr);
    }
    let mut pool = ThreadPool::new(n_threads, "dicom_listener")?;
    let options = Arc::new(options);
    let incoming: Box<dyn Iterator<Item = Result<TcpStream, _>>> =
        if let Some(n) = finite_connections {
            Box::new(listener.incoming().take(n))
        } else {
            Box::new(listener.incoming())
        };
    let tracer = global::tracer(env!("CARGO_PKG_NAME"));
    for stream in incoming {
        tracer.in_span("association", |cx| match stream {
            Ok(scu_stream) => {
                let options = Arc::clone(&options);
                let service = Arc::clone(&service);
                let accepted = pool.execute(move || {
                    let ulid = ulid::Ulid::new();
                    let _context_guard = cx.attach();
                    let context = Context::current();
                    let association_attribute = KeyValue::new("association_ulid", ulid.to_string());
                    context.span().set_attribute(association_attribute);
                    if let Ok(address) = scu_stream.peer_addr() {
                        let peer_attributes = vec![
                            KeyValue::new(semconv::trace::CLIENT_ADDRESS, address.ip().to_string()),
                            KeyValue::new(semconv::trace::CLIENT_PORT, address.port() as i64),
                        ];
                        context.span().set_attributes(peer_attributes);
                    }
                    match handle_association(scu_stream, &options, &service, ulid) {
                        Ok(()) => context.span().set_status(Status::Ok),
                        Err(e) => {
                            tracing::error!(association_ulid = ulid.to_string(), "{:?}", e);
                            context.span().set_status(Status::error(e.to_string()))
                        }
                    }
                });
                if !accepted {
                    tracing::error!("thread pool is shut down, dropping connection");
                }
            }
            Err(e) => {
                tracing::warn!("failed to accept connection: {e}");
                cx.span().set_status(Status::error(e.to_string()))
            }
        })
    }
    pool.shutdown();
    Ok(())
}
