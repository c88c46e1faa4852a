use opentelemetry_sdk::trace::SdkTracerProvider;
use oxiget::run_everything_from_env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy(),
            )
            .finish(),
    )?;
    let tracer_provider = init_tracer_provider()?;
    let result = run_everything_from_env(None).await;
    if let Some(provider) = tracer_provider {
        provider.shutdown()?;
    }
    result
}

/// Export OpenTelemetry traces if `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracer_provider() -> anyhow::Result<Option<SdkTracerProvider>> {
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_none() {
        return Ok(None);
    }
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(Some(provider))
}
