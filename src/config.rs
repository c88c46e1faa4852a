use figment::providers::Env;
use figment::Figment;
use std::sync::OnceLock;

static CONFIG: OnceLock<Figment> = OnceLock::new();

/// Configuration from `OXIGET_*` environment variables.
pub fn get_config() -> &'static Figment {
    CONFIG.get_or_init(build_config)
}

pub(crate) fn build_config() -> Figment {
    Figment::new()
        .merge(Env::prefixed("OXIGET_").split("_"))
        .merge(Env::prefixed("OXIGET_"))
        // OXIGET_SCP_UNCOMPRESSED_ONLY -> scp.uncompressed_only
        .merge(Env::prefixed("OXIGET_SCP_").map(|key| format!("scp.{key}").into()))
}
