use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins; otherwise our crates log at info.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,modbot=info,modbot_core=info,modbot_sqlite=info,\
             modbot_telegram=info,{service_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))
}
