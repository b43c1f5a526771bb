use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

/// `level_override` comes from `--log-level` and beats the configured level,
/// but `RUST_LOG` still wins over both.
pub(crate) fn init_tracing(
    settings: &Settings,
    level_override: Option<&str>,
) -> anyhow::Result<()> {
    let level = level_override.unwrap_or(settings.telemetry().log_level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = fmt().with_env_filter(filter).with_target(false);

    if settings.telemetry().json {
        builder.json().try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    } else {
        builder.try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    Ok(())
}
