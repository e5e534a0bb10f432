//! Logging setup
//!
//! Libraries only emit `tracing` events; binaries and tests that want to
//! see them call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::error::{VcError, VcResult};

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` overrides the configured level when set. Returns `Ok(false)`
/// if a global subscriber was already installed, which is expected when
/// several tests share a process.
///
/// # Errors
/// [`VcError::Config`] if the level directive does not parse
pub fn init_tracing(config: &TelemetryConfig) -> VcResult<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| VcError::Config(format!("telemetry.level '{}': {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }

    #[test]
    fn bad_directive_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = TelemetryConfig {
            level: "bvc_engine=notalevel".to_string(),
            json: false,
        };
        assert!(matches!(init_tracing(&config), Err(VcError::Config(_))));
    }
}
