//! Tracing subscriber setup.

use recall_core::config::GeneralConfig;
use recall_core::error::{RecallError, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `general.log_level` when set. `general.log_format`
/// selects `pretty` (human-readable) or `json` output. Returns `Ok(false)`
/// if a global subscriber was already installed.
///
/// # Errors
/// [`RecallError::Config`] for an unknown format or an unparsable level.
pub fn init_tracing(config: &GeneralConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            RecallError::Config(format!("invalid general.log_level '{}': {e}", config.log_level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.log_format.as_str() {
        "pretty" => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        other => {
            return Err(RecallError::Config(format!(
                "unknown general.log_format '{other}' (expected \"pretty\" or \"json\")"
            )));
        }
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_rejected() {
        let config = GeneralConfig {
            log_format: "xml".into(),
            ..GeneralConfig::default()
        };
        assert!(matches!(init_tracing(&config), Err(RecallError::Config(_))));
    }

    #[test]
    fn second_install_reports_false() {
        let config = GeneralConfig::default();
        let _ = init_tracing(&config).expect("valid config");
        assert!(!init_tracing(&config).expect("valid config"));
    }
}
