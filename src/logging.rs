//! Subscriber setup. The library crates log through `log`; records are
//! bridged into `tracing` so both end up in one subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directives when neither `RUST_LOG` nor a filter is given.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter: `RUST_LOG` wins over `filter`, which wins over
/// [`DEFAULT_FILTER`].
pub fn env_filter(filter: Option<&str>) -> Result<EnvFilter, LoggingError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    Ok(EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER))?)
}

/// Install the global subscriber, human readable or JSON lines.
pub fn init(filter: Option<&str>, json: bool) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(env_filter(filter)?);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }
    tracing::debug!("Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directive() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(matches!(
            env_filter(Some("skiff=notalevel")),
            Err(LoggingError::Filter(_))
        ));
        assert!(env_filter(Some("skiff_ftp=trace,info")).is_ok());
    }

    #[test]
    fn second_init_fails() {
        let _ = init(Some("warn"), false);
        assert!(matches!(init(Some("warn"), true), Err(LoggingError::Init(_))));
    }
}
