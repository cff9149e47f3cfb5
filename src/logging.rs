//! Logging interface used by the long-lived components.
//!
//! The long-poll driver keeps running across recoverable failures, so it
//! needs somewhere to report what it is retrying. Components take an
//! `Option<Arc<dyn Logger>>` and fall back to [`with_default`], which logs
//! through `tracing`; [`Discard`] silences a component entirely.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// A single key-value pair attached to a log record.
pub type Kv<'a> = (&'static str, &'a dyn fmt::Display);

/// Logging interface accepted by the driver and the retry layer.
///
/// Methods take arguments as key-value pairs to allow both structured and
/// plain-text implementations.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str, kvs: &[Kv<'_>]);
    fn error(&self, err: &dyn std::error::Error, msg: &str, kvs: &[Kv<'_>]);
}

/// Default logger emitting through the `tracing` macros.
pub struct Tracing;

impl Logger for Tracing {
    fn info(&self, msg: &str, kvs: &[Kv<'_>]) {
        tracing::info!("{msg}{}", format_kvs(kvs));
    }

    fn error(&self, err: &dyn std::error::Error, msg: &str, kvs: &[Kv<'_>]) {
        tracing::error!("{msg}{}: {}", format_kvs(kvs), error_chain(err));
    }
}

/// Logger that drops every record. Only inject this if you are sure about
/// letting everything go wrong silently someday.
pub struct Discard;

impl Logger for Discard {
    fn info(&self, _msg: &str, _kvs: &[Kv<'_>]) {}
    fn error(&self, _err: &dyn std::error::Error, _msg: &str, _kvs: &[Kv<'_>]) {}
}

static DEFAULT: Lazy<Arc<dyn Logger>> = Lazy::new(|| Arc::new(Tracing));

/// Returns the given logger, or the `tracing`-backed default if none is set.
pub fn with_default(logger: Option<Arc<dyn Logger>>) -> Arc<dyn Logger> {
    logger.unwrap_or_else(|| DEFAULT.clone())
}

fn format_kvs(kvs: &[Kv<'_>]) -> String {
    let mut out = String::new();
    for (key, value) in kvs {
        out.push_str(&format!(" {key}={value}"));
    }
    out
}

/// Formats the full source chain of an error, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = format!("[{:?}", err.to_string());
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!(", {:?}", cause.to_string()));
        source = cause.source();
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_kvs() {
        assert_eq!(format_kvs(&[]), "");
        let delay = "50ms".to_string();
        assert_eq!(format_kvs(&[("delay", &delay)]), " delay=50ms");
    }

    #[test]
    fn test_error_chain_walks_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "inner fault");
        let outer = crate::Error::consumer(inner);
        let chain = error_chain(&outer);
        assert!(chain.contains("update consumer failed"));
        assert!(chain.contains("inner fault"));
    }

    #[test]
    fn test_with_default_keeps_injected_logger() {
        let discard: Arc<dyn Logger> = Arc::new(Discard);
        let logger = with_default(Some(discard.clone()));
        assert!(Arc::ptr_eq(&logger, &discard));
    }
}
