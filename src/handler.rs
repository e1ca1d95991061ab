//! Caller-pluggable hooks for parse diagnostics and external entity resolution.
//!
//! Both hooks are fixed per pool: they are attached to every builder the pool
//! constructs and cannot be swapped through a borrowed handle. This prevents a
//! caller from silently altering shared pool configuration.

use std::fmt;

/// Receives parser and schema-validation diagnostics.
///
/// The handler observes diagnostics only; it does not alter control flow.
/// Whether a parse fails is decided by the builder from the same diagnostics.
pub trait ErrorHandler: Send + Sync {
    /// A recoverable parser warning.
    fn warning(&self, message: &str);

    /// A parse or validation error.
    fn error(&self, message: &str);
}

/// Default handler: routes diagnostics to `tracing` at warn/error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn warning(&self, message: &str) {
        tracing::warn!(target: "xml_builder_pool", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "xml_builder_pool", "{message}");
    }
}

/// Resolves external entity references encountered during a parse.
///
/// Returning `None` falls through to libxml2's default loader. The resolved
/// bytes must be well-formed replacement text for the entity.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, public_id: Option<&str>, system_id: &str) -> Option<Vec<u8>>;
}

impl fmt::Debug for dyn ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandler")
    }
}

impl fmt::Debug for dyn EntityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntityResolver")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler {
        warnings: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl ErrorHandler for RecordingHandler {
        fn warning(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_custom_handler_records_messages() {
        let handler = RecordingHandler {
            warnings: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        };

        handler.warning("entity redefined");
        handler.error("premature end of data");

        assert_eq!(handler.warnings.lock().unwrap().len(), 1);
        assert_eq!(handler.errors.lock().unwrap().as_slice(), ["premature end of data"]);
    }

    #[test]
    fn test_logging_handler_does_not_panic() {
        let handler = LoggingErrorHandler;
        handler.warning("a warning with no subscriber installed");
        handler.error("an error with no subscriber installed");
    }
}
