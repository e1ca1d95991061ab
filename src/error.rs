use thiserror::Error;

/// Main error type covering every failure mode of the pool and its builders.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid configuration: {details}")]
    InvalidConfiguration { details: String },

    #[error("pool is already initialized; configuration is frozen")]
    AlreadyInitialized,

    #[error("pool has been destroyed")]
    AlreadyDestroyed,

    #[error("pool has not been initialized")]
    Uninitialized,

    #[error("configuration rejected at initialization: {details}")]
    Configuration { details: String },

    #[error("parse failed: {details}")]
    Parse {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("builder was already returned to the pool")]
    BuilderReturned,
}

impl PoolError {
    /// Parse failure with no underlying cause beyond libxml2's diagnostics.
    pub(crate) fn parse(details: impl Into<String>) -> Self {
        PoolError::Parse {
            details: details.into(),
            source: None,
        }
    }

    /// Parse failure wrapping an underlying cause (I/O, FFI).
    pub(crate) fn parse_with(
        details: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PoolError::Parse {
            details: details.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// LibXML2-specific error types surfaced by the FFI layer.
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("schema parsing failed")]
    SchemaParseFailed,

    #[error("validation context creation failed")]
    ValidationContextFailed,

    #[error("document parsing failed: {details}")]
    DocumentParseFailed { details: String },

    #[error("document serialization failed")]
    SerializationFailed,

    #[error("memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("libxml2 internal error: code {code}")]
    Internal { code: i32 },
}

impl From<LibXml2Error> for PoolError {
    fn from(err: LibXml2Error) -> Self {
        let details = err.to_string();
        PoolError::Parse {
            details,
            source: Some(Box::new(err)),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PoolError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::InvalidConfiguration {
            details: "max pool size must be positive".to_string(),
        };
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("max pool size"));

        assert!(
            PoolError::AlreadyInitialized
                .to_string()
                .contains("already initialized")
        );
        assert!(PoolError::Uninitialized.to_string().contains("not been"));
        assert!(
            PoolError::BuilderReturned
                .to_string()
                .contains("already returned")
        );
    }

    #[test]
    fn test_parse_error_preserves_cause() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing input");
        let err = PoolError::parse_with("could not read file", io);

        assert!(err.to_string().contains("could not read file"));
        let source = err.source().expect("cause should be preserved");
        assert_eq!(source.to_string(), "missing input");
    }

    #[test]
    fn test_libxml2_error_conversion() {
        let err: PoolError = LibXml2Error::SchemaParseFailed.into();
        match err {
            PoolError::Parse { details, source } => {
                assert!(details.contains("schema"));
                assert!(source.is_some());
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_formatting() {
        let err = PoolError::Configuration {
            details: "unknown feature \"bogus\"".to_string(),
        };
        let debug = format!("{err:?}");
        assert!(debug.contains("Configuration"));
        assert!(debug.contains("bogus"));
    }
}
