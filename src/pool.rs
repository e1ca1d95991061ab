//! A bounded, thread-safe cache of reusable document builders.
//!
//! The pool is created, configured, and initialized once; configuration is
//! frozen from then on. Checked-out builders are wrapped in a [`ParserHandle`]
//! that routes the engine back to the idle cache when returned or dropped.
//! Checkout never blocks: an empty cache constructs a fresh engine, and
//! returns beyond the capacity bound are discarded.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::DocumentBuilder;
use crate::config::{BuilderConfig, ResolvedConfig};
use crate::document::Document;
use crate::error::{PoolError, Result};
use crate::handler::{EntityResolver, ErrorHandler};
use crate::libxml2::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    Destroyed,
}

struct PoolState {
    lifecycle: Lifecycle,
    config: BuilderConfig,
    /// The "factory": present exactly while the pool is initialized.
    factory: Option<Arc<ResolvedConfig>>,
    /// Idle builders, LIFO. The most recently returned engine is reused
    /// first. Bounded by `config.max_pool_size`.
    idle: Vec<DocumentBuilder>,
}

struct PoolInner {
    state: Mutex<PoolState>,
}

impl PoolInner {
    /// Route an engine back to the idle cache. Excess returns and returns
    /// after destroy are discarded silently.
    fn check_in(&self, mut engine: DocumentBuilder) {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Initialized && state.idle.len() < state.config.max_pool_size
        {
            engine.reset();
            state.idle.push(engine);
        }
    }
}

/// A bounded pool of reusable XML document builders.
///
/// ```no_run
/// use xml_builder_pool::BasicParserPool;
///
/// let pool = BasicParserPool::new();
/// pool.set_max_pool_size(10)?;
/// pool.set_namespace_aware(true)?;
/// pool.initialize()?;
///
/// let doc = pool.parse(b"<greeting>hello</greeting>")?;
/// assert_eq!(doc.root_element().unwrap().local_name(), "greeting");
/// # Ok::<(), xml_builder_pool::PoolError>(())
/// ```
pub struct BasicParserPool {
    inner: Arc<PoolInner>,
}

impl Default for BasicParserPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicParserPool {
    /// Create an unconfigured, uninitialized pool with default settings.
    pub fn new() -> Self {
        BasicParserPool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Uninitialized,
                    config: BuilderConfig::default(),
                    factory: None,
                    idle: Vec::new(),
                }),
            }),
        }
    }

    /// Run a configuration mutation, enforcing the lifecycle gate: setters
    /// are legal only before `initialize()`.
    fn with_config<R>(&self, f: impl FnOnce(&mut BuilderConfig) -> Result<R>) -> Result<R> {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Uninitialized => f(&mut state.config),
            Lifecycle::Initialized => Err(PoolError::AlreadyInitialized),
            Lifecycle::Destroyed => Err(PoolError::AlreadyDestroyed),
        }
    }

    // --- configuration setters (pre-initialization only) -------------------

    /// Bound on the idle cache. Must be positive.
    pub fn set_max_pool_size(&self, max_pool_size: usize) -> Result<()> {
        self.with_config(|config| {
            if max_pool_size == 0 {
                return Err(PoolError::InvalidConfiguration {
                    details: "max pool size must be positive".to_string(),
                });
            }
            config.max_pool_size = max_pool_size;
            Ok(())
        })
    }

    /// Merge CDATA sections into adjacent text nodes.
    pub fn set_coalescing(&self, coalescing: bool) -> Result<()> {
        self.with_config(|config| {
            config.coalescing = coalescing;
            Ok(())
        })
    }

    /// Validate documents against their DTD during parsing.
    pub fn set_dtd_validating(&self, validating: bool) -> Result<()> {
        self.with_config(|config| {
            config.dtd_validating = validating;
            Ok(())
        })
    }

    /// Substitute entity references with their replacement text.
    pub fn set_expand_entity_references(&self, expand: bool) -> Result<()> {
        self.with_config(|config| {
            config.expand_entity_references = expand;
            Ok(())
        })
    }

    /// Drop comment nodes from parsed documents.
    pub fn set_ignore_comments(&self, ignore: bool) -> Result<()> {
        self.with_config(|config| {
            config.ignore_comments = ignore;
            Ok(())
        })
    }

    /// Drop ignorable whitespace between elements.
    pub fn set_ignore_element_content_whitespace(&self, ignore: bool) -> Result<()> {
        self.with_config(|config| {
            config.ignore_element_content_whitespace = ignore;
            Ok(())
        })
    }

    /// Enable namespace processing. Forced on whenever a schema is set.
    pub fn set_namespace_aware(&self, aware: bool) -> Result<()> {
        self.with_config(|config| {
            config.namespace_aware = aware;
            Ok(())
        })
    }

    /// Enable XInclude processing during parsing.
    pub fn set_xinclude_aware(&self, aware: bool) -> Result<()> {
        self.with_config(|config| {
            config.xinclude_aware = aware;
            Ok(())
        })
    }

    /// Set or clear the validation schema. Setting a schema forces namespace
    /// awareness and discards conflicting raw schema attributes.
    pub fn set_schema(&self, schema: Option<Schema>) -> Result<()> {
        self.with_config(|config| {
            config.set_schema(schema);
            Ok(())
        })
    }

    /// Set one factory attribute. Keys are validated at initialization.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.with_config(|config| {
            config.set_attribute(key.into(), value.into());
            Ok(())
        })
    }

    /// Merge a map of factory attributes. Empty keys are filtered out.
    pub fn set_attributes(
        &self,
        attributes: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        self.with_config(|config| {
            for (key, value) in attributes {
                config.set_attribute(key, value);
            }
            Ok(())
        })
    }

    /// Set one factory feature. Names are validated at initialization.
    pub fn set_feature(&self, name: impl Into<String>, value: bool) -> Result<()> {
        self.with_config(|config| {
            config.set_feature(name.into(), value);
            Ok(())
        })
    }

    /// Merge a map of factory features. Empty keys are filtered out.
    pub fn set_features(&self, features: impl IntoIterator<Item = (String, bool)>) -> Result<()> {
        self.with_config(|config| {
            for (name, value) in features {
                config.set_feature(name, value);
            }
            Ok(())
        })
    }

    /// Set or clear the external entity resolver.
    pub fn set_entity_resolver(&self, resolver: Option<Arc<dyn EntityResolver>>) -> Result<()> {
        self.with_config(|config| {
            config.entity_resolver = resolver;
            Ok(())
        })
    }

    /// Replace the error handler. The pool always has one; the default logs
    /// through `tracing`.
    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) -> Result<()> {
        self.with_config(|config| {
            config.error_handler = handler;
            Ok(())
        })
    }

    // --- configuration getters ---------------------------------------------

    pub fn max_pool_size(&self) -> usize {
        self.inner.state.lock().config.max_pool_size
    }

    pub fn is_coalescing(&self) -> bool {
        self.inner.state.lock().config.coalescing
    }

    pub fn is_dtd_validating(&self) -> bool {
        self.inner.state.lock().config.dtd_validating
    }

    pub fn is_namespace_aware(&self) -> bool {
        self.inner.state.lock().config.namespace_aware
    }

    pub fn is_ignoring_comments(&self) -> bool {
        self.inner.state.lock().config.ignore_comments
    }

    pub fn is_xinclude_aware(&self) -> bool {
        self.inner.state.lock().config.xinclude_aware
    }

    // --- lifecycle ----------------------------------------------------------

    /// Freeze the configuration and build the internal factory.
    ///
    /// Idempotent: initializing an already-initialized pool is a no-op
    /// success. Fails with [`PoolError::Configuration`] if the configuration
    /// snapshot is rejected (unknown features/attributes, bad schema source).
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Destroyed => Err(PoolError::AlreadyDestroyed),
            Lifecycle::Uninitialized => {
                let resolved = state.config.resolve()?;
                state.factory = Some(Arc::new(resolved));
                state.lifecycle = Lifecycle::Initialized;
                Ok(())
            }
        }
    }

    /// Tear the pool down. Idle builders are dropped and every subsequent
    /// operation fails with [`PoolError::AlreadyDestroyed`]. Idempotent.
    /// Builders still checked out are discarded when their handles return.
    pub fn destroy(&self) {
        let mut state = self.inner.state.lock();
        state.idle.clear();
        state.factory = None;
        state.lifecycle = Lifecycle::Destroyed;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::Initialized
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::Destroyed
    }

    // --- pool operations (initialized only) ---------------------------------

    /// Check a builder out of the pool.
    ///
    /// Reuses the most recently returned idle engine when one exists,
    /// otherwise constructs a fresh one from the factory. Never blocks; the
    /// number of concurrently outstanding handles is unbounded (only the
    /// idle cache is bounded).
    pub fn obtain(&self) -> Result<ParserHandle> {
        let mut state = self.inner.state.lock();
        let factory = match state.lifecycle {
            Lifecycle::Initialized => state
                .factory
                .clone()
                .expect("initialized pool always has a factory"),
            Lifecycle::Uninitialized => return Err(PoolError::Uninitialized),
            Lifecycle::Destroyed => return Err(PoolError::AlreadyDestroyed),
        };

        let engine = state
            .idle
            .pop()
            .unwrap_or_else(|| DocumentBuilder::new(factory));

        Ok(ParserHandle {
            pool: Arc::clone(&self.inner),
            engine: Mutex::new(Some(engine)),
        })
    }

    /// Number of idle builders currently cached. Diagnostics and testing only.
    pub fn pool_size(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    // --- convenience operations ---------------------------------------------
    //
    // Each obtains a handle for the duration of one call; the handle's drop
    // returns the engine on every exit path, success or failure.

    /// Parse a document from an in-memory byte buffer.
    pub fn parse(&self, bytes: &[u8]) -> Result<Document> {
        let handle = self.obtain()?;
        handle.parse_bytes(bytes)
    }

    /// Parse a document from a reader.
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Document> {
        let handle = self.obtain()?;
        handle.parse_reader(reader)
    }

    /// Parse a document from a file on disk.
    pub fn parse_file(&self, path: &Path) -> Result<Document> {
        let handle = self.obtain()?;
        handle.parse_file(path)
    }

    /// Create a new, empty document.
    pub fn new_document(&self) -> Result<Document> {
        let handle = self.obtain()?;
        handle.new_document()
    }
}

/// A checked-out builder.
///
/// The handle exclusively owns its engine until it is returned. Returning is
/// explicit via [`ParserHandle::return_to_pool`] or implicit on drop; the two
/// paths race safely and exactly one of them routes the engine back. Every
/// operation on a handle that has already been returned fails with
/// [`PoolError::BuilderReturned`].
pub struct ParserHandle {
    pool: Arc<PoolInner>,
    // `None` means "already returned". Guarded per-handle so an explicit
    // return racing the drop resolves deterministically.
    engine: Mutex<Option<DocumentBuilder>>,
}

impl ParserHandle {
    fn with_engine<R>(&self, f: impl FnOnce(&mut DocumentBuilder) -> Result<R>) -> Result<R> {
        let mut guard = self.engine.lock();
        match guard.as_mut() {
            Some(engine) => f(engine),
            None => Err(PoolError::BuilderReturned),
        }
    }

    /// Parse a document from an in-memory byte buffer.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Document> {
        self.with_engine(|engine| engine.parse_bytes(bytes))
    }

    /// Parse a document from a reader.
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Document> {
        self.with_engine(|engine| engine.parse_reader(reader))
    }

    /// Parse a document from a file on disk.
    pub fn parse_file(&self, path: &Path) -> Result<Document> {
        self.with_engine(|engine| engine.parse_file(path))
    }

    /// Parse a document addressed by URI.
    pub fn parse_uri(&self, uri: &str) -> Result<Document> {
        self.with_engine(|engine| engine.parse_uri(uri))
    }

    /// Create a new, empty document.
    pub fn new_document(&self) -> Result<Document> {
        self.with_engine(|engine| engine.new_document())
    }

    /// Return the engine to the pool. Idempotent: the second and subsequent
    /// calls are silent no-ops.
    pub fn return_to_pool(&self) {
        if let Some(engine) = self.engine.lock().take() {
            self.pool.check_in(engine);
        }
    }
}

impl Drop for ParserHandle {
    fn drop(&mut self) {
        // Safety net for handles never explicitly returned. `take()` has
        // already yielded `None` if an explicit return won the race.
        self.return_to_pool();
    }
}
