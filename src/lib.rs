//! # xml-builder-pool
//!
//! A bounded, thread-safe pool of reusable XML document builders layered over
//! libxml2, for callers that parse many documents with one shared parser
//! configuration (coalescing, DTD validation, namespace awareness, XSD schema,
//! entity resolution).
//!
//! A pool goes through three lifecycle states: it is configured while
//! *uninitialized*, frozen by [`BasicParserPool::initialize`], and torn down
//! by [`BasicParserPool::destroy`]. Between initialize and destroy, builders
//! are checked out as [`ParserHandle`]s; a handle returns its engine to the
//! idle cache when dropped, so the convenience operations
//! ([`BasicParserPool::parse`], [`BasicParserPool::new_document`]) release
//! their engine on every exit path.

pub mod builder;
pub mod config;
pub mod document;
pub mod error;
pub mod handler;
pub mod libxml2;
pub mod pool;

pub use config::{DEFAULT_MAX_POOL_SIZE, XML_SCHEMA_LANGUAGE_URI, attributes, features};
pub use document::{Document, Element};
pub use error::{LibXml2Error, PoolError, Result};
pub use handler::{EntityResolver, ErrorHandler, LoggingErrorHandler};
pub use libxml2::Schema;
pub use pool::{BasicParserPool, ParserHandle};
