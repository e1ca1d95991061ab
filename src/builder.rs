//! The reusable document-builder engine handed out by the pool.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use libc::{c_char, c_int};

use crate::config::ResolvedConfig;
use crate::document::Document;
use crate::error::{PoolError, Result};
use crate::libxml2::{
    self, ResolverScope, XmlDoc, XmlProblem, summarize, with_captured_problems, xmlReadFile,
    xmlReadMemory, xmlXIncludeProcessFlags,
};

/// Scratch buffers larger than this are not retained across check-ins.
const MAX_RETAINED_SCRATCH: usize = 1 << 20;

/// Checked conversion of a buffer length to libxml2's size type.
fn buffer_size(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| PoolError::InvalidArgument {
        details: format!("input of {len} bytes exceeds the maximum supported size"),
    })
}

/// One parsing engine, bound to the pool's resolved configuration.
///
/// A builder is exclusively owned by one caller between checkout and check-in.
/// All parse operations apply the pool's option mask, route diagnostics to the
/// pool's error handler, and (when a schema is configured) validate the parsed
/// document before handing it back.
pub struct DocumentBuilder {
    config: Arc<ResolvedConfig>,
    // Reused across reader-based parses; cleared on check-in.
    scratch: Vec<u8>,
}

impl DocumentBuilder {
    pub(crate) fn new(config: Arc<ResolvedConfig>) -> Self {
        libxml2::init();
        DocumentBuilder {
            config,
            scratch: Vec::new(),
        }
    }

    /// Parse a document from an in-memory byte buffer.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Document> {
        let size = buffer_size(bytes.len())?;
        let _resolver = ResolverScope::activate(self.config.entity_resolver.clone());
        let (raw, problems) = with_captured_problems(|| unsafe {
            xmlReadMemory(
                bytes.as_ptr() as *const c_char,
                size,
                std::ptr::null(),
                std::ptr::null(),
                self.config.options,
            )
        });
        self.finish_parse(raw, problems)
    }

    /// Parse a document from a reader, buffering it fully first.
    pub fn parse_reader<R: Read>(&mut self, mut reader: R) -> Result<Document> {
        self.scratch.clear();
        reader
            .read_to_end(&mut self.scratch)
            .map_err(|e| PoolError::parse_with("failed to read input stream", e))?;
        let bytes = std::mem::take(&mut self.scratch);
        let result = self.parse_bytes(&bytes);
        self.scratch = bytes;
        result
    }

    /// Parse a document from a file on disk.
    pub fn parse_file(&self, path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path).map_err(|e| {
            PoolError::parse_with(format!("failed to read {}", path.display()), e)
        })?;
        self.parse_bytes(&bytes)
    }

    /// Parse a document addressed by URI (a filesystem path or `file://` URI;
    /// network fetches are disabled).
    pub fn parse_uri(&self, uri: &str) -> Result<Document> {
        if uri.is_empty() {
            return Err(PoolError::InvalidArgument {
                details: "uri must be non-empty".to_string(),
            });
        }
        let c_uri =
            std::ffi::CString::new(uri).map_err(|_| PoolError::InvalidArgument {
                details: "uri must not contain NUL bytes".to_string(),
            })?;

        let _resolver = ResolverScope::activate(self.config.entity_resolver.clone());
        let (raw, problems) = with_captured_problems(|| unsafe {
            xmlReadFile(c_uri.as_ptr(), std::ptr::null(), self.config.options)
        });
        self.finish_parse(raw, problems)
    }

    /// Create a new, empty document.
    pub fn new_document(&self) -> Result<Document> {
        Document::new_empty()
    }

    /// Clear per-use mutable state before the engine goes back on the idle
    /// cache. Configuration is untouched; it is immutable by construction.
    pub(crate) fn reset(&mut self) {
        self.scratch.clear();
        if self.scratch.capacity() > MAX_RETAINED_SCRATCH {
            self.scratch = Vec::new();
        }
    }

    /// Common tail of every parse: report diagnostics, fail on a null
    /// document or (when DTD-validating) on validity errors, strip comments,
    /// and run schema validation.
    fn finish_parse(&self, raw: *mut XmlDoc, problems: Vec<XmlProblem>) -> Result<Document> {
        self.report(&problems);

        if raw.is_null() {
            return Err(PoolError::parse(summarize(&problems)));
        }
        let mut doc = unsafe { Document::from_raw(raw) };

        // With DTDVALID set, libxml2 reports validity violations through the
        // error handler but still returns a document; surface them as failure.
        if self.config.dtd_validating && problems.iter().any(|p| !p.is_warning()) {
            return Err(PoolError::parse(summarize(&problems)));
        }

        // XInclude substitution is a separate post-parse pass; the read
        // option alone only marks the parser context.
        if self.config.xinclude_aware {
            let (code, include_problems) = with_captured_problems(|| unsafe {
                xmlXIncludeProcessFlags(doc.as_ptr(), self.config.options)
            });
            self.report(&include_problems);
            if code < 0 {
                return Err(PoolError::parse(summarize(&include_problems)));
            }
        }

        if self.config.ignore_comments {
            doc.strip_comments();
        }

        if let Some(schema) = &self.config.schema {
            let (code, validation_problems) = schema.validate_doc(doc.as_ptr())?;
            self.report(&validation_problems);
            if code != 0 {
                return Err(PoolError::parse(summarize(&validation_problems)));
            }
        }

        Ok(doc)
    }

    fn report(&self, problems: &[XmlProblem]) {
        for problem in problems {
            if problem.is_warning() {
                self.config.error_handler.warning(&problem.message);
            } else {
                self.config.error_handler.error(&problem.message);
            }
        }
    }
}
