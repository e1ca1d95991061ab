//! Safe wrapper around the libxml2 FFI surface used by the builder pool.
//!
//! The Rust XML ecosystem has no mature XSD validation support, so document
//! parsing and schema validation both go through libxml2 directly. Validation
//! against a parsed schema is thread-safe (each caller creates its own
//! validation context); schema *parsing* is not, and callers are expected to
//! compile a schema once and share the resulting [`Schema`].
//!
//! Diagnostics are captured per-thread via libxml2's structured error handler
//! and surfaced as [`XmlProblem`] values rather than being printed to stderr.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::sync::{Arc, Once, OnceLock};

use libc::{c_char, c_int, c_uint, c_void};

use crate::error::{LibXml2Error, LibXml2Result};
use crate::handler::EntityResolver;

/// Global initialization flag for libxml2.
///
/// libxml2's initialization functions are NOT thread-safe, so they are guarded
/// by `std::sync::Once` and run exactly once per process.
static LIBXML2_INIT: Once = Once::new();

/// Initialize libxml2 if it has not been initialized yet. Safe to call from
/// any thread, any number of times.
pub(crate) fn init() {
    LIBXML2_INIT.call_once(|| unsafe {
        xmlInitParser();
    });
}

// Parser option flags (xmlParserOption). Only the subset the pool exposes.
pub(crate) const XML_PARSE_NOENT: c_int = 1 << 1;
pub(crate) const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub(crate) const XML_PARSE_DTDVALID: c_int = 1 << 4;
pub(crate) const XML_PARSE_NOBLANKS: c_int = 1 << 8;
pub(crate) const XML_PARSE_XINCLUDE: c_int = 1 << 10;
pub(crate) const XML_PARSE_NONET: c_int = 1 << 11;
pub(crate) const XML_PARSE_NSCLEAN: c_int = 1 << 13;
pub(crate) const XML_PARSE_NOCDATA: c_int = 1 << 14;

// Node types (xmlElementType).
pub(crate) const XML_ELEMENT_NODE: c_uint = 1;
pub(crate) const XML_COMMENT_NODE: c_uint = 8;

/// Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

/// Layout of `struct _xmlNode`. Stable public ABI; only read, never written.
#[repr(C)]
pub struct XmlNode {
    pub _private: *mut c_void,
    pub node_type: c_uint,
    pub name: *const c_char,
    pub children: *mut XmlNode,
    pub last: *mut XmlNode,
    pub parent: *mut XmlNode,
    pub next: *mut XmlNode,
    pub prev: *mut XmlNode,
    pub doc: *mut XmlDoc,
    pub ns: *mut XmlNs,
    pub content: *mut c_char,
    pub properties: *mut c_void,
    pub ns_def: *mut XmlNs,
    pub psvi: *mut c_void,
    pub line: u16,
    pub extra: u16,
}

/// Layout of `struct _xmlNs`.
#[repr(C)]
pub struct XmlNs {
    pub next: *mut XmlNs,
    pub ns_type: c_uint,
    pub href: *const c_char,
    pub prefix: *const c_char,
    pub _private: *mut c_void,
    pub context: *mut c_void,
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    // Document parsing and lifecycle
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlReadFile(filename: *const c_char, encoding: *const c_char, options: c_int)
    -> *mut XmlDoc;
    pub fn xmlNewDoc(version: *const c_char) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Node access and editing
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlNewNode(ns: *mut XmlNs, name: *const c_char) -> *mut XmlNode;
    pub fn xmlDocSetRootElement(doc: *mut XmlDoc, root: *mut XmlNode) -> *mut XmlNode;
    pub fn xmlUnlinkNode(cur: *mut XmlNode);
    pub fn xmlFreeNode(cur: *mut XmlNode);
    pub fn xmlNodeGetContent(cur: *const XmlNode) -> *mut c_char;

    // Serialization
    pub fn xmlDocDumpMemory(doc: *mut XmlDoc, mem: *mut *mut c_char, size: *mut c_int);

    // XInclude processing. The read options only mark the context; actual
    // substitution happens through this post-parse pass, which also forwards
    // the options to its sub-parses. Returns the number of substitutions,
    // or -1 on failure.
    pub fn xmlXIncludeProcessFlags(doc: *mut XmlDoc, flags: c_int) -> c_int;

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        sherr: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );

    // Error and entity-loader hooks
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(f: XmlExternalEntityLoader);
    pub fn xmlNewStringInputStream(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_char,
    ) -> *mut XmlParserInput;

    // libxml2's allocator hook; required to free buffers it hands out
    pub static xmlFree: unsafe extern "C" fn(mem: *mut c_void);
}

/// Severity of a captured libxml2 diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum XmlSeverity {
    Warning,
    Error,
    Fatal,
}

/// One diagnostic captured during a parse or validation call.
#[derive(Debug, Clone)]
pub struct XmlProblem {
    pub message: String,
    pub severity: XmlSeverity,
}

impl XmlProblem {
    pub fn is_warning(&self) -> bool {
        self.severity == XmlSeverity::Warning
    }
}

/// Join captured diagnostics into a single human-readable summary.
pub(crate) fn summarize(problems: &[XmlProblem]) -> String {
    if problems.is_empty() {
        return "no diagnostics reported".to_string();
    }
    problems
        .iter()
        .map(|p| p.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Callback for libxml2 to report diagnostics (structured).
unsafe extern "C" fn capture_callback(user_data: *mut c_void, error: *mut xmlError) {
    let problems = unsafe { &mut *(user_data as *mut Vec<XmlProblem>) };

    if error.is_null() {
        return;
    }

    let severity = match unsafe { (*error).level } {
        1 => XmlSeverity::Warning,
        2 => XmlSeverity::Error,
        _ => XmlSeverity::Fatal,
    };

    let msg_ptr = unsafe { (*error).message };
    if !msg_ptr.is_null() {
        let c_str = unsafe { CStr::from_ptr(msg_ptr) };
        if let Ok(s) = c_str.to_str() {
            problems.push(XmlProblem {
                message: s.trim().to_string(),
                severity,
            });
        }
    }
}

/// Run `f` with a thread-local structured error handler installed, collecting
/// every diagnostic libxml2 emits while `f` executes.
pub(crate) fn with_captured_problems<T>(f: impl FnOnce() -> T) -> (T, Vec<XmlProblem>) {
    init();

    let mut problems: Vec<XmlProblem> = Vec::new();
    unsafe {
        xmlSetStructuredErrorFunc(
            &mut problems as *mut Vec<XmlProblem> as *mut c_void,
            Some(capture_callback),
        );
    }
    let out = f();
    unsafe {
        xmlSetStructuredErrorFunc(std::ptr::null_mut(), None);
    }
    (out, problems)
}

/// Convert a C string owned by libxml2 into an owned Rust `String`.
///
/// Returns `None` for null pointers or non-UTF-8 content.
pub(crate) unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
}

/// A compiled XML Schema, shareable across threads.
///
/// The underlying pointer is freed exactly once when the last clone drops.
/// libxml2 schema structures are thread-safe for reading after parsing, so
/// concurrent validation against one `Schema` is permitted.
#[derive(Debug, Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

#[derive(Debug)]
struct SchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documents xmlSchema structures as thread-safe for reading.
// See: http://xmlsoft.org/threads.html
unsafe impl Send for SchemaInner {}
unsafe impl Sync for SchemaInner {}

impl Schema {
    /// Compile a schema from its source bytes.
    ///
    /// Schema *parsing* is not thread-safe in libxml2; callers compile once
    /// (typically before pool initialization) and share the result.
    pub fn parse(schema_data: &[u8]) -> LibXml2Result<Self> {
        init();

        let size =
            c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::SchemaParseFailed)?;

        let (ptr, _problems) = with_captured_problems(|| unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return std::ptr::null_mut();
            }

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);
            schema_ptr
        });

        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed);
        }

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    /// Validate a parsed document against this schema.
    ///
    /// Creates a fresh validation context per call, so this is safe to invoke
    /// concurrently from multiple threads. Returns the libxml2 result code
    /// (0 = valid, > 0 = invalid) plus the captured diagnostics.
    pub(crate) fn validate_doc(&self, doc: *mut XmlDoc) -> LibXml2Result<(i32, Vec<XmlProblem>)> {
        unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(self.inner.ptr);
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextFailed);
            }

            let mut problems: Vec<XmlProblem> = Vec::new();
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(capture_callback),
                &mut problems as *mut Vec<XmlProblem> as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, doc);
            xmlSchemaFreeValidCtxt(valid_ctxt);

            if code < 0 {
                return Err(LibXml2Error::Internal { code });
            }
            Ok((code, problems))
        }
    }
}

impl Drop for SchemaInner {
    fn drop(&mut self) {
        // The Arc guarantees this runs exactly once per compiled schema.
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

// ---------------------------------------------------------------------------
// External entity loader trampoline
//
// libxml2's entity loader is a single process-wide hook. It is installed once
// and dispatches through a thread-local to whichever resolver is active for
// the parse running on the current thread, falling back to the saved default
// loader otherwise.
// ---------------------------------------------------------------------------

static LOADER_INSTALL: Once = Once::new();
static DEFAULT_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

thread_local! {
    static ACTIVE_RESOLVER: RefCell<Option<Arc<dyn EntityResolver>>> = const { RefCell::new(None) };
    // Replacement text handed to libxml2 must outlive the input stream that
    // reads it, i.e. the whole parse. Cleared when the resolver scope ends.
    static RESOLVED_BUFFERS: RefCell<Vec<CString>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "C" fn entity_loader_trampoline(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let resolved = ACTIVE_RESOLVER.with(|slot| {
        let guard = slot.borrow();
        let resolver = guard.as_ref()?;
        let system_id = unsafe { cstr_to_string(url) }?;
        let public_id = unsafe { cstr_to_string(id) };
        resolver.resolve(public_id.as_deref(), &system_id)
    });

    if let Some(bytes) = resolved
        && let Ok(replacement) = CString::new(bytes)
    {
        return RESOLVED_BUFFERS.with(|buffers| {
            let mut buffers = buffers.borrow_mut();
            buffers.push(replacement);
            let ptr = buffers
                .last()
                .map(|b| b.as_ptr())
                .unwrap_or(std::ptr::null());
            unsafe { xmlNewStringInputStream(ctxt, ptr) }
        });
    }

    match DEFAULT_LOADER.get().copied().flatten() {
        Some(default_loader) => unsafe { default_loader(url, id, ctxt) },
        None => std::ptr::null_mut(),
    }
}

fn install_entity_loader() {
    LOADER_INSTALL.call_once(|| unsafe {
        let previous = xmlGetExternalEntityLoader();
        let _ = DEFAULT_LOADER.set(previous);
        xmlSetExternalEntityLoader(Some(entity_loader_trampoline));
    });
}

/// Activates an entity resolver for the current thread for the duration of a
/// parse. Dropping the scope deactivates the resolver and releases any
/// replacement buffers handed to libxml2.
pub(crate) struct ResolverScope {
    _private: (),
}

impl ResolverScope {
    pub(crate) fn activate(resolver: Option<Arc<dyn EntityResolver>>) -> Self {
        if resolver.is_some() {
            install_entity_loader();
        }
        ACTIVE_RESOLVER.with(|slot| *slot.borrow_mut() = resolver);
        ResolverScope { _private: () }
    }
}

impl Drop for ResolverScope {
    fn drop(&mut self) {
        ACTIVE_RESOLVER.with(|slot| *slot.borrow_mut() = None);
        RESOLVED_BUFFERS.with(|buffers| buffers.borrow_mut().clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    #[test]
    fn test_schema_parsing_success() {
        let schema = Schema::parse(SIMPLE_XSD.as_bytes());
        assert!(schema.is_ok());
    }

    #[test]
    fn test_schema_parsing_invalid_schema() {
        let result = Schema::parse(b"<invalid>not a schema</invalid>");
        match result {
            Err(LibXml2Error::SchemaParseFailed) => (),
            other => panic!("expected SchemaParseFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_parsing_empty_data() {
        assert!(Schema::parse(&[]).is_err());
    }

    #[test]
    fn test_schema_cloning_shares_pointer() {
        let schema = Schema::parse(SIMPLE_XSD.as_bytes()).unwrap();
        let cloned = schema.clone();
        assert_eq!(schema.inner.ptr, cloned.inner.ptr);
    }

    #[test]
    fn test_schema_drop_is_safe() {
        {
            let schema = Schema::parse(SIMPLE_XSD.as_bytes()).unwrap();
            drop(schema);
        }
        // A new schema can still be compiled afterwards.
        assert!(Schema::parse(SIMPLE_XSD.as_bytes()).is_ok());
    }

    #[test]
    fn test_capture_collects_parse_diagnostics() {
        init();
        let broken = b"<root><unclosed></root>";
        let (doc, problems) = with_captured_problems(|| unsafe {
            xmlReadMemory(
                broken.as_ptr() as *const c_char,
                broken.len() as c_int,
                std::ptr::null(),
                std::ptr::null(),
                0,
            )
        });
        assert!(doc.is_null());
        assert!(!problems.is_empty());
        assert!(problems.iter().any(|p| !p.is_warning()));
    }

    #[test]
    fn test_summarize_empty_and_joined() {
        assert_eq!(summarize(&[]), "no diagnostics reported");

        let problems = vec![
            XmlProblem {
                message: "first".to_string(),
                severity: XmlSeverity::Error,
            },
            XmlProblem {
                message: "second".to_string(),
                severity: XmlSeverity::Warning,
            },
        ];
        assert_eq!(summarize(&problems), "first; second");
    }

    #[test]
    fn test_concurrent_schema_access() {
        use rayon::prelude::*;

        let schema = Schema::parse(SIMPLE_XSD.as_bytes()).unwrap();

        let results: Vec<_> = (0..10)
            .into_par_iter()
            .map(|_| {
                let valid = b"<root>hello</root>";
                let (doc, _problems) = with_captured_problems(|| unsafe {
                    xmlReadMemory(
                        valid.as_ptr() as *const c_char,
                        valid.len() as c_int,
                        std::ptr::null(),
                        std::ptr::null(),
                        0,
                    )
                });
                assert!(!doc.is_null());
                let (code, _) = schema.validate_doc(doc).unwrap();
                unsafe { xmlFreeDoc(doc) };
                code
            })
            .collect();

        assert!(results.iter().all(|&code| code == 0));
    }
}
