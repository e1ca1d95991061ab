//! Owned DOM documents produced by the pool's builders.

use std::ffi::CString;
use std::marker::PhantomData;

use libc::{c_char, c_int, c_void};

use crate::error::{LibXml2Error, PoolError, Result};
use crate::libxml2::{
    self, XML_COMMENT_NODE, XML_ELEMENT_NODE, XmlDoc, XmlNode, xmlDocDumpMemory,
    xmlDocGetRootElement, xmlDocSetRootElement, xmlFree, xmlFreeDoc, xmlFreeNode, xmlNewDoc,
    xmlNewNode, xmlNodeGetContent, xmlUnlinkNode,
};

/// An owned XML document.
///
/// Wraps a libxml2 document pointer and frees it on drop. A `Document` is
/// exclusively owned by one caller at a time and may be moved across threads.
#[derive(Debug)]
pub struct Document {
    raw: *mut XmlDoc,
}

// Safety: a Document has exclusive ownership of its pointer; libxml2 documents
// may be used from any thread as long as only one thread touches them at a time.
unsafe impl Send for Document {}

impl Document {
    /// Wrap a raw document pointer.
    ///
    /// # Safety
    ///
    /// `raw` must be non-null, allocated by libxml2, and not freed elsewhere.
    pub(crate) unsafe fn from_raw(raw: *mut XmlDoc) -> Self {
        debug_assert!(!raw.is_null());
        Document { raw }
    }

    /// Create an empty document with no root element.
    pub(crate) fn new_empty() -> Result<Self> {
        libxml2::init();
        let version = CString::new("1.0").expect("static version string");
        let raw = unsafe { xmlNewDoc(version.as_ptr()) };
        if raw.is_null() {
            return Err(LibXml2Error::MemoryAllocation.into());
        }
        Ok(Document { raw })
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.raw
    }

    /// The document's root element, if one exists.
    pub fn root_element(&self) -> Option<Element<'_>> {
        let node = unsafe { xmlDocGetRootElement(self.raw) };
        if node.is_null() {
            None
        } else {
            Some(Element {
                node,
                _doc: PhantomData,
            })
        }
    }

    /// Install a root element with the given name, replacing any existing root.
    ///
    /// Primarily useful on documents created via the pool's `new_document`,
    /// which start out empty.
    pub fn set_root_element(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(PoolError::InvalidArgument {
                details: "root element name must be non-empty".to_string(),
            });
        }
        let c_name = CString::new(name).map_err(|_| PoolError::InvalidArgument {
            details: "root element name must not contain NUL bytes".to_string(),
        })?;

        unsafe {
            let node = xmlNewNode(std::ptr::null_mut(), c_name.as_ptr());
            if node.is_null() {
                return Err(LibXml2Error::MemoryAllocation.into());
            }
            let old_root = xmlDocSetRootElement(self.raw, node);
            if !old_root.is_null() {
                xmlUnlinkNode(old_root);
                xmlFreeNode(old_root);
            }
        }
        Ok(())
    }

    /// Serialize the document to a UTF-8 string, XML declaration included.
    pub fn serialize(&self) -> Result<String> {
        let mut mem: *mut c_char = std::ptr::null_mut();
        let mut size: c_int = 0;

        unsafe {
            xmlDocDumpMemory(self.raw, &mut mem, &mut size);
        }
        if mem.is_null() {
            return Err(LibXml2Error::SerializationFailed.into());
        }

        let bytes =
            unsafe { std::slice::from_raw_parts(mem as *const u8, size as usize) }.to_vec();
        unsafe {
            (xmlFree)(mem as *mut c_void);
        }

        String::from_utf8(bytes).map_err(|_| LibXml2Error::SerializationFailed.into())
    }

    /// Remove every comment node from the tree, including comments in the
    /// prolog and epilog. The document struct shares the common node header
    /// layout, so it can be walked like any other node.
    pub(crate) fn strip_comments(&mut self) {
        unsafe { strip_comments_below(self.raw as *mut XmlNode) };
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe {
                xmlFreeDoc(self.raw);
            }
            self.raw = std::ptr::null_mut();
        }
    }
}

/// Unlink and free comment nodes in the subtree below `node`.
unsafe fn strip_comments_below(node: *mut XmlNode) {
    let mut child = unsafe { (*node).children };
    while !child.is_null() {
        let next = unsafe { (*child).next };
        if unsafe { (*child).node_type } == XML_COMMENT_NODE {
            unsafe {
                xmlUnlinkNode(child);
                xmlFreeNode(child);
            }
        } else {
            unsafe { strip_comments_below(child) };
        }
        child = next;
    }
}

/// A borrowed view of one element node within a [`Document`].
#[derive(Clone, Copy)]
pub struct Element<'doc> {
    node: *const XmlNode,
    _doc: PhantomData<&'doc Document>,
}

impl<'doc> Element<'doc> {
    /// The element's local name (no namespace prefix).
    pub fn local_name(&self) -> String {
        unsafe { libxml2::cstr_to_string((*self.node).name) }.unwrap_or_default()
    }

    /// The namespace URI the element is bound to, if any.
    pub fn namespace_uri(&self) -> Option<String> {
        unsafe {
            let ns = (*self.node).ns;
            if ns.is_null() {
                return None;
            }
            libxml2::cstr_to_string((*ns).href)
        }
    }

    /// Direct child elements, in document order. Text, comments, and
    /// processing instructions are skipped.
    pub fn child_elements(&self) -> Vec<Element<'doc>> {
        let mut out = Vec::new();
        let mut child = unsafe { (*self.node).children };
        while !child.is_null() {
            if unsafe { (*child).node_type } == XML_ELEMENT_NODE {
                out.push(Element {
                    node: child,
                    _doc: PhantomData,
                });
            }
            child = unsafe { (*child).next };
        }
        out
    }

    /// Number of direct child elements.
    pub fn child_element_count(&self) -> usize {
        self.child_elements().len()
    }

    /// Concatenated text content of the element and its descendants.
    pub fn text_content(&self) -> String {
        unsafe {
            let content = xmlNodeGetContent(self.node);
            if content.is_null() {
                return String::new();
            }
            let text = libxml2::cstr_to_string(content).unwrap_or_default();
            (xmlFree)(content as *mut c_void);
            text
        }
    }
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("local_name", &self.local_name())
            .field("namespace_uri", &self.namespace_uri())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_has_no_root() {
        let doc = Document::new_empty().unwrap();
        assert!(doc.root_element().is_none());
    }

    #[test]
    fn test_set_root_element() {
        let mut doc = Document::new_empty().unwrap();
        doc.set_root_element("placeholder").unwrap();

        let root = doc.root_element().expect("root should exist");
        assert_eq!(root.local_name(), "placeholder");
        assert!(root.namespace_uri().is_none());
        assert_eq!(root.child_element_count(), 0);
    }

    #[test]
    fn test_set_root_element_rejects_empty_name() {
        let mut doc = Document::new_empty().unwrap();
        match doc.set_root_element("") {
            Err(PoolError::InvalidArgument { .. }) => (),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn test_set_root_element_replaces_existing_root() {
        let mut doc = Document::new_empty().unwrap();
        doc.set_root_element("first").unwrap();
        doc.set_root_element("second").unwrap();

        assert_eq!(doc.root_element().unwrap().local_name(), "second");
    }

    #[test]
    fn test_serialize_contains_declaration_and_root() {
        let mut doc = Document::new_empty().unwrap();
        doc.set_root_element("doc").unwrap();

        let xml = doc.serialize().unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<doc/>") || xml.contains("<doc></doc>"));
    }
}
