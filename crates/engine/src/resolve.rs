//! Pluggable access to external documents and secondary result documents.

use crate::config::OutputConfig;
use crate::error::StxError;
use crate::output::ResultHandler;
use crate::writer::XmlWriter;
use sluice_types::{Attribute, Location, NamespaceDecl, QualifiedName};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Fetches the text of documents named by `process-document`.
pub trait DocumentResolver {
    fn resolve(&mut self, href: &str, base: Option<&str>) -> Result<String, StxError>;
}

/// Reads documents from the file system, relative to the base URI if one is
/// given.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileResolver;

impl FileResolver {
    fn path(href: &str, base: Option<&str>) -> PathBuf {
        let href = href.strip_prefix("file://").unwrap_or(href);
        let href_path = Path::new(href);
        match base {
            Some(base) if href_path.is_relative() => {
                let base = base.strip_prefix("file://").unwrap_or(base);
                if base.ends_with('/') {
                    Path::new(base).join(href_path)
                } else {
                    Path::new(base).parent().unwrap_or(Path::new("")).join(href_path)
                }
            }
            _ => href_path.to_path_buf(),
        }
    }
}

impl DocumentResolver for FileResolver {
    fn resolve(&mut self, href: &str, base: Option<&str>) -> Result<String, StxError> {
        let path = Self::path(href, base);
        log::debug!("reading document {}", path.display());
        std::fs::read_to_string(&path).map_err(|source| StxError::Io {
            href: href.to_string(),
            source,
            location: Location::default(),
        })
    }
}

/// Serves documents registered in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryDocumentResolver {
    documents: HashMap<String, String>,
}

impl MemoryDocumentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, href: impl Into<String>, xml: impl Into<String>) {
        self.documents.insert(href.into(), xml.into());
    }
}

impl DocumentResolver for MemoryDocumentResolver {
    fn resolve(&mut self, href: &str, _base: Option<&str>) -> Result<String, StxError> {
        self.documents.get(href).cloned().ok_or_else(|| StxError::Io {
            href: href.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such document"),
            location: Location::default(),
        })
    }
}

/// Opens the handlers that receive `result-document` output.
pub trait OutputResolver {
    fn open(&mut self, href: &str) -> Result<Box<dyn ResultHandler>, StxError>;

    /// Called after the document has received `end_document`.
    fn close(&mut self, _href: &str, _handler: Box<dyn ResultHandler>) -> Result<(), StxError> {
        Ok(())
    }
}

/// Serializes result documents into strings kept by href. Clones share the
/// same store, so a caller can keep one to read the results.
#[derive(Debug, Default, Clone)]
pub struct MemoryOutputResolver {
    documents: Rc<RefCell<BTreeMap<String, String>>>,
    config: OutputConfig,
}

impl MemoryOutputResolver {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            documents: Rc::default(),
            config,
        }
    }

    pub fn document(&self, href: &str) -> Option<String> {
        self.documents.borrow().get(href).cloned()
    }

    pub fn hrefs(&self) -> Vec<String> {
        self.documents.borrow().keys().cloned().collect()
    }
}

impl OutputResolver for MemoryOutputResolver {
    fn open(&mut self, href: &str) -> Result<Box<dyn ResultHandler>, StxError> {
        Ok(Box::new(MemoryDocument {
            href: href.to_string(),
            writer: XmlWriter::in_memory(&self.config),
            store: Rc::clone(&self.documents),
        }))
    }
}

struct MemoryDocument {
    href: String,
    writer: XmlWriter<Vec<u8>>,
    store: Rc<RefCell<BTreeMap<String, String>>>,
}

impl ResultHandler for MemoryDocument {
    fn start_document(&mut self) -> Result<(), StxError> {
        self.writer.start_document()
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.writer.end_document()?;
        let text = String::from_utf8_lossy(self.writer.get_ref()).into_owned();
        self.store.borrow_mut().insert(self.href.clone(), text);
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QualifiedName,
        attributes: &[Attribute],
        namespaces: &[NamespaceDecl],
    ) -> Result<(), StxError> {
        self.writer.start_element(name, attributes, namespaces)
    }

    fn end_element(&mut self, name: &QualifiedName) -> Result<(), StxError> {
        self.writer.end_element(name)
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.writer.characters(text)
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.writer.start_cdata()
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.writer.end_cdata()
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.writer.comment(text)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.writer.processing_instruction(target, data)
    }
}
