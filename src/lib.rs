//! sluice: streaming template-matching XML transformations.
//!
//! A [`Transformer`] owns a compiled [`Sheet`] plus the settings of a run and
//! turns input documents into output documents. The input is parsed and
//! matched as it streams; only the ancestors of the current node are kept.
//!
//! ```no_run
//! use sluice::{Construct, GroupDef, TemplateDef, TransformDef, Transformer};
//!
//! let def = TransformDef::new(GroupDef::new().template(TemplateDef::new(
//!     "item",
//!     vec![Construct::value_of("."), Construct::text(";")],
//! )));
//! let out = Transformer::from_def(&def)?.transform_str("<list><item>a</item></list>")?;
//! assert!(out.ends_with("a;"));
//! # Ok::<(), sluice::TransformError>(())
//! ```

pub mod error;
pub mod job;

pub use error::TransformError;
pub use job::TransformJob;

pub use sluice_engine::{
    BuiltinFilters, Construct, ContentHandler, DefaultErrorHandler, DocumentResolver, ErrorHandler, FileResolver,
    Filter, FilterResolver, GroupConfig, GroupDef, GroupOptions, IDENTITY_METHOD, IdentityFilter, Kind,
    MemoryDocumentResolver, MemoryOutputResolver, OutputConfig, OutputEvent, OutputResolver, PassThrough,
    ProcedureDef, ProcessDef, Processor, ProcessorConfig, RecordingHandler, ResultHandler, SHEET_METHOD, Sheet,
    SheetFilter, StxError, TemplateDef, TransformDef, VariableDef, Visibility, XmlWriter, parse_str,
};
pub use sluice_path::PathError;
pub use sluice_types::{Location, Value};

use std::sync::Arc;

/// A compiled sheet with the configuration and parameters of a run.
///
/// Every `transform_*` call builds a fresh [`Processor`], so one transformer
/// can be reused for any number of documents.
#[derive(Debug, Clone)]
pub struct Transformer {
    sheet: Arc<Sheet>,
    config: ProcessorConfig,
    parameters: Vec<(String, Value)>,
}

impl Transformer {
    pub fn new(sheet: Arc<Sheet>) -> Self {
        Self {
            sheet,
            config: ProcessorConfig::default(),
            parameters: Vec::new(),
        }
    }

    pub fn from_def(def: &TransformDef) -> Result<Self, TransformError> {
        Ok(Self::new(Arc::new(Sheet::compile(def)?)))
    }

    /// Compiles a sheet described as JSON.
    pub fn from_json(json: &str) -> Result<Self, TransformError> {
        Self::from_def(&TransformDef::from_json(json)?)
    }

    pub fn from_job(job: &TransformJob) -> Result<Self, TransformError> {
        let mut transformer = Self::from_def(&job.sheet)?.with_config(job.config.clone());
        transformer.parameters = job.parameter_values()?;
        Ok(transformer)
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.push((name.to_string(), value.into()));
        self
    }

    pub fn sheet(&self) -> &Arc<Sheet> {
        &self.sheet
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Output settings in effect: the sheet's own, else the configured ones.
    pub fn output_config(&self) -> OutputConfig {
        self.sheet.output().cloned().unwrap_or_else(|| self.config.output.clone())
    }

    /// A processor ready to receive a document, for callers that need to
    /// install their own resolvers or drive the input themselves.
    pub fn processor<H: ResultHandler>(&self, handler: H) -> Result<Processor<H>, TransformError> {
        let mut processor = Processor::new(self.sheet.clone(), self.config.clone(), handler);
        for (name, value) in &self.parameters {
            processor.set_parameter(name, value.clone())?;
        }
        Ok(processor)
    }

    /// Transforms `xml` and serializes the result.
    pub fn transform_str(&self, xml: &str) -> Result<String, TransformError> {
        let writer = XmlWriter::in_memory(&self.output_config());
        let writer = self.transform_to(xml, writer)?;
        Ok(writer.into_string()?)
    }

    /// Transforms `xml` into `handler` and hands it back once the document
    /// has ended.
    pub fn transform_to<H: ResultHandler>(&self, xml: &str, handler: H) -> Result<H, TransformError> {
        let mut processor = self.processor(handler)?;
        log::debug!(
            "transforming {} bytes with {} templates",
            xml.len(),
            self.sheet.template_count()
        );
        parse_str(xml, &mut processor)?;
        for message in processor.messages() {
            log::debug!("message: {}", message);
        }
        Ok(processor.into_handler())
    }
}
