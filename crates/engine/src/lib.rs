//! Streaming template-matching transformation engine.
//!
//! A transformation sheet is described by a [`TransformDef`] and compiled
//! into an immutable [`Sheet`] of template groups and flat instruction
//! bodies. A [`Processor`] then runs the sheet against one document at a
//! time: the input arrives as [`ContentHandler`] calls and the result leaves
//! through a [`ResultHandler`], without either document being held in
//! memory.

pub mod compiler;
pub mod config;
pub mod def;
pub mod emitter;
pub mod error;
pub mod filter;
pub mod group;
pub mod input;
pub mod instr;
pub mod output;
pub mod processor;
pub mod resolve;
pub mod sheet;
pub mod writer;

pub use config::{GroupConfig, GroupOptions, OutputConfig, PassThrough, ProcessorConfig};
pub use def::{Construct, GroupDef, Kind, ProcedureDef, ProcessDef, TemplateDef, TransformDef, VariableDef, Visibility};
pub use error::{DefaultErrorHandler, ErrorHandler, StxError};
pub use filter::{BuiltinFilters, Filter, FilterResolver, IDENTITY_METHOD, IdentityFilter, SHEET_METHOD, SheetFilter};
pub use input::{ContentHandler, Replayer, parse_str, replay};
pub use output::{OutputEvent, RecordingHandler, ResultHandler};
pub use processor::Processor;
pub use resolve::{DocumentResolver, FileResolver, MemoryDocumentResolver, MemoryOutputResolver, OutputResolver};
pub use sheet::Sheet;
pub use writer::XmlWriter;
