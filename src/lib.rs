//! Liquid Template Validator
//!
//! Static validation of Liquid templates used by the FHIR converter.
//!
//! This library provides:
//! - A multi-pass validator producing line-numbered errors and warnings
//! - Include resolution against a pluggable template store
//! - Configuration, file watching and an LSP surface for the binaries

pub mod config;
pub mod lsp;
pub mod patterns;
pub mod storage;
pub mod validation;
pub mod watch;

pub use config::Config;
pub use storage::{DirectoryStore, MemoryStore, SourceType, TemplateStore, storage_key};
pub use validation::{
    Diagnostic, Severity, ValidationReport, ValidationResult, Validator, ValidatorOptions,
    validate_template,
};
