//! Template validation passes and the engine that runs them

pub mod checks;
pub mod engine;
pub mod expressions;
pub mod fhir;
pub mod includes;
pub mod structure;

pub use engine::{
    Diagnostic, Severity, SourceText, ValidationContext, ValidationReport, ValidationResult,
    Validator, ValidatorOptions, validate_template,
};
