//! Validation Engine
//!
//! Runs every pass over a template in a fixed priority order and collects
//! what they find. Passes never stop the pipeline; each one appends to the
//! per-call [`ValidationContext`] and the engine turns the result into a
//! [`ValidationReport`].

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::storage::TemplateStore;
use crate::validation::{checks, expressions, fhir, includes, structure};

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A diagnostic message for a validation issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// 1-based line, when the issue belongs to one
    pub line: Option<usize>,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Diagnostics of one validation run, in discovery order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    pub fn add_error(&mut self, line: Option<usize>, message: String) {
        self.diagnostics.push(Diagnostic {
            line,
            message,
            severity: Severity::Error,
        });
    }

    pub fn add_warning(&mut self, line: Option<usize>, message: String) {
        self.diagnostics.push(Diagnostic {
            line,
            message,
            severity: Severity::Warning,
        });
    }

    pub fn is_valid(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

/// Final verdict handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// One-line verdict
    pub fn summary(&self) -> String {
        match (self.valid, self.warnings.len()) {
            (true, 0) => "Template syntax is valid".to_string(),
            (true, n) => format!("Template syntax is valid (with {} warning(s))", n),
            (false, _) => "Template validation failed".to_string(),
        }
    }

    /// Errors followed by warnings, the latter prefixed with `Warning: `
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .cloned()
            .chain(self.warnings.iter().map(|w| format!("Warning: {}", w)))
            .collect()
    }
}

impl From<&ValidationResult> for ValidationReport {
    fn from(result: &ValidationResult) -> Self {
        let errors: Vec<String> = result.errors().map(|d| d.message.clone()).collect();
        let warnings = result.warnings().map(|d| d.message.clone()).collect();
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Validator configuration
#[derive(Clone)]
pub struct ValidatorOptions {
    /// Variable roots that may be referenced; empty disables the check
    pub allowed_variables: BTreeSet<String>,
    /// Variables the template must assign or output
    pub required_variables: BTreeSet<String>,
    /// Run the FHIR converter rules
    pub fhir_validation: bool,
    /// Include-existence capability
    pub store: Option<Arc<dyn TemplateStore>>,
    /// Storage namespace (source type) include paths resolve under
    pub namespace: Option<String>,
    /// Report unknown filters and undefined variables as errors
    pub strict: bool,
    /// Follow includes through the store up to this depth; `None` keeps the graph one level deep
    pub include_depth: Option<usize>,
    /// Budget for all include existence checks of one run
    pub include_timeout: Option<Duration>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            allowed_variables: BTreeSet::new(),
            required_variables: BTreeSet::new(),
            fhir_validation: true,
            store: None,
            namespace: None,
            strict: false,
            include_depth: None,
            include_timeout: None,
        }
    }
}

impl fmt::Debug for ValidatorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorOptions")
            .field("allowed_variables", &self.allowed_variables)
            .field("required_variables", &self.required_variables)
            .field("fhir_validation", &self.fhir_validation)
            .field("store", &self.store.as_ref().map(|_| "<store>"))
            .field("namespace", &self.namespace)
            .field("strict", &self.strict)
            .field("include_depth", &self.include_depth)
            .field("include_timeout", &self.include_timeout)
            .finish()
    }
}

impl ValidatorOptions {
    pub fn with_store(mut self, store: impl TemplateStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_allowed_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_variables = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Template text with its line table, built once per run
#[derive(Debug)]
pub struct SourceText<'a> {
    pub text: &'a str,
    pub lines: Vec<&'a str>,
    /// Byte offset each line starts at
    line_starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    pub fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            text,
            lines: text.lines().collect(),
            line_starts,
        }
    }

    /// 1-based line of a byte offset
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }
}

/// Per-call state shared by the passes
pub struct ValidationContext<'a> {
    pub text: &'a str,
    pub lines: &'a [&'a str],
    pub options: &'a ValidatorOptions,
    pub result: ValidationResult,
    /// Set when the input bytes were not valid UTF-8
    pub decode_error: Option<String>,
    source: &'a SourceText<'a>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(source: &'a SourceText<'a>, options: &'a ValidatorOptions) -> Self {
        Self {
            text: source.text,
            lines: &source.lines,
            options,
            result: ValidationResult::new(),
            decode_error: None,
            source,
        }
    }

    /// 1-based line of a byte offset into `text`
    pub fn line_of(&self, offset: usize) -> usize {
        self.source.line_of(offset)
    }

    pub fn error(&mut self, line: Option<usize>, message: String) {
        self.result.add_error(line, message);
    }

    pub fn warning(&mut self, line: Option<usize>, message: String) {
        self.result.add_warning(line, message);
    }

    /// A finding that depends on renderer context: warning unless strict
    pub fn advisory(&mut self, line: Option<usize>, message: String) {
        if self.options.strict {
            self.result.add_error(line, message);
        } else {
            self.result.add_warning(line, message);
        }
    }
}

type Pass = fn(&mut ValidationContext<'_>);

/// Passes in priority order: critical, high, medium
const PASSES: &[(&str, Pass)] = &[
    ("encoding", checks::validate_encoding),
    ("size", checks::validate_template_size),
    ("empty", checks::validate_empty_content),
    ("syntax", checks::validate_syntax),
    ("tags", structure::validate_tags),
    ("tag keywords", structure::validate_tag_keywords),
    ("variables", expressions::validate_variables),
    ("security", checks::validate_security),
    ("filters", expressions::validate_filters),
    ("expressions", expressions::validate_expressions),
    ("control flow", structure::validate_control_flow),
    ("objects", expressions::validate_objects),
    ("strings", expressions::validate_strings),
    ("comments", structure::validate_comments),
    ("whitespace control", checks::validate_whitespace_control),
    ("includes", includes::validate_includes),
    ("assignments", expressions::validate_assignments),
    ("output", expressions::validate_output),
    ("performance", checks::validate_performance),
];

/// Gated behind `fhir_validation`
const FHIR_PASSES: &[(&str, Pass)] = &[
    ("fhir", fhir::validate_fhir_specific),
    ("fhir dependencies", fhir::validate_fhir_dependencies),
];

/// Liquid template validator
#[derive(Debug, Clone, Default)]
pub struct Validator {
    options: ValidatorOptions,
}

impl Validator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    /// Validate a template and return the verdict
    pub fn validate(&self, text: &str) -> ValidationReport {
        ValidationReport::from(&self.validate_detailed(text))
    }

    /// Validate raw bytes; invalid UTF-8 is reported and the rest runs on the lossy text
    pub fn validate_bytes(&self, bytes: &[u8]) -> ValidationReport {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.validate(text),
            Err(e) => {
                let text = String::from_utf8_lossy(bytes);
                let result = self.guarded_run(&text, Some(format!("UTF-8 encoding error: {}", e)));
                ValidationReport::from(&result)
            }
        }
    }

    /// Validate a template, keeping line numbers and severities
    pub fn validate_detailed(&self, text: &str) -> ValidationResult {
        self.guarded_run(text, None)
    }

    fn guarded_run(&self, text: &str, decode_error: Option<String>) -> ValidationResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run(text, decode_error))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Validation aborted: {}", reason);

                let mut result = ValidationResult::new();
                result.add_error(None, format!("Validation error: internal failure: {}", reason));
                result
            }
        }
    }

    fn run(&self, text: &str, decode_error: Option<String>) -> ValidationResult {
        let source = SourceText::new(text);
        let mut ctx = ValidationContext::new(&source, &self.options);
        ctx.decode_error = decode_error;

        let fhir_passes = if self.options.fhir_validation {
            FHIR_PASSES
        } else {
            &[]
        };

        for (name, pass) in PASSES.iter().chain(fhir_passes) {
            let before = ctx.result.diagnostics.len();
            pass(&mut ctx);
            log::debug!(
                "{} pass: {} diagnostic(s)",
                name,
                ctx.result.diagnostics.len() - before
            );
        }

        log::info!(
            "Validated template ({} bytes): {} error(s), {} warning(s)",
            text.len(),
            ctx.result.errors().count(),
            ctx.result.warnings().count()
        );

        ctx.result
    }
}

/// Validate a template with the given options
pub fn validate_template(text: &str, options: &ValidatorOptions) -> ValidationReport {
    Validator::new(options.clone()).validate(text)
}
