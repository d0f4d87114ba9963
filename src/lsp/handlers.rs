use tower_lsp::lsp_types::*;

use crate::lsp::backend::Backend;
use crate::validation::{Diagnostic as ValidationDiagnostic, Severity};

/// Source name attached to published diagnostics
pub const DIAGNOSTIC_SOURCE: &str = "liquid-ls";

/// Trait for handling diagnostics
#[tower_lsp::async_trait]
pub trait HandleDiagnostics {
    async fn publish_diagnostics(&self, uri: Url);
}

#[tower_lsp::async_trait]
impl HandleDiagnostics for Backend {
    /// Validate the stored document and publish the result
    async fn publish_diagnostics(&self, uri: Url) {
        let Some(state) = self.documents.lock().await.get(&uri).cloned() else {
            return;
        };

        // Store lookups may block, keep them off the protocol tasks
        let validator = self.validator.clone();
        let content = state.content.clone();
        let result =
            tokio::task::spawn_blocking(move || validator.validate_detailed(&content)).await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                log::error!("Validation task failed for {}: {}", uri, e);
                self.client
                    .log_message(MessageType::ERROR, format!("Validation failed: {}", e))
                    .await;
                return;
            }
        };

        let diagnostics = result
            .diagnostics
            .iter()
            .map(|diagnostic| create_lsp_diagnostic(diagnostic, &state.content))
            .collect();

        self.client
            .publish_diagnostics(uri, diagnostics, Some(state.version))
            .await;
    }
}

/// Convert a validation diagnostic; whole-template findings go on the first line
pub fn create_lsp_diagnostic(diagnostic: &ValidationDiagnostic, content: &str) -> Diagnostic {
    let severity = match diagnostic.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
    };

    let line = diagnostic.line.map_or(0, |line| line.saturating_sub(1));
    let width = content
        .lines()
        .nth(line)
        .map_or(0, |text| text.encode_utf16().count());

    Diagnostic::new(
        Range::new(
            Position::new(line as u32, 0),
            Position::new(line as u32, width as u32),
        ),
        Some(severity),
        None,
        Some(DIAGNOSTIC_SOURCE.to_string()),
        diagnostic.message.clone(),
        None,
        None,
    )
}
