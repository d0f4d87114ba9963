//! Domain Rule Checker
//!
//! Conventions of the FHIR converter templates: custom tags, the
//! `resourceType` marker and the pairing of `{% evaluate %}` with an
//! `{% include %}` that brings the evaluated resource into the bundle.

use crate::patterns::{
    ANY_EVALUATE, ANY_INCLUDE, EVALUATE_CALL, FHIR_CUSTOM_TAGS, is_id_only_evaluation,
};
use crate::validation::engine::ValidationContext;

/// Lines searched on each side of an `evaluate`
const INCLUDE_WINDOW: usize = 20;

pub fn validate_fhir_specific(ctx: &mut ValidationContext<'_>) {
    let found: Vec<&str> = FHIR_CUSTOM_TAGS
        .iter()
        .copied()
        .filter(|tag| ctx.text.contains(&format!("{{% {}", tag)))
        .collect();
    if !found.is_empty() {
        ctx.warning(
            None,
            format!(
                "FHIR Converter custom tags detected: {} (standard Liquid validation may not apply)",
                found.join(", ")
            ),
        );
    }

    // Quoted or bare, the bare form covers both quoted ones
    if !ctx.text.contains("resourceType") {
        ctx.warning(
            None,
            "FHIR 'resourceType' field not found in template".to_string(),
        );
    }
}

pub fn validate_fhir_dependencies(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    if ANY_EVALUATE.is_match(ctx.text) && !ANY_INCLUDE.is_match(ctx.text) {
        // Templates that only evaluate identifiers have nothing to include
        let id_only = lines
            .iter()
            .filter(|line| ANY_EVALUATE.is_match(line))
            .all(|line| is_id_only_evaluation(line));
        if !id_only {
            ctx.error(
                None,
                "FHIR validation failed: Templates using '{% evaluate %}' must contain '{% include %}' tags."
                    .to_string(),
            );
            return;
        }
    }

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = EVALUATE_CALL.captures(line) else {
            continue;
        };
        if is_id_only_evaluation(line) {
            continue;
        }

        let line_number = idx + 1;
        let variable = &caps[1];
        let resource = &caps[2];

        let start = idx.saturating_sub(INCLUDE_WINDOW);
        let end = (idx + INCLUDE_WINDOW + 1).min(lines.len());
        let found_include = (start..end)
            .filter(|&i| i != idx)
            .map(|i| lines[i].trim())
            .filter(|candidate| !candidate.is_empty() && !candidate.contains("comment"))
            .any(|candidate| ANY_INCLUDE.is_match(candidate));

        if !found_include {
            ctx.warning(
                Some(line_number),
                format!(
                    "Line {}: Evaluated variable '{}' (resource: '{}') has no corresponding '{{% include %}}' statement within {} lines. Verify this resource is included in the Bundle output.",
                    line_number, variable, resource, INCLUDE_WINDOW
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::engine::{SourceText, ValidationResult, ValidatorOptions};

    fn run(pass: fn(&mut ValidationContext<'_>), text: &str) -> ValidationResult {
        let options = ValidatorOptions::default();
        let source = SourceText::new(text);
        let mut ctx = ValidationContext::new(&source, &options);
        pass(&mut ctx);
        ctx.result
    }

    fn messages(result: &ValidationResult) -> Vec<String> {
        result.diagnostics.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_custom_tags_and_resource_type() {
        let result = run(
            validate_fhir_specific,
            "{% mergeDiff a %}{% evaluate b using 'X' %}\"resourceType\": \"Patient\"",
        );
        assert_eq!(
            messages(&result),
            vec!["FHIR Converter custom tags detected: evaluate, mergeDiff (standard Liquid validation may not apply)"]
        );
    }

    #[test]
    fn test_missing_resource_type_is_warning() {
        let result = run(validate_fhir_specific, "{{ a }}");
        assert!(result.is_valid());
        assert_eq!(
            messages(&result),
            vec!["FHIR 'resourceType' field not found in template"]
        );
    }

    #[test]
    fn test_evaluate_without_include_is_error() {
        let result = run(validate_fhir_dependencies, r#"{% evaluate x using "Patient" %}"#);
        assert_eq!(
            messages(&result),
            vec!["FHIR validation failed: Templates using '{% evaluate %}' must contain '{% include %}' tags."]
        );
    }

    #[test]
    fn test_id_only_evaluations_need_no_include() {
        let text = r#"{% evaluate bundleId using 'ID/Bundle' Data: msg -%}
{% evaluate encounterId using 'ID/Encounter' -%}"#;
        assert!(run(validate_fhir_dependencies, text).diagnostics.is_empty());
    }

    fn evaluate_with_include_after(gap: usize) -> String {
        let mut text = String::from("{% evaluate patientId using 'ID/Patient' %}\n");
        for _ in 1..gap {
            text.push_str("{{ x }}\n");
        }
        text.push_str("{% include 'Resource/Patient' %}\n");
        text
    }

    #[test]
    fn test_include_at_window_edge() {
        let text = evaluate_with_include_after(INCLUDE_WINDOW);
        assert_eq!(text.lines().count(), INCLUDE_WINDOW + 1);
        assert!(run(validate_fhir_dependencies, &text).diagnostics.is_empty());
    }

    #[test]
    fn test_include_just_past_window() {
        let text = evaluate_with_include_after(INCLUDE_WINDOW + 1);
        let result = run(validate_fhir_dependencies, &text);
        assert!(result.is_valid());
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_include_before_window_edge() {
        let mut text = String::from("{% include 'Resource/Patient' %}\n");
        for _ in 1..INCLUDE_WINDOW {
            text.push_str("{{ x }}\n");
        }
        text.push_str("{% evaluate patientId using 'ID/Patient' %}\n");
        assert!(run(validate_fhir_dependencies, &text).diagnostics.is_empty());
    }

    #[test]
    fn test_distant_include_is_warning() {
        let mut text = String::from("{% evaluate patientId using 'ID/Patient' %}\n");
        for _ in 0..25 {
            text.push_str("{{ x }}\n");
        }
        text.push_str("{% include 'Resource/Patient' %}\n");

        let result = run(validate_fhir_dependencies, &text);
        assert!(result.is_valid());
        assert_eq!(
            messages(&result),
            vec!["Line 1: Evaluated variable 'patientId' (resource: 'ID/Patient') has no corresponding '{% include %}' statement within 20 lines. Verify this resource is included in the Bundle output."]
        );
    }

    #[test]
    fn test_commented_include_does_not_count() {
        let text = "{% include 'A' %}\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n\n{% evaluate y using 'Z' %}\n{% comment %}{% include 'Z' %}{% endcomment %}";
        let result = run(validate_fhir_dependencies, text);
        assert_eq!(result.warnings().count(), 1);
    }
}
