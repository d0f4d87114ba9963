//! Expression / Variable Analyzer
//!
//! Variable references, assignments, filter calls, conditions and output
//! tags. Errors are kept for constructs that are malformed on their own;
//! anything that depends on what the renderer defines at runtime is a
//! warning (or an error in strict mode).

use std::collections::BTreeSet;

use crate::patterns::{
    ARRAY_INDEX, ASSIGN, ASSIGNMENT_IN_CONDITION, CONDITION, DOUBLE_DOT, EMPTY_PROPERTY, FILTER,
    IDENTIFIER, INVALID_OPERATOR, OUTPUT_EMPTY, VARIABLE, is_known_filter, is_reserved_keyword,
};
use crate::validation::engine::ValidationContext;

/// Root identifier of a variable path: indices removed, text before the first `.`
fn variable_root(path: &str) -> String {
    let clean = ARRAY_INDEX.replace_all(path, "");
    clean.split('.').next().unwrap_or_default().to_string()
}

pub fn validate_variables(ctx: &mut ValidationContext<'_>) {
    let text = ctx.text;
    let options = ctx.options;
    let assigned: BTreeSet<&str> = ASSIGN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let references: Vec<(usize, &str)> = VARIABLE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| (ctx.line_of(m.start()), m.as_str()))
        .collect();

    for (line, path) in &references {
        let root = variable_root(path);

        if !IDENTIFIER.is_match(&root) {
            ctx.error(Some(*line), format!("Invalid variable name: '{}'", root));
        }

        let allowed = &options.allowed_variables;
        if !allowed.is_empty()
            && !allowed.contains(&root)
            && !assigned.contains(root.as_str())
            && !is_reserved_keyword(&root)
        {
            ctx.advisory(
                Some(*line),
                format!("Undefined variable reference: '{{{{ {} }}}}'", path),
            );
        }
    }

    // Matched against whole references, so `patient.name` does not satisfy `patient`
    let missing: Vec<&str> = options
        .required_variables
        .iter()
        .map(String::as_str)
        .filter(|name| !assigned.contains(name) && !references.iter().any(|(_, r)| r == name))
        .collect();
    if !missing.is_empty() {
        ctx.error(
            None,
            format!("Missing required variables: {}", missing.join(", ")),
        );
    }
}

pub fn validate_filters(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        for caps in FILTER.captures_iter(line) {
            let name = &caps[1];
            if !is_known_filter(name) {
                ctx.advisory(
                    Some(line_number),
                    format!(
                        "Unknown filter '{}' at line {} (may be a FHIR Converter custom filter)",
                        name, line_number
                    ),
                );
            }

            if let Some(params) = caps.get(2) {
                let quotes = params
                    .as_str()
                    .chars()
                    .filter(|c| *c == '"' || *c == '\'')
                    .count();
                if quotes % 2 != 0 {
                    ctx.error(
                        Some(line_number),
                        format!(
                            "Unmatched quotes in filter parameters at line {}: {}",
                            line_number,
                            params.as_str()
                        ),
                    );
                }
            }
        }
    }
}

pub fn validate_expressions(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        // Only the first condition on a line is inspected
        let Some(caps) = CONDITION.captures(line) else {
            continue;
        };
        let expression = &caps[1];

        let invalid: Vec<&str> = INVALID_OPERATOR
            .find_iter(expression)
            .map(|m| m.as_str())
            .collect();
        if !invalid.is_empty() {
            ctx.error(
                Some(line_number),
                format!(
                    "Invalid operator at line {}: ['{}']",
                    line_number,
                    invalid.join("', '")
                ),
            );
        }

        if ASSIGNMENT_IN_CONDITION.is_match(expression) && !expression.contains("==") {
            ctx.warning(
                Some(line_number),
                format!("Possible assignment in condition at line {}", line_number),
            );
        }
    }
}

pub fn validate_assignments(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        for caps in ASSIGN.captures_iter(line) {
            let name = &caps[1];

            if is_reserved_keyword(name) {
                ctx.error(
                    Some(line_number),
                    format!(
                        "Cannot assign to reserved keyword '{}' at line {}",
                        name, line_number
                    ),
                );
            }

            if !IDENTIFIER.is_match(name) {
                ctx.error(
                    Some(line_number),
                    format!("Invalid variable name '{}' at line {}", name, line_number),
                );
            }
        }
    }
}

pub fn validate_output(ctx: &mut ValidationContext<'_>) {
    let empty = OUTPUT_EMPTY.find_iter(ctx.text).count();
    if empty > 0 {
        ctx.warning(
            None,
            format!("Empty output tags detected: {} instances", empty),
        );
    }
}

pub fn validate_objects(ctx: &mut ValidationContext<'_>) {
    let mut seen = BTreeSet::new();
    let double_dots: Vec<&str> = DOUBLE_DOT
        .find_iter(ctx.text)
        .map(|m| m.as_str())
        .filter(|access| seen.insert(*access))
        .collect();
    if !double_dots.is_empty() {
        ctx.error(
            None,
            format!(
                "Invalid object access with double dots: {}",
                double_dots.join(", ")
            ),
        );
    }

    let empty_access = EMPTY_PROPERTY.find_iter(ctx.text).count();
    if empty_access > 0 {
        ctx.error(
            None,
            format!("Empty property access detected: {} instances", empty_access),
        );
    }
}

pub fn validate_strings(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        let single = line.matches('\'').count() - line.matches("\\'").count();
        let double = line.matches('"').count() - line.matches("\\\"").count();

        if single % 2 != 0 {
            ctx.error(
                Some(line_number),
                format!("Unmatched single quotes at line {}", line_number),
            );
        }
        if double % 2 != 0 {
            ctx.error(
                Some(line_number),
                format!("Unmatched double quotes at line {}", line_number),
            );
        }
    }
}
