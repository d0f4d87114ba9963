//! Whole-template checks
//!
//! Syntax, security, performance, encoding, size and whitespace-control
//! passes. Each one looks at the raw text rather than at block structure.

use crate::patterns::{
    BLOCK_END, BLOCK_START, CUSTOM_TAG, DANGEROUS_REGEXES, FOR_LOOP, MAX_LINE_COUNT,
    MAX_LOOP_ITERATIONS_WARNING, MAX_NESTING_DEPTH, MAX_TEMPLATE_SIZE, NUMERIC_RANGE, TRIM_CLOSE,
    TRIM_OPEN,
};
use crate::validation::engine::ValidationContext;
use crate::validation::structure;

/// Parser messages that point at tags or filters it does not know, not at real syntax errors
const IGNORED_PARSE_ERRORS: &[&str] = &["unknown", "undefined", "unregistered"];

pub fn validate_encoding(ctx: &mut ValidationContext<'_>) {
    if let Some(error) = ctx.decode_error.take() {
        ctx.error(None, error);
    }

    if ctx.text.starts_with('\u{feff}') {
        ctx.warning(Some(1), "Byte Order Mark (BOM) detected at file start".to_string());
    }
}

pub fn validate_template_size(ctx: &mut ValidationContext<'_>) {
    let size = ctx.text.len();
    let line_count = ctx.lines.len();

    if size > MAX_TEMPLATE_SIZE {
        ctx.error(
            None,
            format!(
                "Template size ({} bytes) exceeds maximum ({} bytes)",
                size, MAX_TEMPLATE_SIZE
            ),
        );
    }

    if line_count > MAX_LINE_COUNT {
        ctx.error(
            None,
            format!(
                "Template line count ({}) exceeds maximum ({})",
                line_count, MAX_LINE_COUNT
            ),
        );
    }
}

pub fn validate_empty_content(ctx: &mut ValidationContext<'_>) {
    if ctx.text.trim().is_empty() {
        ctx.error(None, "Template content cannot be empty".to_string());
    }
}

/// Whether the text uses any FHIR converter tag
pub fn has_custom_tags(text: &str) -> bool {
    CUSTOM_TAG.is_match(text)
}

pub fn validate_syntax(ctx: &mut ValidationContext<'_>) {
    let open_tags = ctx.text.matches("{%").count();
    let close_tags = ctx.text.matches("%}").count();
    if open_tags != close_tags {
        ctx.error(
            None,
            format!(
                "Unmatched Liquid tags: {} opening '{{%', {} closing '%}}'",
                open_tags, close_tags
            ),
        );
    }

    let open_outputs = ctx.text.matches("{{").count();
    let close_outputs = ctx.text.matches("}}").count();
    if open_outputs != close_outputs {
        ctx.error(
            None,
            format!(
                "Unmatched output tags: {} opening '{{{{', {} closing '}}}}'",
                open_outputs, close_outputs
            ),
        );
    }

    // The generic parser cannot handle converter tags and would only add noise
    if has_custom_tags(ctx.text) {
        return;
    }

    let parser = match liquid::ParserBuilder::with_stdlib().build() {
        Ok(parser) => parser,
        Err(e) => {
            log::warn!("Liquid parser unavailable, skipping parse: {}", e);
            return;
        }
    };
    let Err(e) = parser.parse(ctx.text) else {
        return;
    };

    let message = flatten_parse_error(&e.to_string());
    let lowered = message.to_lowercase();
    if IGNORED_PARSE_ERRORS.iter().any(|word| lowered.contains(word)) {
        log::debug!("Ignoring parse error: {}", message);
    } else if structure::has_block_faults(ctx.lines) {
        // The tag matcher reports these with line numbers
        log::debug!("Parse error left to the tag matcher: {}", message);
    } else {
        ctx.error(None, format!("Liquid parse error: {}", message));
    }
}

/// Parser errors span several lines with source excerpts; keep the wording on one line
fn flatten_parse_error(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_security(ctx: &mut ValidationContext<'_>) {
    for (pattern, regex) in DANGEROUS_REGEXES.iter() {
        if regex.is_match(ctx.text) {
            ctx.error(None, format!("Potentially dangerous pattern detected: {}", pattern));
        }
    }
}

pub fn validate_performance(ctx: &mut ValidationContext<'_>) {
    // Running counter, not the full stack: opens count before closes on each line
    let mut max_depth: i64 = 0;
    let mut depth: i64 = 0;
    for line in ctx.lines {
        depth += BLOCK_START.find_iter(line).count() as i64;
        max_depth = max_depth.max(depth);
        depth -= BLOCK_END.find_iter(line).count() as i64;
    }

    if max_depth > MAX_NESTING_DEPTH as i64 {
        ctx.warning(
            None,
            format!(
                "Deep nesting detected: {} levels (limit: {})",
                max_depth, MAX_NESTING_DEPTH
            ),
        );
    }

    let mut large_ranges = Vec::new();
    for caps in FOR_LOOP.captures_iter(ctx.text) {
        let Some(range) = NUMERIC_RANGE.captures(&caps[1]) else {
            continue;
        };
        // Bounds too large for i64 are certainly over the limit
        let start: i64 = range[1].parse().unwrap_or(0);
        let end: i64 = range[2].parse().unwrap_or(i64::MAX);
        let iterations = end.saturating_sub(start);
        if iterations > MAX_LOOP_ITERATIONS_WARNING {
            large_ranges.push(format!(
                "Large loop range detected: {}..{} ({} iterations)",
                &range[1], &range[2], iterations
            ));
        }
    }
    for message in large_ranges {
        ctx.warning(None, message);
    }
}

pub fn validate_whitespace_control(ctx: &mut ValidationContext<'_>) {
    let text = ctx.text;

    // `{%-` must be followed by whitespace or the end of the tag
    let bad_open = TRIM_OPEN
        .find_iter(text)
        .filter(|m| {
            text[m.end()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_whitespace() && c != '%')
        })
        .count();

    // `-%}` must not be glued to the preceding token
    let bad_close = TRIM_CLOSE
        .find_iter(text)
        .filter(|m| {
            text[..m.start()]
                .chars()
                .next_back()
                .is_none_or(|c| c != '-' && !c.is_whitespace())
        })
        .count();

    let total = bad_open + bad_close;
    if total > 0 {
        ctx.warning(
            None,
            format!("Possibly invalid whitespace control syntax: {} instances", total),
        );
    }
}
