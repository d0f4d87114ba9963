//! Structural Tag Matcher
//!
//! Block pairing is a stack machine over the template lines: opening tags
//! push a frame, closing tags pop one and must agree with it. `case` blocks
//! get a second stack so `when` can be scoped. The simpler structural
//! checks (tag keywords, comment balance, loop-only tags) live here too.

use crate::patterns::{
    BLOCK_END, BLOCK_START, BREAK_CONTINUE, ELSIF_ELSE, FOR_CLOSE, FOR_OPEN, MAX_NESTING_DEPTH,
    TAG_KEYWORD, VALID_TAG_KEYWORDS, WHEN, closing_tag,
};
use crate::validation::engine::{Diagnostic, Severity, ValidationContext, ValidationResult};

/// An open block waiting for its closing tag
#[derive(Debug, Clone, PartialEq)]
struct Frame<'a> {
    tag: &'a str,
    line: usize,
}

/// Stack state of the tag matcher
#[derive(Debug, Default)]
struct TagMatcher<'a> {
    stack: Vec<Frame<'a>>,
    case_lines: Vec<usize>,
}

impl<'a> TagMatcher<'a> {
    fn open(&mut self, tag: &'a str, line: usize) {
        self.stack.push(Frame { tag, line });
        if tag == "case" {
            self.case_lines.push(line);
        }
    }

    fn in_case(&self) -> bool {
        !self.case_lines.is_empty()
    }

    fn in_conditional(&self) -> bool {
        self.stack
            .last()
            .is_some_and(|frame| frame.tag == "if" || frame.tag == "unless")
    }

    /// Pop the innermost frame for a closing tag, describing any mismatch
    fn close(&mut self, end_tag: &str, line: usize) -> Result<(), String> {
        let Some(frame) = self.stack.pop() else {
            return Err(format!("Unexpected '{{% {} %}}' at line {}", end_tag, line));
        };

        if end_tag == "endcase" {
            self.case_lines.pop();
        }

        let expected = closing_tag(frame.tag).unwrap_or_default();
        if end_tag != expected {
            return Err(format!(
                "Mismatched block: '{{% {} %}}' at line {} closed by '{{% {} %}}' at line {}. Expected '{{% {} %}}'",
                frame.tag, frame.line, end_tag, line, expected
            ));
        }
        Ok(())
    }
}

/// Run the tag matcher over the lines, returning its findings in line order
fn match_blocks(lines: &[&str]) -> Vec<Diagnostic> {
    let mut findings = ValidationResult::new();
    let mut matcher = TagMatcher::default();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Checked against the depth reached before this line, once per line
        if matcher.stack.len() > MAX_NESTING_DEPTH {
            findings.add_warning(
                Some(line_number),
                format!(
                    "Deep nesting detected at line {} (depth: {})",
                    line_number,
                    matcher.stack.len()
                ),
            );
        }

        for caps in BLOCK_START.captures_iter(line) {
            let tag = caps.get(2).map_or("", |m| m.as_str());
            if closing_tag(tag).is_some() {
                matcher.open(tag, line_number);
            }
        }

        for _ in WHEN.find_iter(line) {
            if !matcher.in_case() {
                findings.add_error(
                    Some(line_number),
                    format!("'when' at line {} used outside of 'case' block", line_number),
                );
            }
        }

        for caps in ELSIF_ELSE.captures_iter(line) {
            if !matcher.in_conditional() {
                findings.add_error(
                    Some(line_number),
                    format!(
                        "'{}' at line {} used without preceding 'if' or 'unless'",
                        &caps[2], line_number
                    ),
                );
            }
        }

        for caps in BLOCK_END.captures_iter(line) {
            if let Err(message) = matcher.close(&caps[2], line_number) {
                findings.add_error(Some(line_number), message);
            }
        }
    }

    for frame in matcher.stack {
        let expected = closing_tag(frame.tag).unwrap_or_default();
        findings.add_error(
            Some(frame.line),
            format!(
                "Unclosed block '{{% {} %}}' at line {}, missing '{{% {} %}}'",
                frame.tag, frame.line, expected
            ),
        );
    }

    findings.diagnostics
}

/// Whether the tag matcher finds any pairing error
pub fn has_block_faults(lines: &[&str]) -> bool {
    match_blocks(lines)
        .iter()
        .any(|finding| finding.severity == Severity::Error)
}

pub fn validate_tags(ctx: &mut ValidationContext<'_>) {
    let findings = match_blocks(ctx.lines);
    ctx.result.diagnostics.extend(findings);
}

pub fn validate_tag_keywords(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        for caps in TAG_KEYWORD.captures_iter(line) {
            let first_token = &caps[2];

            if first_token.starts_with(['\'', '"']) {
                ctx.error(
                    Some(line_number),
                    format!(
                        "Invalid tag syntax at line {}: Tags cannot start with string literals. Found: '{}...'",
                        line_number, &caps[0]
                    ),
                );
                continue;
            }

            if !VALID_TAG_KEYWORDS.contains(&first_token) {
                ctx.error(
                    Some(line_number),
                    format!(
                        "Unknown tag keyword '{}' at line {}. Tags must start with valid Liquid keywords (assign, include, if, for, etc.)",
                        first_token, line_number
                    ),
                );
            }
        }
    }
}

pub fn validate_comments(ctx: &mut ValidationContext<'_>) {
    let open = ctx.text.matches("{% comment %}").count();
    let close = ctx.text.matches("{% endcomment %}").count();

    if open != close {
        ctx.error(
            None,
            format!("Unmatched comment tags: {} opening, {} closing", open, close),
        );
    }
}

pub fn validate_control_flow(ctx: &mut ValidationContext<'_>) {
    let lines = ctx.lines;
    let mut open_loops: usize = 0;

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // A line opening a loop is never treated as closing one
        if FOR_OPEN.is_match(line) {
            open_loops += 1;
        } else if FOR_CLOSE.is_match(line) {
            open_loops = open_loops.saturating_sub(1);
        }

        if BREAK_CONTINUE.is_match(line) && open_loops == 0 {
            ctx.error(
                Some(line_number),
                format!("'break' or 'continue' used outside loop at line {}", line_number),
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

    fn errors(result: &ValidationResult) -> Vec<String> {
        result.errors().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_balanced_blocks() {
        let text = "{% if a %}\n{% for x in xs %}\n{% case x %}\n{% when 1 %}\n{% endcase %}\n{% endfor %}\n{% else %}\n{% endif %}";
        assert!(run(validate_tags, text).diagnostics.is_empty());
    }

    #[test]
    fn test_unclosed_block() {
        let result = run(validate_tags, "{% if x %}hello");
        assert_eq!(
            errors(&result),
            vec!["Unclosed block '{% if %}' at line 1, missing '{% endif %}'"]
        );
        assert_eq!(result.diagnostics[0].line, Some(1));
    }

    #[test]
    fn test_mismatched_close() {
        let result = run(validate_tags, "{% if x %}\n{% endfor %}");
        assert_eq!(
            errors(&result),
            vec!["Mismatched block: '{% if %}' at line 1 closed by '{% endfor %}' at line 2. Expected '{% endif %}'"]
        );
    }

    #[test]
    fn test_unexpected_close() {
        let result = run(validate_tags, "text\n{%- endunless -%}");
        assert_eq!(errors(&result), vec!["Unexpected '{% endunless %}' at line 2"]);
    }

    #[test]
    fn test_when_outside_case() {
        let result = run(validate_tags, "{% when 1 %}");
        assert_eq!(
            errors(&result),
            vec!["'when' at line 1 used outside of 'case' block"]
        );
    }

    #[test]
    fn test_else_requires_conditional_frame() {
        let result = run(validate_tags, "{% for x in xs %}\n{% else %}\n{% endfor %}");
        assert_eq!(
            errors(&result),
            vec!["'else' at line 2 used without preceding 'if' or 'unless'"]
        );
    }

    #[test]
    fn test_case_without_when_is_fine() {
        assert!(run(validate_tags, "{% case x %}\n{% endcase %}").diagnostics.is_empty());
    }

    #[test]
    fn test_depth_warning_repeats_per_line() {
        let mut text = String::new();
        for _ in 0..11 {
            text.push_str("{% if a %}\n");
        }
        text.push_str("x\ny\n");
        for _ in 0..11 {
            text.push_str("{% endif %}\n");
        }
        let result = run(validate_tags, &text);
        assert!(result.is_valid());
        // Depth 11 is seen at the start of lines 12, 13 and 14
        assert_eq!(result.warnings().count(), 3);
    }

    #[test]
    fn test_block_faults() {
        assert!(has_block_faults(&["{% if x %}", "{% endfor %}"]));
        assert!(has_block_faults(&["{% else %}"]));
        assert!(!has_block_faults(&["{% for x in xs %}", "{% endfor %}"]));
    }

    #[test]
    fn test_tag_keywords() {
        let result = run(validate_tag_keywords, "{% 'Patient' %}\n{% elsif x %}\n{%- assign a = 1 %}");
        let errs = errors(&result);
        assert_eq!(errs.len(), 2);
        assert!(errs[0].starts_with("Invalid tag syntax at line 1: Tags cannot start with string literals"));
        assert!(errs[1].starts_with("Unknown tag keyword 'elsif' at line 2"));
    }

    #[test]
    fn test_comment_balance() {
        assert!(run(validate_comments, "{% comment %}\nTODO\n{% endcomment %}").is_valid());
        assert_eq!(
            errors(&run(validate_comments, "{% comment %}")),
            vec!["Unmatched comment tags: 1 opening, 0 closing"]
        );
    }

    #[test]
    fn test_break_outside_loop() {
        let result = run(validate_control_flow, "{% break %}\n{% for x in xs %}\n{% continue %}\n{% endfor %}");
        assert_eq!(
            errors(&result),
            vec!["'break' or 'continue' used outside loop at line 1"]
        );
    }
}
