//! Pattern Library
//!
//! Lexical patterns, keyword sets and numeric limits shared by every
//! validation pass. Nothing here does any work on its own; the passes
//! consult these tables so they all agree on what a tag, a filter or a
//! dangerous construct looks like.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum template size in bytes (1 MiB)
pub const MAX_TEMPLATE_SIZE: usize = 1024 * 1024;
/// Maximum number of lines in a template
pub const MAX_LINE_COUNT: usize = 10_000;
/// Nesting depth above which a warning is emitted
pub const MAX_NESTING_DEPTH: usize = 10;
/// Range size above which a `for` loop is reported
pub const MAX_LOOP_ITERATIONS_WARNING: i64 = 1000;

/// Block tags and the keyword that closes each of them
pub const BLOCK_TAGS: &[(&str, &str)] = &[
    ("if", "endif"),
    ("unless", "endunless"),
    ("for", "endfor"),
    ("case", "endcase"),
    ("capture", "endcapture"),
    ("tablerow", "endtablerow"),
    ("comment", "endcomment"),
];

/// Look up the closing keyword for a block-opening keyword
pub fn closing_tag(open: &str) -> Option<&'static str> {
    BLOCK_TAGS
        .iter()
        .find(|(tag, _)| *tag == open)
        .map(|(_, close)| *close)
}

/// Filters of the standard Liquid library
pub const STANDARD_FILTERS: &[&str] = &[
    // String filters
    "strip",
    "lstrip",
    "rstrip",
    "upcase",
    "downcase",
    "capitalize",
    "append",
    "prepend",
    "replace",
    "replace_first",
    "remove",
    "remove_first",
    "truncate",
    "truncatewords",
    "strip_html",
    "strip_newlines",
    "newline_to_br",
    "escape",
    "escape_once",
    "url_encode",
    "url_decode",
    "slice",
    "split",
    // Array filters
    "join",
    "first",
    "last",
    "concat",
    "map",
    "reverse",
    "sort",
    "sort_natural",
    "uniq",
    "where",
    "size",
    "compact",
    // Math filters
    "abs",
    "ceil",
    "floor",
    "round",
    "plus",
    "minus",
    "times",
    "divided_by",
    "modulo",
    "at_least",
    "at_most",
    // Date filters
    "date",
    "format_as_date_time",
    "default",
];

/// Filters registered by the FHIR converter renderer
pub const FHIR_FILTERS: &[&str] = &[
    "get_first_segments",
    "get_segment_lists",
    "get_related_segment_list",
    "get_property_value",
    "add_to_date_time",
    "to_json_string",
    "batch_render",
    "to_array",
    "generate_uuid",
];

/// Whether a filter name is known to either the standard library or the FHIR renderer
pub fn is_known_filter(name: &str) -> bool {
    STANDARD_FILTERS.contains(&name) || FHIR_FILTERS.contains(&name)
}

/// Custom FHIR converter block tags. The generic parser cannot handle them.
pub const FHIR_CUSTOM_TAGS: &[&str] = &["evaluate", "mergeDiff", "addSegment"];

/// Words that can be neither assigned nor reported as undefined
pub const RESERVED_KEYWORDS: &[&str] = &[
    "true",
    "false",
    "nil",
    "empty",
    "blank",
    "forloop",
    "tablerowloop",
];

pub fn is_reserved_keyword(name: &str) -> bool {
    RESERVED_KEYWORDS.contains(&name)
}

/// Every keyword a `{% ... %}` tag may start with
pub const VALID_TAG_KEYWORDS: &[&str] = &[
    "assign",
    "capture",
    "case",
    "comment",
    "if",
    "unless",
    "elseif",
    "else",
    "for",
    "break",
    "continue",
    "tablerow",
    "when",
    "include",
    "render",
    "cycle",
    "increment",
    "decrement",
    "echo",
    "liquid",
    "raw",
    "endraw",
    "endif",
    "endunless",
    "endfor",
    "endcase",
    "endcapture",
    "endtablerow",
    "endcomment",
    // FHIR converter
    "evaluate",
    "mergeDiff",
    "addSegment",
];

/// Code-execution-like constructs, matched case-insensitively anywhere in the text
pub const DANGEROUS_PATTERNS: &[&str] = &[
    r"system\s*\(",
    r"exec\s*\(",
    r"eval\s*\(",
    r"__import__",
    r"open\s*\(",
    r"file\s*\(",
];

/// Compiled form of [`DANGEROUS_PATTERNS`], paired with the source pattern
pub static DANGEROUS_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .map(|pattern| (*pattern, Regex::new(&format!("(?i){pattern}")).unwrap()))
        .collect()
});

/// Identifier syntax for variable roots and assignment targets
pub static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_]\w*$").unwrap());

pub static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{%\s*(-\s*)?include\s+['"]([^'"]+)['"]"#).unwrap());

pub static BLOCK_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%\s*(-\s*)?(if|unless|for|case|capture|tablerow)\b.*?(-\s*)?%\}").unwrap()
});

pub static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%\s*(-\s*)?(endif|endunless|endfor|endcase|endcapture|endtablerow)\s*(-\s*)?%\}")
        .unwrap()
});

pub static ELSIF_ELSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(-\s*)?(elseif|else)\b.*?(-\s*)?%\}").unwrap());

pub static WHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(-\s*)?when\b.*?(-\s*)?%\}").unwrap());

pub static ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*assign\s+(\w+)\s*=\s*(.+?)\s*%\}").unwrap());

/// Filter name plus its raw parameter string, if any
pub static FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\|\s*([a-zA-Z_]\w*)(?:\s*:\s*([^|}"']+|"[^"]*"|'[^']*'))?"#).unwrap()
});

/// `{{ expr }}` with a bracket/quote-safe variable path capture
pub static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*([\w.\[\]'"]+)(?:\s*\|.*?)?\s*\}\}"#).unwrap()
});

pub static ARRAY_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[.*?\]").unwrap());

pub static OUTPUT_EMPTY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*\}\}").unwrap());

pub static DOUBLE_DOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+\.\.\w+").unwrap());

pub static EMPTY_PROPERTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\.\s*[|}]").unwrap());

pub static BREAK_CONTINUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(break|continue)\s*%\}").unwrap());

pub static FOR_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{%\s*for\b").unwrap());

pub static FOR_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*endfor\s*%\}").unwrap());

/// First token of any tag
pub static TAG_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(-\s*)?(\S+)").unwrap());

pub static CONDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*(?:if|unless)\s+(.+?)\s*%\}").unwrap());

pub static INVALID_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[=!<>]{3,}").unwrap());

pub static ASSIGNMENT_IN_CONDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\s*=\s*\w+").unwrap());

pub static FOR_LOOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*for\s+\w+\s+in\s+(.+?)\s*%\}").unwrap());

pub static NUMERIC_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.\.(\d+)").unwrap());

/// A trim marker directly after `{%`; the following character is checked by the caller
pub static TRIM_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{%\s*-").unwrap());

/// A trim marker directly before `%}`; the preceding character is checked by the caller
pub static TRIM_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-\s*%\}").unwrap());

pub static CUSTOM_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%-?\s*(evaluate|mergeDiff|addSegment)\b").unwrap());

pub static ANY_EVALUATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*evaluate\s+").unwrap());

pub static ANY_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*include\s+").unwrap());

/// `{% evaluate name using "ResourceType" %}`
pub static EVALUATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%\s*evaluate\s+(\w+)\s+using\s+['"]([^'"]+)['"]"#).unwrap()
});

/// Evaluations that only produce an identifier and need no supporting include
pub static ID_ONLY_EVALUATIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"ID/Bundle",
        r#"ID/Patient.*type:\s*['"]First['"]"#,
        r"ID/Encounter",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

pub fn is_id_only_evaluation(line: &str) -> bool {
    ID_ONLY_EVALUATIONS.iter().any(|re| re.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closing_tag_mapping() {
        assert_eq!(closing_tag("if"), Some("endif"));
        assert_eq!(closing_tag("tablerow"), Some("endtablerow"));
        assert_eq!(closing_tag("comment"), Some("endcomment"));
        assert_eq!(closing_tag("evaluate"), None);
    }

    #[test]
    fn test_block_start_handles_trim_markers() {
        let caps = BLOCK_START.captures("{%- for item in list -%}").unwrap();
        assert_eq!(&caps[2], "for");
        assert!(BLOCK_START.captures("{% form %}").is_none());
        assert!(BLOCK_START.captures("{% endif %}").is_none());
    }

    #[test]
    fn test_filter_captures_name_and_parameters() {
        let caps = FILTER.captures(r#"{{ name | append: "x" }}"#).unwrap();
        assert_eq!(&caps[1], "append");
        assert_eq!(&caps[2], r#""x""#);
    }

    #[test]
    fn test_variable_keeps_bracket_path() {
        let caps = VARIABLE.captures(r#"{{ msg["PID"].value | upcase }}"#).unwrap();
        assert_eq!(&caps[1], r#"msg["PID"].value"#);
    }

    #[test]
    fn test_known_filters() {
        assert!(is_known_filter("upcase"));
        assert!(is_known_filter("generate_uuid"));
        assert!(!is_known_filter("shout"));
    }

    #[test]
    fn test_id_only_exemptions() {
        assert!(is_id_only_evaluation(r#"{% evaluate bundleId using "ID/Bundle" Data: msg %}"#));
        assert!(is_id_only_evaluation(
            r#"{% evaluate patientId using "ID/Patient" PID: pid, type: 'First' %}"#
        ));
        assert!(!is_id_only_evaluation(r#"{% evaluate obsId using "ID/Observation" %}"#));
    }

    #[test]
    fn test_dangerous_patterns_are_case_insensitive() {
        assert!(DANGEROUS_REGEXES.iter().any(|(_, re)| re.is_match("EXEC (")));
    }
}
