//! Response Parser
//!
//! Recovers structured tool invocations from free model text. The model is
//! asked to emit `{"tool_name": "...", "parameters": {...}}` (or an array of
//! them) but routinely wraps it in reasoning blocks, code fences and prose.
//!
//! Extraction runs a fixed pipeline of independent strategies; each returns a
//! `ParseOutcome` and the first `Found` wins:
//!
//! 1. `strip_reasoning` - drop everything up to the last `</think>`/`</reasoning>`
//! 2. `strip_fences` - remove ``` markers and their language tags
//! 3. `parse_whole` - the remaining text is one JSON value
//! 4. `parse_first_object` - first balanced `{...}` in the text
//! 5. `scan_objects` - every `{...}` that opens with a required key
//! 6. `parse_sequence` - a `[...]` literal of invocation objects
//!
//! Parsing never fails: when every strategy misses the result is empty, which
//! the loop treats as a conversational answer.

use regex::Regex;
use sdk::types::{Parameters, ToolInvocation};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Wire key holding the tool name
pub const TOOL_NAME_KEY: &str = "tool_name";

/// Wire key holding the parameter object
pub const PARAMETERS_KEY: &str = "parameters";

const REASONING_END_TAGS: &[&str] = &["</think>", "</reasoning>"];

static FENCE_PATTERN: OnceLock<Regex> = OnceLock::new();
static CANDIDATE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn fence_pattern() -> &'static Regex {
    FENCE_PATTERN.get_or_init(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("Invalid fence pattern"))
}

fn candidate_pattern() -> &'static Regex {
    CANDIDATE_PATTERN.get_or_init(|| {
        Regex::new(r#"\{\s*"(?:tool_name|parameters)"\s*:"#).expect("Invalid candidate pattern")
    })
}

/// Result of a single extraction strategy
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Found(Vec<ToolInvocation>),
    NotFound,
}

impl ParseOutcome {
    fn from_vec(invocations: Vec<ToolInvocation>) -> Self {
        if invocations.is_empty() {
            Self::NotFound
        } else {
            Self::Found(invocations)
        }
    }
}

/// Extracts tool invocations from model responses
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    /// Tools taking one positional value, mapped to the key that value belongs under
    single_value_tools: HashMap<String, String>,
}

impl ResponseParser {
    /// Create a parser with no parameter repairs registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that takes a single value under `key`.
    ///
    /// An unlabeled one-entry parameter object for this tool is folded into
    /// `key` instead of being passed through.
    pub fn with_single_value_tool(mut self, tool: impl Into<String>, key: impl Into<String>) -> Self {
        self.single_value_tools.insert(tool.into(), key.into());
        self
    }

    /// Extract every invocation the text contains, in the order written
    pub fn parse(&self, text: &str) -> Vec<ToolInvocation> {
        let cleaned = strip_fences(strip_reasoning(text));

        let strategies: [fn(&str) -> ParseOutcome; 4] =
            [parse_whole, parse_first_object, scan_objects, parse_sequence];

        for strategy in strategies {
            if let ParseOutcome::Found(invocations) = strategy(&cleaned) {
                return invocations.into_iter().map(|i| self.repair(i)).collect();
            }
        }

        Vec::new()
    }

    /// Every candidate object in the text, without first-match short-circuit.
    ///
    /// Used to find calls a previous round proposed but never ran.
    pub fn scan_candidates(&self, text: &str) -> Vec<ToolInvocation> {
        let cleaned = strip_fences(strip_reasoning(text));

        let outcome = match scan_objects(&cleaned) {
            ParseOutcome::NotFound => parse_sequence(&cleaned),
            found => found,
        };

        match outcome {
            ParseOutcome::Found(invocations) => {
                invocations.into_iter().map(|i| self.repair(i)).collect()
            }
            ParseOutcome::NotFound => Vec::new(),
        }
    }

    /// Fold an unlabeled single key/value pair into the expected key
    fn repair(&self, mut invocation: ToolInvocation) -> ToolInvocation {
        let Some(expected) = self.single_value_tools.get(&invocation.name) else {
            return invocation;
        };

        if invocation.parameters.len() != 1 || invocation.parameters.contains_key(expected) {
            return invocation;
        }

        let Some((key, value)) = invocation.parameters.iter().next() else {
            return invocation;
        };

        let folded = match value {
            Value::Null => Value::String(key.clone()),
            Value::String(s) if s.trim().is_empty() => Value::String(key.clone()),
            other => other.clone(),
        };

        tracing::debug!(
            "Repaired parameters for '{}': '{}' folded into '{}'",
            invocation.name,
            key,
            expected
        );

        let mut parameters = Parameters::new();
        parameters.insert(expected.clone(), folded);
        invocation.parameters = parameters;
        invocation
    }
}

/// Drop everything up to and including the last reasoning-block end tag
pub fn strip_reasoning(text: &str) -> &str {
    REASONING_END_TAGS
        .iter()
        .filter_map(|tag| text.rfind(tag).map(|pos| pos + tag.len()))
        .max()
        .map_or(text, |end| &text[end..])
}

/// Remove code-fence markers (with their language tag), keeping the body
pub fn strip_fences(text: &str) -> String {
    fence_pattern().replace_all(text, "").trim().to_string()
}

/// Strategy 3: the whole text is one JSON object or array
pub fn parse_whole(text: &str) -> ParseOutcome {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => {
            ParseOutcome::from_vec(invocation_from_value(&value).into_iter().collect())
        }
        Ok(Value::Array(items)) => {
            ParseOutcome::from_vec(items.iter().filter_map(invocation_from_value).collect())
        }
        _ => ParseOutcome::NotFound,
    }
}

/// Strategy 4: first balanced object in the text
///
/// Defers when that object is the first element of a sequence literal so the
/// sequence strategy can return every element.
pub fn parse_first_object(text: &str) -> ParseOutcome {
    let Some(start) = text.find('{') else {
        return ParseOutcome::NotFound;
    };

    if text[..start].trim_end().ends_with('[') {
        return ParseOutcome::NotFound;
    }

    extract_balanced(&text[start..], '{', '}')
        .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .and_then(|value| invocation_from_value(&value))
        .map_or(ParseOutcome::NotFound, |invocation| {
            ParseOutcome::Found(vec![invocation])
        })
}

/// Strategy 5: every object opening with a required key, validated one by one
pub fn scan_objects(text: &str) -> ParseOutcome {
    let mut invocations = Vec::new();
    let mut consumed_until = 0;

    for found in candidate_pattern().find_iter(text) {
        if found.start() < consumed_until {
            continue;
        }
        let Some(candidate) = extract_balanced(&text[found.start()..], '{', '}') else {
            continue;
        };
        if let Some(invocation) = serde_json::from_str::<Value>(candidate)
            .ok()
            .and_then(|value| invocation_from_value(&value))
        {
            consumed_until = found.start() + candidate.len();
            invocations.push(invocation);
        }
    }

    ParseOutcome::from_vec(invocations)
}

/// Strategy 6: a sequence literal whose entries expose both required keys
pub fn parse_sequence(text: &str) -> ParseOutcome {
    for (start, _) in text.match_indices('[') {
        let Some(candidate) = extract_balanced(&text[start..], '[', ']') else {
            continue;
        };
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(candidate) {
            let invocations: Vec<ToolInvocation> =
                items.iter().filter_map(invocation_from_value).collect();
            if !invocations.is_empty() {
                return ParseOutcome::Found(invocations);
            }
        }
    }

    ParseOutcome::NotFound
}

/// Build an invocation from an object carrying exactly the wire keys.
///
/// Synonym keys (`name`, `function`, `arguments`) are not accepted.
fn invocation_from_value(value: &Value) -> Option<ToolInvocation> {
    let object = value.as_object()?;
    let name = object.get(TOOL_NAME_KEY)?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let parameters = object.get(PARAMETERS_KEY)?.as_object()?;
    Some(ToolInvocation::with_parameters(name, parameters.clone()))
}

/// Extract a balanced `open ... close` span starting at position 0 of `s`.
///
/// Counts delimiter depth, respecting string literals, to find the
/// matching close delimiter.
fn extract_balanced(s: &str, open: char, close: char) -> Option<&str> {
    if !s.starts_with(open) {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> ResponseParser {
        ResponseParser::new().with_single_value_tool("navigate_to", "locus")
    }

    #[test]
    fn test_reasoning_and_fences() {
        let text = "<think>The user wants chr1, so I should call x.</think>\n```json\n{\"tool_name\":\"x\",\"parameters\":{}}\n```";
        let invocations = parser().parse(text);

        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "x");
        assert!(invocations[0].parameters.is_empty());
    }

    #[test]
    fn test_no_structured_object() {
        assert!(parser().parse("Sure, the GC content is 52%.").is_empty());
        assert!(parser().parse("").is_empty());
        assert!(parser().parse("✅ Navigated to chr1:1-100").is_empty());
    }

    #[test]
    fn test_strip_reasoning_uses_last_tag() {
        assert_eq!(strip_reasoning("a</think>b</think>c"), "c");
        assert_eq!(strip_reasoning("<reasoning>r</reasoning>rest"), "rest");
        assert_eq!(strip_reasoning("no tags"), "no tags");
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_fences("```\n[1]\n```"), "[1]");
    }

    #[test]
    fn test_whole_array() {
        let text = r#"[{"tool_name":"zoom_in","parameters":{}},{"tool_name":"get_current_state","parameters":{}}]"#;
        let invocations = parser().parse(text);
        let names: Vec<&str> = invocations.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["zoom_in", "get_current_state"]);
    }

    #[test]
    fn test_object_in_prose() {
        let text = r#"I'll move the view now: {"tool_name": "navigate_to", "parameters": {"chromosome": "chr2", "start": 10, "end": 500}} and report back."#;
        assert_eq!(
            parse_first_object(text),
            ParseOutcome::Found(vec![ToolInvocation::new("navigate_to")
                .with_param("chromosome", json!("chr2"))
                .with_param("start", json!(10))
                .with_param("end", json!(500))])
        );
        assert_eq!(parser().parse(text).len(), 1);
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"Result: {"tool_name": "create_bookmark", "parameters": {"name": "odd } name {"}}"#;
        let invocations = parser().parse(text);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].param_str("name").unwrap(), "odd } name {");
    }

    #[test]
    fn test_scan_finds_object_after_unrelated_braces() {
        let text = r#"The set {a, b} is small. {"tool_name": "gc_content", "parameters": {"sequence": "ATGC"}}"#;
        assert_eq!(parse_first_object(text), ParseOutcome::NotFound);

        let invocations = parser().parse(text);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "gc_content");
    }

    #[test]
    fn test_scan_multiple_objects() {
        let text = r#"First {"tool_name": "zoom_in", "parameters": {}} then {"tool_name": "zoom_out", "parameters": {"factor": 2}}"#;
        let outcome = scan_objects(text);
        let ParseOutcome::Found(invocations) = outcome else {
            panic!("expected candidates");
        };
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[1].name, "zoom_out");
    }

    #[test]
    fn test_sequence_in_prose() {
        let text = r#"Running both: [{"tool_name": "zoom_in", "parameters": {}}, {"tool_name": "scroll_left", "parameters": {"bp": 100}}] now."#;
        assert_eq!(parse_first_object(text), ParseOutcome::NotFound);

        let invocations = parser().parse(text);
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].name, "zoom_in");
        assert_eq!(invocations[1].name, "scroll_left");
    }

    #[test]
    fn test_sequence_keeps_only_valid_entries() {
        let text = r#"[{"tool_name": "zoom_in", "parameters": {}}, {"name": "zoom_out", "parameters": {}}, 3]"#;
        let invocations = parser().parse(text);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "zoom_in");
    }

    #[test]
    fn test_synonym_keys_rejected() {
        assert!(parser()
            .parse(r#"{"name": "zoom_in", "parameters": {}}"#)
            .is_empty());
        assert!(parser()
            .parse(r#"{"function": "zoom_in", "arguments": {}}"#)
            .is_empty());
        assert!(parser()
            .parse(r#"{"tool_name": "zoom_in", "arguments": {}}"#)
            .is_empty());
        assert!(parser()
            .parse(r#"{"tool_name": "", "parameters": {}}"#)
            .is_empty());
    }

    #[test]
    fn test_malformed_json_degrades_to_empty() {
        assert!(parser()
            .parse(r#"{"tool_name": "zoom_in", "parameters": {"#)
            .is_empty());
        assert!(parser().parse("[[[{{{").is_empty());
    }

    #[test]
    fn test_single_value_repair() {
        let unlabeled = parser().parse(r#"{"tool_name": "navigate_to", "parameters": {"chr1:1-100": ""}}"#);
        assert_eq!(unlabeled[0].param_str("locus").unwrap(), "chr1:1-100");

        let wrong_key = parser().parse(r#"{"tool_name": "navigate_to", "parameters": {"value": "chrX:5-50"}}"#);
        assert_eq!(wrong_key[0].param_str("locus").unwrap(), "chrX:5-50");
        assert_eq!(wrong_key[0].parameters.len(), 1);

        let labeled = parser().parse(r#"{"tool_name": "navigate_to", "parameters": {"chromosome": "chr1", "start": 1}}"#);
        assert_eq!(labeled[0].parameters.len(), 2);
        assert!(labeled[0].parameters.contains_key("chromosome"));
    }

    #[test]
    fn test_repair_not_applied_to_other_tools() {
        let invocations = parser().parse(r#"{"tool_name": "gc_content", "parameters": {"seq": "ATGC"}}"#);
        assert!(invocations[0].parameters.contains_key("seq"));
    }

    #[test]
    fn test_scan_candidates_returns_all() {
        let text = r#"<think>plan</think>Doing {"tool_name": "zoom_in", "parameters": {}} and later {"tool_name": "list_bookmarks", "parameters": {}}"#;
        let candidates = parser().scan_candidates(text);
        assert_eq!(candidates.len(), 2);
        assert!(parser().scan_candidates("nothing here").is_empty());
    }
}
