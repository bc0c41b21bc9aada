//! Value extraction patterns, evaluated in priority order.
//!
//! Each pattern is a named regex with a `value` capture group and an optional
//! `target` group naming the field. The first pattern that matches wins, so
//! the table order is the confidence order:
//!
//! 1. `quoted_selection` - a quoted value right after select/choose/pick
//! 2. `set_value_to` - "set <field> value to X"
//! 3. `bare_as_field` - "select X as the <field> dropdown"
//! 4. `bare_from_field` - "select X from the <field> dropdown"
//! 5. `fill_as_field` - "enter X in/as the <field>"
//! 6. `fill_with` - "fill <field> with X"
//! 7. `navigate_url` - "navigate to <url>"
//! 8. `quoted_literal` - any other quoted text

use once_cell::sync::Lazy;
use regex::Regex;

/// Opening or closing quote, straight or curly
const Q: &str = r#"['"‘’“”]"#;
/// Anything but a quote
const NQ: &str = r#"[^'"‘’“”]"#;
/// Optional sentence terminator at end of input
const END: &str = r"\s*[.!]?\s*$";

/// A named extraction rule
#[derive(Debug, Clone)]
pub struct ValuePattern {
    pub name: String,
    regex: Regex,
}

/// The value (and field, if named) a pattern pulled out of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMatch {
    pub value: String,
    pub target: Option<String>,
    pub pattern: String,
}

impl ValuePattern {
    /// Compile a pattern. The regex must define a `value` group and may define `target`.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        if !regex.capture_names().flatten().any(|n| n == "value") {
            return Err(regex::Error::Syntax(format!(
                "pattern '{}' has no `value` capture group",
                pattern
            )));
        }
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    pub fn extract(&self, text: &str) -> Option<ValueMatch> {
        let caps = self.regex.captures(text)?;
        let value = caps.name("value")?.as_str().trim();
        if value.is_empty() {
            return None;
        }
        let target = caps
            .name("target")
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty());
        Some(ValueMatch {
            value: value.to_string(),
            target,
            pattern: self.name.clone(),
        })
    }
}

fn builtin(name: &str, pattern: String) -> ValuePattern {
    ValuePattern::new(name, &pattern).expect("built-in value pattern must compile")
}

/// The built-in table, highest priority first
pub static BUILTIN_PATTERNS: Lazy<Vec<ValuePattern>> = Lazy::new(|| {
    vec![
        builtin(
            "quoted_selection",
            format!(
                r"(?i)\b(?:select|choose|pick)\s+{Q}(?P<value>{NQ}+){Q}(?:\s+(?:from|in|as|for)\s+(?:the\s+)?(?P<target>.+?))?{END}"
            ),
        ),
        builtin(
            "set_value_to",
            format!(
                r"(?i)\bset\s+(?:the\s+)?(?P<target>.+?)\s+value\s+to\s+{Q}?(?P<value>{NQ}+?){Q}?{END}"
            ),
        ),
        builtin(
            "bare_as_field",
            format!(
                r"(?i)\b(?:select|choose|pick)\s+(?P<value>[^\s'“”‘’]+)\s+as\s+(?:the\s+)?(?P<target>.*?\b(?:drop-?down|select)\b.*?){END}"
            ),
        ),
        builtin(
            "bare_from_field",
            format!(
                r"(?i)\b(?:select|choose|pick)\s+(?P<value>{NQ}+?)\s+(?:from|in)\s+(?:the\s+)?(?P<target>.*?\b(?:drop-?down|select|list|menu|options?)\b.*?){END}"
            ),
        ),
        builtin(
            "fill_as_field",
            format!(
                r"(?i)^(?:enter|input|type|fill\s+in|key\s+in)\s+{Q}?(?P<value>.+?){Q}?\s+(?:as|in|into|for)\s+(?:the\s+)?(?P<target>.+?){END}"
            ),
        ),
        builtin(
            "fill_with",
            format!(
                r"(?i)^(?:fill(?:\s+in)?|populate|set)\s+(?:the\s+)?(?P<target>.+?)\s+(?:with|to)\s+{Q}?(?P<value>.+?){Q}?{END}"
            ),
        ),
        builtin(
            "navigate_url",
            format!(
                r"(?i)^(?:navigate\s+to|go\s+to|browse\s+to|open|visit|load)\s+(?:the\s+)?(?:url\s+|page\s+)?{Q}?(?P<value>(?:https?://|/)[^\s'“”‘’]+?){Q}?{END}"
            ),
        ),
        builtin("quoted_literal", format!(r"{Q}(?P<value>{NQ}+){Q}")),
    ]
});

/// Run `patterns` in order and return the first match
pub fn first_match(patterns: &[ValuePattern], text: &str) -> Option<ValueMatch> {
    patterns.iter().find_map(|p| p.extract(text))
}
