//! Natural-language instruction interpreter.
//!
//! Turns one free-text test step into a [`ParsedAction`]. Interpretation is
//! pure and total: every input yields an action, with `Unknown` as the
//! fallback kind and `None` as the fallback value.

pub mod patterns;
pub mod types;

pub use patterns::{BUILTIN_PATTERNS, ValueMatch, ValuePattern};
pub use types::{ActionKind, Instruction, ParsedAction, RiskClass};

use once_cell::sync::Lazy;
use regex::Regex;

/// Step numbering, bullets and filler words at the start of an instruction
static LEADING_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:step\s*)?\d+\s*[.):\-]\s*|[-*•]\s+)?(?:(?:then|and|now|next|finally|please)\s*,?\s+)*",
    )
    .expect("leading noise regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Field-noun cues marking a dropdown control
static DROPDOWN_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:drop-?\s?down|select|selector|options?|combo\s*box|list\s*box)\b")
        .expect("dropdown cue regex")
});

/// Payment and billing field vocabulary
static SENSITIVE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(?:
            credit\s*card | debit\s*card | card\s*(?:number|no\.?|holder) | cardholder
            | name\s+on\s+(?:the\s+)?card | cc\s*(?:number|num)
            | cvv2? | cvc2? | csc | security\s+code | card\s+verification
            | expir(?:y|ation)(?:\s+(?:month|year|date))? | exp\.?\s*(?:month|year|date)
            | billing\s+(?:address|zip|postal(?:\s+code)?|post\s*code|city|state|country|name|first\s+name|last\s+name|phone)
        )\b",
    )
    .expect("sensitive field regex")
});

const DROPDOWN_VERBS: &[&str] = &["select", "choose", "pick", "set", "option"];
const NAVIGATE_VERBS: &[&str] = &["navigate", "goto", "browse", "visit"];
const ASSERT_VERBS: &[&str] = &[
    "verify", "assert", "ensure", "expect", "validate", "confirm", "should", "see",
];
const FILL_VERBS: &[&str] = &["enter", "input", "type", "fill", "populate", "set", "key"];
const CLICK_VERBS: &[&str] = &[
    "click", "press", "tap", "hit", "select", "choose", "pick", "check", "uncheck", "toggle",
    "submit", "open", "expand", "accept", "dismiss",
];

/// Interpreter over an ordered table of value patterns
#[derive(Debug, Clone)]
pub struct InstructionInterpreter {
    patterns: Vec<ValuePattern>,
}

impl Default for InstructionInterpreter {
    fn default() -> Self {
        Self {
            patterns: BUILTIN_PATTERNS.clone(),
        }
    }
}

impl InstructionInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern after the built-in ones
    pub fn with_pattern(mut self, pattern: ValuePattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn patterns(&self) -> &[ValuePattern] {
        &self.patterns
    }

    pub fn extract_value(&self, text: &str) -> Option<ValueMatch> {
        patterns::first_match(&self.patterns, &normalize(text))
    }

    pub fn interpret(&self, text: &str) -> ParsedAction {
        let norm = normalize(text);
        let kind = classify(&norm);
        let matched = patterns::first_match(&self.patterns, &norm);

        let risk_class = if is_sensitive(&norm, kind) {
            RiskClass::Sensitive
        } else {
            RiskClass::Normal
        };

        let target_hint = matched
            .as_ref()
            .and_then(|m| m.target.clone())
            .map(|t| trim_article(&t).to_string())
            .unwrap_or_else(|| fallback_target(&norm, kind));

        ParsedAction {
            kind,
            target_hint,
            literal_value: matched.as_ref().map(|m| m.value.clone()),
            risk_class,
            value_pattern: matched.map(|m| m.pattern),
        }
    }
}

static DEFAULT_INTERPRETER: Lazy<InstructionInterpreter> = Lazy::new(InstructionInterpreter::default);

/// Interpret with the built-in pattern table
pub fn interpret(text: &str) -> ParsedAction {
    DEFAULT_INTERPRETER.interpret(text)
}

/// Extract the literal value with the built-in pattern table
pub fn extract_value(text: &str) -> Option<String> {
    DEFAULT_INTERPRETER.extract_value(text).map(|m| m.value)
}

/// True when the leading verb is a selection verb and a dropdown cue follows it
pub fn is_dropdown_instruction(text: &str) -> bool {
    let norm = normalize(text);
    let (verb, rest) = split_verb(&norm);
    DROPDOWN_VERBS.contains(&verb.as_str()) && DROPDOWN_CUE.is_match(rest)
}

/// True when a fill or select step targets payment or billing fields
pub fn is_payment_instruction(text: &str) -> bool {
    let norm = normalize(text);
    is_sensitive(&norm, classify(&norm))
}

fn is_sensitive(norm: &str, kind: ActionKind) -> bool {
    matches!(kind, ActionKind::Fill | ActionKind::Select) && SENSITIVE_FIELD.is_match(norm)
}

/// Strip numbering and filler, collapse whitespace
pub fn normalize(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    LEADING_NOISE.replace(&collapsed, "").trim().to_string()
}

/// Lowercased first word and the remainder
fn split_verb(norm: &str) -> (String, &str) {
    let (first, rest) = norm.split_once(' ').unwrap_or((norm, ""));
    let verb = first
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    (verb, rest.trim())
}

fn classify(norm: &str) -> ActionKind {
    let (verb, rest) = split_verb(norm);
    let rest_lower = rest.to_lowercase();

    if DROPDOWN_VERBS.contains(&verb.as_str()) && DROPDOWN_CUE.is_match(rest) {
        return ActionKind::Select;
    }
    if NAVIGATE_VERBS.contains(&verb.as_str())
        || (verb == "go" && (rest_lower.starts_with("to ") || rest_lower.starts_with("back")))
        || (matches!(verb.as_str(), "open" | "load")
            && (rest_lower.contains("http://") || rest_lower.contains("https://") || rest.starts_with('/')))
    {
        return ActionKind::Navigate;
    }
    if ASSERT_VERBS.contains(&verb.as_str())
        || (verb == "check"
            && (rest_lower.starts_with("that ") || rest_lower.starts_with("if ") || rest_lower.starts_with("whether ")))
    {
        return ActionKind::Assert;
    }
    if FILL_VERBS.contains(&verb.as_str()) {
        return ActionKind::Fill;
    }
    if CLICK_VERBS.contains(&verb.as_str()) {
        return ActionKind::Click;
    }
    ActionKind::Unknown
}

fn trim_article(text: &str) -> &str {
    let t = text.trim().trim_end_matches(['.', '!']).trim();
    for article in ["the ", "The ", "a ", "A ", "an ", "An "] {
        if let Some(rest) = t.strip_prefix(article) {
            return rest.trim();
        }
    }
    t
}

/// Target hint when no pattern named the field: the text after the verb
fn fallback_target(norm: &str, kind: ActionKind) -> String {
    let (_, rest) = split_verb(norm);
    let rest = match kind {
        ActionKind::Click => rest.strip_prefix("on ").unwrap_or(rest),
        ActionKind::Navigate => rest.strip_prefix("to ").unwrap_or(rest),
        ActionKind::Assert => ["that ", "if ", "whether "]
            .iter()
            .find_map(|p| rest.strip_prefix(p))
            .unwrap_or(rest),
        ActionKind::Unknown => norm,
        _ => rest,
    };
    trim_article(rest).to_string()
}
