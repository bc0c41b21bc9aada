use serde::{Deserialize, Serialize};
use std::fmt;

/// What a step asks the browser to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Fill,
    Select,
    Navigate,
    Assert,
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Navigate => "navigate",
            ActionKind::Assert => "assert",
            ActionKind::Unknown => "unknown",
        }
    }

    /// Whether the action needs a literal value to run
    pub fn needs_value(&self) -> bool {
        matches!(self, ActionKind::Fill | ActionKind::Select)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification steering the executor's strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    #[default]
    Normal,
    /// Payment or credential fields; always resolved deterministically
    Sensitive,
}

/// One natural-language step and its position in the test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub index: usize,
    pub text: String,
}

impl Instruction {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// The typed reading of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub kind: ActionKind,
    /// Free text describing the element (or the URL / expected text)
    pub target_hint: String,
    pub literal_value: Option<String>,
    pub risk_class: RiskClass,
    /// Name of the value pattern that produced `literal_value`
    pub value_pattern: Option<String>,
}

impl ParsedAction {
    pub fn is_sensitive(&self) -> bool {
        self.risk_class == RiskClass::Sensitive
    }

    /// Short human-readable description, e.g. `select "HONG KONG" in Region dropdown`
    pub fn describe(&self) -> String {
        match (&self.kind, &self.literal_value) {
            (ActionKind::Fill | ActionKind::Select, Some(value)) => {
                format!("{} \"{}\" in {}", self.kind, value, self.target_hint)
            }
            (ActionKind::Assert, Some(value)) => format!("assert \"{}\" is present", value),
            _ => format!("{} {}", self.kind, self.target_hint),
        }
    }
}
