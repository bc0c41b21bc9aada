//! Deterministic element lookup.
//!
//! Produces an ordered list of candidate selectors for a target hint. Payment
//! fields resolve through stable `autocomplete`/`name` attributes first; other
//! hints fall back to label, aria and placeholder matching.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::interpreter::ActionKind;

/// Known field semantics and the selectors that identify them
struct FieldSemantics {
    cue: Regex,
    selectors: &'static [&'static str],
}

fn field(cue: &str, selectors: &'static [&'static str]) -> FieldSemantics {
    FieldSemantics {
        cue: Regex::new(cue).expect("field cue regex"),
        selectors,
    }
}

static FIELD_SEMANTICS: Lazy<Vec<FieldSemantics>> = Lazy::new(|| {
    vec![
        field(
            r"(?i)\b(?:credit|debit)?\s*card\s*(?:number|no)\b|\bcc\s*(?:number|num)\b",
            &[
                "input[autocomplete='cc-number']",
                "input[name='cardnumber']",
                "input[name*='card_number' i]",
                "input[name*='cardNumber' i]",
                "#card-number",
                "#cardNumber",
                "//input[contains(translate(@placeholder, 'CARDNUMBER', 'cardnumber'), 'card number')]",
            ],
        ),
        field(
            r"(?i)\bexp(?:iry|iration|\.)?\s*month\b",
            &[
                "select[autocomplete='cc-exp-month']",
                "select[name*='exp_month' i]",
                "select[name*='expiryMonth' i]",
                "#expiry-month",
                "#exp-month",
                "//select[contains(translate(@name, 'MONTH', 'month'), 'month')]",
            ],
        ),
        field(
            r"(?i)\bexp(?:iry|iration|\.)?\s*year\b",
            &[
                "select[autocomplete='cc-exp-year']",
                "select[name*='exp_year' i]",
                "select[name*='expiryYear' i]",
                "#expiry-year",
                "#exp-year",
                "//select[contains(translate(@name, 'YEAR', 'year'), 'year')]",
            ],
        ),
        field(
            r"(?i)\bexp(?:iry|iration)\s+date\b|\bexp(?:iry|iration)(?:\s+(?:field|input|box))?\s*$",
            &[
                "input[autocomplete='cc-exp']",
                "input[name*='expiry' i]",
                "input[name*='exp_date' i]",
                "#expiry",
                "#expiry-date",
            ],
        ),
        field(
            r"(?i)\b(?:cvv2?|cvc2?|csc|security\s+code|card\s+verification)\b",
            &[
                "input[autocomplete='cc-csc']",
                "input[name*='cvv' i]",
                "input[name*='cvc' i]",
                "input[name*='securityCode' i]",
                "#cvv",
                "#cvc",
            ],
        ),
        field(
            r"(?i)\b(?:card\s*holder|cardholder|name\s+on\s+(?:the\s+)?card)\b",
            &[
                "input[autocomplete='cc-name']",
                "input[name*='cardholder' i]",
                "input[name*='card_name' i]",
                "#cardholder-name",
                "#card-name",
            ],
        ),
        field(
            r"(?i)\bbilling\s+(?:zip|postal(?:\s+code)?|post\s*code)\b",
            &[
                "[autocomplete='billing postal-code']",
                "input[name*='billing_zip' i]",
                "input[name*='billingPostalCode' i]",
                "#billing-zip",
            ],
        ),
        field(
            r"(?i)\bbilling\s+address\b",
            &[
                "[autocomplete='billing address-line1']",
                "input[name*='billing_address' i]",
                "input[name*='billingAddress' i]",
                "#billing-address",
            ],
        ),
        field(
            r"(?i)\bbilling\s+city\b",
            &["[autocomplete='billing address-level2']", "input[name*='billing_city' i]", "#billing-city"],
        ),
        field(
            r"(?i)\bbilling\s+country\b",
            &["[autocomplete='billing country']", "select[name*='billing_country' i]", "#billing-country"],
        ),
    ]
});

/// Control nouns stripped from a hint to recover the field label
static CONTROL_NOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\b(?:drop-?\s?down|select(?:\s+box)?|field|input|text\s*box|box|button|link|tab|checkbox|option|menu)\b\s*")
        .expect("control noun regex")
});

/// Whether a hint is already a selector the driver understands
pub fn looks_like_selector(hint: &str) -> bool {
    let h = hint.trim();
    h.starts_with('#')
        || h.starts_with('.')
        || h.starts_with('[')
        || h.starts_with("//")
        || h.starts_with("xpath=")
        || h.starts_with("css=")
        || h.starts_with("text=")
        || (h.contains('[') && h.ends_with(']'))
}

/// The human label inside a hint, e.g. `Region dropdown` -> `Region`
pub fn field_label(hint: &str) -> String {
    let stripped = CONTROL_NOUN.replace_all(hint, " ");
    let label = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() { hint.trim().to_string() } else { label }
}

fn slug(label: &str, sep: &str) -> String {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(sep)
}

fn push_unique(out: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// Candidate selectors for `hint`, most specific first
pub fn candidates(kind: ActionKind, hint: &str) -> Vec<String> {
    let hint = hint.trim();
    let mut out = Vec::new();
    if hint.is_empty() {
        return out;
    }

    if looks_like_selector(hint) {
        push_unique(&mut out, hint.to_string());
    }

    for semantics in FIELD_SEMANTICS.iter().filter(|f| f.cue.is_match(hint)) {
        for selector in semantics.selectors {
            push_unique(&mut out, selector.to_string());
        }
    }

    let label = field_label(hint);
    let quoted = label.replace('\'', "\\'");
    let tag = match kind {
        ActionKind::Select => "select",
        ActionKind::Fill => "input",
        _ => "*",
    };

    push_unique(&mut out, hint.to_string());
    push_unique(&mut out, label.clone());
    if matches!(kind, ActionKind::Click | ActionKind::Navigate | ActionKind::Unknown) {
        push_unique(&mut out, format!("text={}", label));
    }
    push_unique(&mut out, format!("[aria-label='{}' i]", quoted));
    if kind == ActionKind::Fill {
        push_unique(&mut out, format!("[placeholder='{}' i]", quoted));
    }
    push_unique(&mut out, format!("#{}", slug(&label, "-")));
    push_unique(&mut out, format!("[name='{}']", slug(&label, "_")));
    push_unique(
        &mut out,
        format!("//label[contains(normalize-space(.), '{}')]/following::{}[1]", quoted, tag),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_hint_prefers_stable_attributes() {
        let list = candidates(ActionKind::Fill, "credit card number");
        assert_eq!(list[0], "input[autocomplete='cc-number']");
        assert!(list.contains(&"#card-number".to_string()));
    }

    #[test]
    fn test_expiry_month_and_year_are_distinct() {
        let month = candidates(ActionKind::Select, "expiry month dropdown");
        let year = candidates(ActionKind::Select, "expiry year dropdown");
        assert_eq!(month[0], "select[autocomplete='cc-exp-month']");
        assert_eq!(year[0], "select[autocomplete='cc-exp-year']");
        assert!(!year.contains(&"select[autocomplete='cc-exp-month']".to_string()));
    }

    #[test]
    fn test_generic_hint_candidates() {
        let list = candidates(ActionKind::Select, "Region dropdown");
        assert!(list.contains(&"Region".to_string()));
        assert!(list.contains(&"#region".to_string()));
        assert!(list.contains(&"[name='region']".to_string()));
        assert!(list.iter().any(|c| c.ends_with("/following::select[1]")));
    }

    #[test]
    fn test_selector_hint_goes_first() {
        let list = candidates(ActionKind::Click, "#submit");
        assert_eq!(list[0], "#submit");
    }

    #[test]
    fn test_field_label() {
        assert_eq!(field_label("Continue button"), "Continue");
        assert_eq!(field_label("expiry month dropdown"), "expiry month");
        assert_eq!(field_label("dropdown"), "dropdown");
    }

    #[test]
    fn test_empty_hint_has_no_candidates() {
        assert!(candidates(ActionKind::Click, "  ").is_empty());
    }
}
