//! Keyword tables, text normalization and local pattern signals

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

/// Confidentiality marking terms
pub const CONFIDENTIALITY_KEYWORDS: &[&str] =
    &["confidential", "private", "restricted", "secret", "sensitive"];

/// Non-disclosure agreement terms
pub const NDA_KEYWORDS: &[&str] = &["nda", "non-disclosure", "confidential", "agreement", "secret"];

/// Execution / signature block terms
pub const SIGNATURE_KEYWORDS: &[&str] = &["sign", "signature", "date", "signed", "execute", "approval"];

/// Data protection terms
pub const DATA_PROTECTION_KEYWORDS: &[&str] = &[
    "data",
    "privacy",
    "protection",
    "personal",
    "information",
    "secure",
];

/// Liability clause terms
pub const LIABILITY_KEYWORDS: &[&str] = &[
    "liability",
    "responsibility",
    "limit",
    "clause",
    "legal",
    "risk",
];

/// Payment terms
pub const PAYMENT_KEYWORDS: &[&str] = &[
    "payment", "due", "terms", "money", "cost", "invoice", "charge",
];

/// Built-in fallback table: rule name and the terms that flag it
pub const FALLBACK_RULES: &[(&str, &[&str])] = &[
    ("Confidentiality Marking", CONFIDENTIALITY_KEYWORDS),
    ("NDA Check", NDA_KEYWORDS),
    ("Signature Requirement", SIGNATURE_KEYWORDS),
    ("Data Protection Clause", DATA_PROTECTION_KEYWORDS),
    ("Liability Clause Requirement", LIABILITY_KEYWORDS),
    ("Payment Terms Specification", PAYMENT_KEYWORDS),
];

/// Rule whose local check also looks for a dated signature
pub const SIGNATURE_RULE: &str = "Signature Requirement";

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^a-z0-9\s]").unwrap();
    static ref DATED_SIGNATURE: Regex = Regex::new(
        r"(?is)\b(signature|signed)\b.*(\bdate\b|\bdated\b|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4})"
    )
    .unwrap();
}

/// Lowercase, turn hyphens and underscores into spaces, drop other punctuation.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['-', '_'], " ");
    NON_WORD.replace_all(&lowered, "").into_owned()
}

/// True if the text has a signature keyword followed by a date-like token.
pub fn has_dated_signature(text: &str) -> bool {
    DATED_SIGNATURE.is_match(text)
}

/// Cheap local evidence that a rule's pattern is present in a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalSignal {
    pub exact: bool,
    pub case_insensitive: bool,
    pub regex: bool,
    pub rule_override: bool,
}

impl LocalSignal {
    pub fn matched(&self) -> bool {
        self.exact || self.case_insensitive || self.regex || self.rule_override
    }
}

/// Match a rule's pattern against the text every cheap way we know.
///
/// An empty pattern never matches. A pattern that is not a valid regular
/// expression only loses the regex component.
pub fn local_signal(rule_name: &str, pattern: &str, text: &str) -> LocalSignal {
    let mut signal = LocalSignal::default();

    if !pattern.is_empty() {
        signal.exact = text.contains(pattern);
        signal.case_insensitive = text.to_lowercase().contains(&pattern.to_lowercase());
        signal.regex = match Regex::new(pattern) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                debug!(rule = %rule_name, error = %e, "Rule pattern is not a valid regex");
                false
            }
        };
    }

    if rule_name == SIGNATURE_RULE {
        signal.rule_override = has_dated_signature(text);
    }

    debug!(rule = %rule_name, ?signal, "Local pattern signal");
    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("Non-Disclosure_Agreement!"), "non disclosure agreement");
        assert_eq!(normalize("  $100.00 due "), "  10000 due ");
    }

    #[test]
    fn test_dated_signature() {
        assert!(has_dated_signature("Signed by the parties. Date: 2024-01-01"));
        assert!(has_dated_signature("Signature ______ 12/31/2024"));
        assert!(!has_dated_signature("Signature ______"));
        assert!(!has_dated_signature("Dated 12/31/2024, to be signed later"));
    }

    #[test]
    fn test_local_signal_components() {
        let signal = local_signal("Confidentiality Marking", "Confidential", "CONFIDENTIAL - internal");
        assert!(!signal.exact);
        assert!(signal.case_insensitive);
        assert!(!signal.regex);
        assert!(signal.matched());

        let signal = local_signal("Clause", r"(?i)governing\s+law", "Governing   law: Delaware");
        assert!(signal.regex);
        assert!(signal.matched());
    }

    #[test]
    fn test_local_signal_invalid_regex_falls_back_to_substring() {
        let signal = local_signal("Broken", "fee (", "a late fee (5%) applies");
        assert!(signal.exact);
        assert!(!signal.regex);
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let signal = local_signal("Anything", "", "some text");
        assert!(!signal.matched());
    }

    #[test]
    fn test_signature_override() {
        let signal = local_signal(SIGNATURE_RULE, "^$never", "Signed: J. Doe, Date: 1/2/2024");
        assert!(signal.rule_override);
        assert!(signal.matched());
    }
}
