//! PII redaction — replaces identifying substrings with placeholders.
//!
//! This is a heuristic, best-effort filter. It catches the obvious cases
//! (emails, phone numbers, street addresses, name-like runs of capitalized
//! words) so raw PII is not shipped to the external classifier. It is NOT a
//! guarantee of complete PII removal and must not be relied on for
//! compliance.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap());

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+\s+(?:[A-Z][a-z]*\s*)+(?i:st|street|ave|avenue|rd|road|dr|drive|ln|lane|blvd|boulevard)\b")
        .unwrap()
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:[A-Z][a-z]+\s)+[A-Z][a-z]+\b").unwrap());

/// Pluggable redaction strategy.
pub trait Redact: Send + Sync {
    /// Replace identifying substrings with placeholders. Total — never fails.
    fn redact(&self, text: &str) -> String;
}

/// Default regex-based redactor.
///
/// Replacement order matters: emails, phone numbers, and addresses are
/// substituted before the generic capitalized-word-sequence rule so that
/// placeholders are not re-matched as names.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexRedactor;

impl RegexRedactor {
    pub fn new() -> Self {
        Self
    }
}

impl Redact for RegexRedactor {
    fn redact(&self, text: &str) -> String {
        let text = EMAIL_RE.replace_all(text, "[EMAIL]");
        let text = PHONE_RE.replace_all(&text, "[PHONE]");
        let text = ADDRESS_RE.replace_all(&text, "[ADDRESS]");
        let text = NAME_RE.replace_all(&text, "[NAME]");
        text.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact(text: &str) -> String {
        RegexRedactor::new().redact(text)
    }

    #[test]
    fn replaces_emails() {
        assert_eq!(
            redact("contact me at alice.smith@example.com please"),
            "contact me at [EMAIL] please"
        );
    }

    #[test]
    fn replaces_phone_numbers() {
        assert_eq!(redact("call 555-123-4567 now"), "call [PHONE] now");
        assert_eq!(redact("call 5551234567 now"), "call [PHONE] now");
        assert_eq!(redact("call 555.123.4567 now"), "call [PHONE] now");
    }

    #[test]
    fn replaces_addresses() {
        assert_eq!(
            redact("I live at 123 Main Street ok"),
            "I live at [ADDRESS] ok"
        );
        assert_eq!(redact("meet at 42 Oak Ave today"), "meet at [ADDRESS] today");
    }

    #[test]
    fn replaces_name_sequences() {
        assert_eq!(redact("ask John Smith about it"), "ask [NAME] about it");
        // A single capitalized word is not a name match.
        assert_eq!(redact("ask John about it"), "ask John about it");
    }

    #[test]
    fn email_wins_over_name_rule() {
        // The email is replaced first, so the name rule never sees it.
        let out = redact("Reach Jane Doe at jane@corp.io");
        assert_eq!(out, "Reach [NAME] at [EMAIL]");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(redact("  hello  "), "hello");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "mail bob@x.org or 555-123-4567",
            "Jane Doe lives at 9 Elm Road",
            "nothing sensitive here",
            "",
        ];
        for s in samples {
            let once = redact(s);
            assert_eq!(redact(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn placeholders_are_not_rematched() {
        for p in ["[EMAIL]", "[PHONE]", "[ADDRESS]", "[NAME]"] {
            assert_eq!(redact(p), p);
        }
    }

    #[test]
    fn total_on_arbitrary_input() {
        // Never panics, whatever comes in.
        redact("📷 image");
        redact("\u{0}\u{7f}");
        redact(&"A".repeat(10_000));
    }
}
