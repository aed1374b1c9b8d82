//! Sender and subject filters.

use regex::{Regex, RegexBuilder};

/// Outcome of running a message through the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Deliver the message.
    Forward,
    /// Do not deliver; the message is still marked seen.
    Skip(SkipReason),
}

/// Why a message was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sender did not match the allow-pattern.
    SenderNotAllowed,
    /// The sender matched the deny-pattern.
    SenderDenied,
    /// The subject matched the deny-pattern.
    SubjectDenied,
}

impl SkipReason {
    /// Short description for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SenderNotAllowed => "sender not in whitelist",
            Self::SenderDenied => "sender blacklisted",
            Self::SubjectDenied => "subject blacklisted",
        }
    }
}

/// Compiled filter patterns.
///
/// Patterns are case-insensitive and match anywhere in the value. An
/// allow-pattern, when present, makes the sender deny-pattern irrelevant.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    sender_allow: Option<Regex>,
    sender_deny: Option<Regex>,
    subject_deny: Option<Regex>,
}

impl FilterRule {
    /// Compiles the given patterns. A pattern that fails to compile is
    /// logged and left disabled.
    #[must_use]
    pub fn new(
        sender_allow: Option<&str>,
        sender_deny: Option<&str>,
        subject_deny: Option<&str>,
    ) -> Self {
        Self {
            sender_allow: compile("sender whitelist", sender_allow),
            sender_deny: compile("sender blacklist", sender_deny),
            subject_deny: compile("subject blacklist", subject_deny),
        }
    }

    /// Returns `true` if any pattern is in effect.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.sender_allow.is_some() || self.sender_deny.is_some() || self.subject_deny.is_some()
    }

    /// Decides whether a message with this sender and subject is forwarded.
    #[must_use]
    pub fn decide(&self, sender: &str, subject: &str) -> FilterDecision {
        if let Some(allow) = &self.sender_allow {
            if !allow.is_match(sender) {
                return FilterDecision::Skip(SkipReason::SenderNotAllowed);
            }
        } else if let Some(deny) = &self.sender_deny
            && deny.is_match(sender)
        {
            return FilterDecision::Skip(SkipReason::SenderDenied);
        }

        if let Some(deny) = &self.subject_deny
            && deny.is_match(subject)
        {
            return FilterDecision::Skip(SkipReason::SubjectDenied);
        }

        FilterDecision::Forward
    }
}

fn compile(name: &str, pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?.trim();
    if pattern.is_empty() {
        return None;
    }
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => {
            tracing::info!(filter = name, pattern, "Filter enabled");
            Some(regex)
        }
        Err(e) => {
            tracing::error!(filter = name, pattern, error = %e, "Invalid filter pattern, filter disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_patterns_forwards() {
        let rule = FilterRule::default();
        assert!(!rule.is_active());
        assert_eq!(rule.decide("a@b.c", "hi"), FilterDecision::Forward);
    }

    #[test]
    fn test_allow_pattern_takes_precedence() {
        let rule = FilterRule::new(Some("@example\\.com"), Some("boss"), None);
        assert_eq!(
            rule.decide("Boss <boss@EXAMPLE.com>", "x"),
            FilterDecision::Forward
        );
        assert_eq!(
            rule.decide("spam@other.org", "x"),
            FilterDecision::Skip(SkipReason::SenderNotAllowed)
        );
    }

    #[test]
    fn test_deny_pattern_without_allow() {
        let rule = FilterRule::new(None, Some("noreply"), None);
        assert_eq!(
            rule.decide("NoReply@shop.com", "x"),
            FilterDecision::Skip(SkipReason::SenderDenied)
        );
        assert_eq!(rule.decide("friend@home.net", "x"), FilterDecision::Forward);
    }

    #[test]
    fn test_subject_deny_applies_after_sender() {
        let rule = FilterRule::new(Some("example"), None, Some("^\\[spam\\]"));
        assert_eq!(
            rule.decide("a@example.com", "[SPAM] buy now"),
            FilterDecision::Skip(SkipReason::SubjectDenied)
        );
        assert_eq!(
            rule.decide("a@example.com", "re: [spam]"),
            FilterDecision::Forward
        );
    }

    #[test]
    fn test_invalid_pattern_is_disabled() {
        let rule = FilterRule::new(Some("(unclosed"), None, Some("  "));
        assert!(!rule.is_active());
        assert_eq!(rule.decide("anyone", "anything"), FilterDecision::Forward);
    }
}
