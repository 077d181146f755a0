//! Shared-secret admin gate.
//!
//! A soft gate in front of mutation affordances, not a security boundary.

use std::fmt;

use crate::util::normalize_text_option;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct AdminGate {
    secret: Option<String>,
}

impl fmt::Debug for AdminGate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AdminGate")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AdminGate {
    /// A blank secret yields a gate that never unlocks.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: normalize_text_option(Some(secret.into())),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub const fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Compare a candidate against the shared secret, ignoring surrounding whitespace.
    pub fn unlock(&self, candidate: &str) -> bool {
        match &self.secret {
            Some(secret) => {
                let candidate = candidate.trim();
                !candidate.is_empty() && candidate == secret
            }
            None => false,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocks_with_matching_secret() {
        let gate = AdminGate::new("open-sesame");
        assert!(gate.unlock("open-sesame"));
        assert!(gate.unlock("  open-sesame\n"));
        assert!(!gate.unlock("open"));
        assert!(!gate.unlock(""));
    }

    #[test]
    fn blank_secret_never_unlocks() {
        let gate = AdminGate::new("   ");
        assert!(!gate.is_configured());
        assert!(!gate.unlock(""));
        assert!(!gate.unlock("   "));
        assert!(!AdminGate::disabled().unlock("anything"));
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", AdminGate::new("sensitive-gate-secret"));
        assert!(!debug.contains("sensitive-gate-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
