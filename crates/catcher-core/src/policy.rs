//! Dispatch policy: which faults get diagnosed
//!
//! Rule, first match wins:
//! 1. kind in the ignore set → skip (the exact kind only)
//! 2. mode `All` → diagnose
//! 3. handled set holds `UNHANDLED`, the kind, or a registered parent → diagnose
//! 4. skip
//!
//! Custom prompts are looked up by exact kind name; parents are not walked.

use crate::fault::Fault;
use crate::settings::Settings;
use std::collections::{HashMap, HashSet};

/// Handled-list sentinel: every fault that reaches the top of an adapter
pub const UNHANDLED: &str = "UNHANDLED";

/// Handled-list sentinel: every fault an adapter observes
pub const ALL: &str = "ALL";

/// Which faults an adapter considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingMode {
    /// Faults that propagate to the adapter
    Unhandled,
    /// Every fault the adapter observes
    All,
}

impl HandlingMode {
    /// Sentinel name of the mode
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unhandled => UNHANDLED,
            Self::All => ALL,
        }
    }
}

/// Compiled handled/ignored sets and custom prompts
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    handled: HashSet<String>,
    ignored: HashSet<String>,
    custom_prompts: HashMap<String, String>,
}

impl DispatchPolicy {
    /// Compile the policy from resolved settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            handled: settings.handled_exceptions.iter().cloned().collect(),
            ignored: settings.ignore_exceptions.iter().cloned().collect(),
            custom_prompts: settings.custom_handlers.clone(),
        }
    }

    /// Mode implied by the handled list
    #[must_use]
    pub fn mode(&self) -> HandlingMode {
        if self.handled.contains(ALL) {
            HandlingMode::All
        } else {
            HandlingMode::Unhandled
        }
    }

    /// Whether the fault's kind is in the ignore set
    #[must_use]
    pub fn is_ignored(&self, fault: &Fault) -> bool {
        self.ignored.contains(fault.kind().name())
    }

    /// Decide whether `fault` should be diagnosed under `mode`
    #[must_use]
    pub fn should_handle(&self, fault: &Fault, mode: HandlingMode) -> bool {
        if self.is_ignored(fault) {
            return false;
        }
        if mode == HandlingMode::All {
            return true;
        }
        self.handled.contains(UNHANDLED)
            || self.handled.contains(fault.kind().name())
            || fault
                .parents()
                .iter()
                .any(|parent| self.handled.contains(parent.name()))
    }

    /// Custom instruction registered for the fault's exact kind
    #[must_use]
    pub fn custom_prompt(&self, fault: &Fault) -> Option<&str> {
        self.custom_prompts
            .get(fault.kind().name())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::trace::StackTrace;

    fn fault(kind: FaultKind) -> Fault {
        Fault::with_trace(kind, "boom", StackTrace::default())
    }

    fn policy(handled: &[&str], ignored: &[&str]) -> DispatchPolicy {
        let settings = Settings::openai("sk-test")
            .with_handled(handled.iter().copied())
            .with_ignored(ignored.iter().copied());
        DispatchPolicy::from_settings(&settings)
    }

    const KINDS: &[&str] = &[
        "Panic",
        "DivideByZero",
        "InvalidInput",
        "NotFound",
        "Parse",
        "Interrupted",
        "CheckoutError",
    ];

    #[test]
    fn test_ignored_kinds_are_never_handled() {
        let policy = policy(&["ALL", "Interrupted"], &["Interrupted", "CheckoutError"]);
        for name in ["Interrupted", "CheckoutError"] {
            let fault = fault(FaultKind::from_name(name));
            assert!(!policy.should_handle(&fault, HandlingMode::All));
            assert!(!policy.should_handle(&fault, HandlingMode::Unhandled));
        }
    }

    #[test]
    fn test_unhandled_mode_matches_handled_set() {
        let policy = policy(&["InvalidInput", "Parse"], &[]);
        assert_eq!(policy.mode(), HandlingMode::Unhandled);

        for name in KINDS {
            let expected = matches!(*name, "InvalidInput" | "Parse");
            let fault = fault(FaultKind::from_name(name));
            assert_eq!(
                policy.should_handle(&fault, HandlingMode::Unhandled),
                expected,
                "{name}"
            );
        }
    }

    #[test]
    fn test_all_mode_handles_everything_not_ignored() {
        let policy = policy(&["ALL"], &["Parse"]);
        assert_eq!(policy.mode(), HandlingMode::All);

        for name in KINDS {
            let fault = fault(FaultKind::from_name(name));
            assert_eq!(
                policy.should_handle(&fault, policy.mode()),
                *name != "Parse",
                "{name}"
            );
        }
    }

    #[test]
    fn test_unhandled_sentinel_handles_any_kind() {
        let policy = policy(&[UNHANDLED], &["Interrupted"]);
        assert!(policy.should_handle(&fault(FaultKind::NotFound), HandlingMode::Unhandled));
        assert!(policy.should_handle(
            &fault(FaultKind::Other("CheckoutError".into())),
            HandlingMode::Unhandled
        ));
        assert!(!policy.should_handle(&fault(FaultKind::Interrupted), HandlingMode::Unhandled));
    }

    #[test]
    fn test_parent_kinds_match_handled_set() {
        let policy = policy(&["Panic"], &[]);
        let divide = fault(FaultKind::DivideByZero).with_parent(FaultKind::Panic);
        assert!(policy.should_handle(&divide, HandlingMode::Unhandled));

        // Ignoring the parent does not ignore the child
        let policy = self::policy(&[UNHANDLED], &["Panic"]);
        assert!(policy.should_handle(&divide, HandlingMode::Unhandled));
    }

    #[test]
    fn test_custom_prompt_exact_match() {
        let settings = Settings::openai("sk-test")
            .with_custom_handler("InvalidInput", "Focus on the payload.")
            .with_custom_handler("Panic", "Explain the panic.");
        let policy = DispatchPolicy::from_settings(&settings);

        assert_eq!(
            policy.custom_prompt(&fault(FaultKind::InvalidInput)),
            Some("Focus on the payload.")
        );
        assert_eq!(policy.custom_prompt(&fault(FaultKind::Parse)), None);
        // No parent walk
        let divide = fault(FaultKind::DivideByZero).with_parent(FaultKind::Panic);
        assert_eq!(policy.custom_prompt(&divide), None);
    }
}
