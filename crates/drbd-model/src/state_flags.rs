//! Derived status flags shared by resources, connections and volumes.

use std::fmt;

/// Reported state of an object.
///
/// `Alert` dominates `Warn`, which dominates `Mark`. `Mark` means the
/// object itself is fine but one of its children is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlagState {
    Norm,
    Mark,
    Warn,
    Alert,
}

impl FlagState {
    #[must_use]
    pub fn is_norm(self) -> bool {
        self == Self::Norm
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Norm => "NORM",
            Self::Mark => "MARK",
            Self::Warn => "WARN",
            Self::Alert => "ALERT",
        }
    }
}

impl fmt::Display for FlagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum Severity {
    #[default]
    Norm,
    Warn,
    Alert,
}

/// Tri-state severity plus an independent mark bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags {
    severity: Severity,
    mark: bool,
}

impl StateFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> FlagState {
        match self.severity {
            Severity::Alert => FlagState::Alert,
            Severity::Warn => FlagState::Warn,
            Severity::Norm if self.mark => FlagState::Mark,
            Severity::Norm => FlagState::Norm,
        }
    }

    pub fn set_mark(&mut self) {
        self.mark = true;
    }

    pub fn set_warn(&mut self) {
        if self.severity < Severity::Warn {
            self.severity = Severity::Warn;
        }
    }

    pub fn set_alert(&mut self) {
        self.severity = Severity::Alert;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the raw mark bit is set, independent of severity.
    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.mark
    }

    /// Anything other than NORM.
    #[must_use]
    pub fn has_mark(&self) -> bool {
        !self.state().is_norm()
    }

    #[must_use]
    pub fn has_warn(&self) -> bool {
        self.severity >= Severity::Warn
    }

    #[must_use]
    pub fn has_alert(&self) -> bool {
        self.severity == Severity::Alert
    }
}

/// Status flag computation implemented by every entity of the model.
///
/// `update_state_flags` evaluates the object's own fields from scratch.
/// `child_state_flags_changed` is the upward step, called on a parent
/// whenever one of its children crossed the NORM boundary.
pub trait StateFlagged {
    fn state_flags(&self) -> &StateFlags;

    fn update_state_flags(&mut self) -> FlagState;

    fn child_state_flags_changed(&mut self) -> FlagState;

    fn clear_state_flags(&mut self);

    fn state(&self) -> FlagState {
        self.state_flags().state()
    }

    fn has_mark_state(&self) -> bool {
        self.state_flags().has_mark()
    }

    fn has_warn_state(&self) -> bool {
        self.state_flags().has_warn()
    }

    fn has_alert_state(&self) -> bool {
        self.state_flags().has_alert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_dominates_warn_and_mark() {
        let mut flags = StateFlags::new();
        assert_eq!(flags.state(), FlagState::Norm);
        flags.set_mark();
        assert_eq!(flags.state(), FlagState::Mark);
        flags.set_alert();
        flags.set_warn();
        assert_eq!(flags.state(), FlagState::Alert);
        assert!(flags.has_warn());
        assert!(flags.is_marked());
    }

    #[test]
    fn clear_resets_severity_and_mark() {
        let mut flags = StateFlags::new();
        flags.set_warn();
        flags.set_mark();
        assert_eq!(flags.state(), FlagState::Warn);
        assert!(!flags.has_alert());
        flags.clear();
        assert_eq!(flags, StateFlags::default());
        assert!(!flags.has_mark());
    }
}
