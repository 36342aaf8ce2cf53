//! Controller lifecycle state.

/// A controller's position in the lifecycle state machine.
///
/// See `spec.md` §4.3 for the full transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Down,
    Starting,
    Up,
    Stopping,
    Removed,
    StartFailed,
}

impl State {
    /// Whether this state counts as "ready" for dependents (only `Up`).
    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, State::Up)
    }

    /// Whether this state is a terminal point from which only `Removed`
    /// remains reachable.
    #[inline]
    pub fn is_removable_from(self) -> bool {
        matches!(self, State::Down | State::StartFailed)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Down => "DOWN",
            State::Starting => "STARTING",
            State::Up => "UP",
            State::Stopping => "STOPPING",
            State::Removed => "REMOVED",
            State::StartFailed => "START_FAILED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_up_is_up() {
        assert!(State::Up.is_up());
        assert!(!State::Starting.is_up());
    }

    #[test]
    fn removable_from_down_or_start_failed_only() {
        assert!(State::Down.is_removable_from());
        assert!(State::StartFailed.is_removable_from());
        assert!(!State::Up.is_removable_from());
        assert!(!State::Starting.is_removable_from());
        assert!(!State::Stopping.is_removable_from());
    }
}
