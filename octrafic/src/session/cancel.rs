use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cancels whatever turn is running.
///
/// Each turn arms a fresh token, so a cancel that lands while idle does not
/// leak into the next turn. Clones share the same switch.
#[derive(Debug, Clone, Default)]
pub struct CancelSwitch {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancelSwitch {
    /// A switch with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the token for a new turn and return it.
    #[must_use]
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// Cancel the armed turn.
    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Returns `true` if the armed turn was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_resets() {
        let switch = CancelSwitch::new();
        let first = switch.arm();
        switch.clone().cancel();
        assert!(first.is_cancelled());

        let second = switch.arm();
        assert!(!second.is_cancelled());
        assert!(!switch.is_cancelled());
    }
}
