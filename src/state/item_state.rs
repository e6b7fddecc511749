/// Queue item state definitions
///
/// Every work item moves through
/// `Queued -> Running -> {Completed | Backoff -> Queued | Failed}`.
use crate::CrawlError;
use std::fmt;

/// Represents the current state of an item in the request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    /// Item is waiting in the frontier
    Queued,

    /// Item has been handed to the process function
    Running,

    /// Item failed transiently and is waiting out its retry delay
    Backoff,

    // ===== Terminal States =====
    /// Item was processed successfully
    Completed,

    /// Item failed permanently (non-retryable or out of retries)
    Failed,
}

impl ItemState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if moving from this state to `next` is a legal transition
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Backoff)
                | (Self::Running, Self::Failed)
                | (Self::Backoff, Self::Queued)
        )
    }

    /// Moves to `next`, rejecting illegal transitions
    pub fn transition(self, next: ItemState) -> Result<ItemState, CrawlError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CrawlError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Backoff => "backoff",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!ItemState::Queued.is_terminal());
        assert!(!ItemState::Running.is_terminal());
        assert!(!ItemState::Backoff.is_terminal());

        assert!(ItemState::Completed.is_terminal());
        assert!(ItemState::Failed.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        let path = [
            (ItemState::Queued, ItemState::Running),
            (ItemState::Running, ItemState::Backoff),
            (ItemState::Backoff, ItemState::Queued),
            (ItemState::Running, ItemState::Completed),
            (ItemState::Running, ItemState::Failed),
        ];

        for (from, to) in path {
            assert_eq!(from.transition(to).unwrap(), to);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(ItemState::Queued.transition(ItemState::Completed).is_err());
        assert!(ItemState::Backoff.transition(ItemState::Running).is_err());
        assert!(ItemState::Completed.transition(ItemState::Queued).is_err());
        assert!(ItemState::Failed.transition(ItemState::Running).is_err());

        match ItemState::Completed.transition(ItemState::Running) {
            Err(CrawlError::InvalidTransition { from, to }) => {
                assert_eq!(from, ItemState::Completed);
                assert_eq!(to, ItemState::Running);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ItemState::Queued), "queued");
        assert_eq!(format!("{}", ItemState::Backoff), "backoff");
    }
}
