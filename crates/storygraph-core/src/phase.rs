//! Per-document merge state machine.
//!
//! ```text
//! Pending ──► EntitiesMerged ──► EdgesMerged ──► Done
//!    │              │                 │
//!    └──────────────┴─────────────────┴──► Failed
//! ```
//!
//! A document that fails after `EntitiesMerged` keeps its entities; the
//! relationship phase can be retried on its own because entity upserts are
//! idempotent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    Pending,
    EntitiesMerged,
    EdgesMerged,
    Done,
    /// Failure, remembering the last phase that completed.
    Failed { after: FailedAfter },
}

/// Last completed phase before a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAfter {
    Pending,
    EntitiesMerged,
    EdgesMerged,
}

impl MergePhase {
    /// Advance to the next phase. `Done` and `Failed` are terminal.
    pub fn advance(self) -> Self {
        match self {
            Self::Pending => Self::EntitiesMerged,
            Self::EntitiesMerged => Self::EdgesMerged,
            Self::EdgesMerged => Self::Done,
            terminal => terminal,
        }
    }

    /// Move to `Failed`, keeping track of where the failure happened.
    pub fn fail(self) -> Self {
        match self {
            Self::Pending => Self::Failed {
                after: FailedAfter::Pending,
            },
            Self::EntitiesMerged => Self::Failed {
                after: FailedAfter::EntitiesMerged,
            },
            Self::EdgesMerged | Self::Done => Self::Failed {
                after: FailedAfter::EdgesMerged,
            },
            failed @ Self::Failed { .. } => failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// True when entities are persisted and only the edge phase needs a retry.
    pub fn can_retry_edges(self) -> bool {
        matches!(
            self,
            Self::EntitiesMerged
                | Self::Failed {
                    after: FailedAfter::EntitiesMerged
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let phase = MergePhase::Pending.advance().advance().advance();
        assert_eq!(phase, MergePhase::Done);
        assert!(phase.is_terminal());
        assert_eq!(phase.advance(), MergePhase::Done);
    }

    #[test]
    fn test_failure_keeps_position() {
        let failed = MergePhase::Pending.advance().fail();
        assert_eq!(
            failed,
            MergePhase::Failed {
                after: FailedAfter::EntitiesMerged
            }
        );
        assert!(failed.can_retry_edges());
        assert_eq!(failed.advance(), failed);
        assert!(!MergePhase::Pending.fail().can_retry_edges());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&MergePhase::EntitiesMerged).unwrap();
        assert_eq!(json, "\"entities_merged\"");
    }
}
