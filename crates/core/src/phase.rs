use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Lifecycle of a single migration.
///
/// Variants are declared in execution order; `Failed` sits outside that order
/// and can be entered from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    Planned,
    TargetCreated,
    Copying,
    CopyComplete,
    AliasUpdated,
    SourceDeleted,
    Complete,
    Failed,
}

impl MigrationPhase {
    pub const ORDERED: [MigrationPhase; 7] = [
        Self::Planned,
        Self::TargetCreated,
        Self::Copying,
        Self::CopyComplete,
        Self::AliasUpdated,
        Self::SourceDeleted,
        Self::Complete,
    ];

    fn rank(self) -> Option<usize> {
        Self::ORDERED.iter().position(|phase| *phase == self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only ordering.
    ///
    /// Skipping ahead is allowed (e.g. `AliasUpdated -> Complete` when the
    /// source is kept); moving backwards or leaving a terminal phase is not.
    pub fn can_transition_to(self, next: MigrationPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }

    /// Phases before the alias cutover leave the source index untouched.
    pub fn is_before_cutover(self) -> bool {
        matches!(
            self,
            Self::Planned | Self::TargetCreated | Self::Copying | Self::CopyComplete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::TargetCreated => "TARGET_CREATED",
            Self::Copying => "COPYING",
            Self::CopyComplete => "COPY_COMPLETE",
            Self::AliasUpdated => "ALIAS_UPDATED",
            Self::SourceDeleted => "SOURCE_DELETED",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDERED
            .iter()
            .chain(std::iter::once(&Self::Failed))
            .find(|phase| phase.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown migration phase: {s}"))
    }
}
