//! Per-action results of an apply.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::ProviderError;
use crate::model::ResourceKey;
use crate::planner::ActionKind;

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The provider call succeeded and state was written.
    Applied,
    /// A no-op completed without calling the provider.
    Unchanged,
    /// The action ran and failed.
    Failed {
        /// Classification of the failure.
        kind: FailureKind,
        /// Description of the failure.
        cause: String,
    },
    /// The action never ran.
    Skipped {
        /// Why it did not run.
        reason: String,
    },
}

/// Classification of a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient provider failure that outlived its retries.
    Transient,
    /// Permanent provider failure.
    Permanent,
    /// Credentials rejected by the provider.
    Unauthorized,
    /// A referenced output was missing at apply time.
    Resolution,
    /// The state store could not be written.
    State,
    /// The action task panicked.
    Panic,
}

/// Report for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// Index of the action in the plan.
    pub index: usize,
    /// Action kind.
    pub kind: ActionKind,
    /// Resource acted on.
    pub key: ResourceKey,
    /// Outcome.
    pub outcome: ActionOutcome,
    /// Provider calls made, retries included.
    pub attempts: u32,
    /// Provider identity after the action, if any.
    pub provider_id: Option<String>,
    /// When the action started, if it ran.
    pub started_at: Option<DateTime<Utc>>,
    /// When the action finished, if it ran.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of applying a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    /// One report per plan action, in plan order.
    pub reports: Vec<ActionReport>,
    /// Whether the run was cancelled before every action started.
    pub cancelled: bool,
}

impl ActionOutcome {
    /// Returns true for `Applied` and `Unchanged`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

impl From<&ProviderError> for FailureKind {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::Transient { .. } => Self::Transient,
            ProviderError::Permanent { .. } => Self::Permanent,
            ProviderError::Unauthorized { .. } => Self::Unauthorized,
        }
    }
}

impl ActionReport {
    pub(crate) fn skipped(
        index: usize,
        kind: ActionKind,
        key: ResourceKey,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            index,
            kind,
            key,
            outcome: ActionOutcome::Skipped {
                reason: reason.into(),
            },
            attempts: 0,
            provider_id: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl ApplyResult {
    /// Returns true only if every action was applied or unchanged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.reports.iter().all(|r| r.outcome.is_success())
    }

    /// Number of applied actions.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Applied))
    }

    /// Number of unchanged actions.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Unchanged))
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Failed { .. }))
    }

    /// Number of skipped actions.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Skipped { .. }))
    }

    /// Returns the outcome of the last action on `key`.
    #[must_use]
    pub fn outcome_for(&self, key: &ResourceKey) -> Option<&ActionOutcome> {
        self.reports
            .iter()
            .rev()
            .find(|r| &r.key == key)
            .map(|r| &r.outcome)
    }

    fn count(&self, predicate: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unauthorized => "unauthorized",
            Self::Resolution => "resolution",
            Self::State => "state",
            Self::Panic => "panic",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed { kind, cause } => write!(f, "failed ({kind}): {cause}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} unchanged, {} failed, {} skipped",
            self.applied(),
            self.unchanged(),
            self.failed(),
            self.skipped()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
