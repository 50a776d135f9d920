use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The lifecycle state of an entry, and the partition it is listed under.
///
/// ```text
/// Incoming -> Outgoing | Held | Deferred | Error
/// Outgoing -> Deferred | Error            (delivery removes the entry)
/// Deferred -> Outgoing | Error
/// Held     -> Outgoing | Error            (moderator decision)
/// Error    -> Outgoing                    (administrative requeue only)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum QueueKind {
    /// Durably received, verdict not yet applied.
    Incoming,
    /// Ready for the dispatcher.
    Outgoing,
    /// Waiting for a moderator.
    Held,
    /// Waiting for its next attempt time.
    Deferred,
    /// Failed permanently; kept for operators.
    Error,
}

impl QueueKind {
    pub const ALL: [Self; 5] = [
        Self::Incoming,
        Self::Outgoing,
        Self::Held,
        Self::Deferred,
        Self::Error,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Held => "held",
            Self::Deferred => "deferred",
            Self::Error => "error",
        }
    }

    /// Names accepted by [`FromStr`], for front-ends listing choices.
    #[must_use]
    pub const fn possible_values() -> &'static [&'static str] {
        &["incoming", "outgoing", "held", "deferred", "error"]
    }

    /// Whether `next` is an edge of the regular lifecycle. The
    /// `Error -> Outgoing` requeue is administrative and not included.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Incoming,
                Self::Outgoing | Self::Held | Self::Deferred | Self::Error
            ) | (Self::Outgoing, Self::Deferred | Self::Error)
                | (Self::Deferred | Self::Held, Self::Outgoing | Self::Error)
        )
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown queue `{s}`, expected one of {}",
                    Self::possible_values().join(", ")
                )
            })
    }
}
