use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{address, error::PolicyError};

/// Who may post without further review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Posting {
    #[default]
    Open,
    SubscribersOnly,
    /// Only list owners (and the moderator) may post.
    AnnounceOnly,
}

/// Which authorised posts still go through a moderator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Moderation {
    #[default]
    None,
    NonSubscribers,
    All,
}

/// What happens to a sender the posting rule refuses, when the list is
/// moderated. Unmoderated lists always reject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnauthorizedAction {
    #[default]
    Reject,
    Hold,
}

/// Relationship between a sender and a list, resolved before the rights
/// check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    Owner,
    Moderator,
    Subscriber,
    NonSubscriber,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPolicy {
    #[serde(default)]
    pub posting: Posting,
    #[serde(default)]
    pub moderation: Moderation,
    #[serde(default)]
    pub unauthorized: UnauthorizedAction,
    #[serde(default)]
    pub moderator: Option<String>,
    /// Names of optional filter stages this list skips.
    #[serde(default)]
    pub disabled_filters: Vec<String>,
}

impl PostPolicy {
    #[must_use]
    pub const fn open() -> Self {
        Self {
            posting: Posting::Open,
            moderation: Moderation::None,
            unauthorized: UnauthorizedAction::Reject,
            moderator: None,
            disabled_filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn subscribers_only() -> Self {
        Self {
            posting: Posting::SubscribersOnly,
            ..Self::open()
        }
    }

    #[must_use]
    pub fn announce_only() -> Self {
        Self {
            posting: Posting::AnnounceOnly,
            ..Self::open()
        }
    }

    /// Rejects parameter combinations that cannot be meant.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.posting == Posting::AnnounceOnly && self.moderation == Moderation::NonSubscribers {
            return Err(PolicyError::AnnounceOnlyModeration);
        }

        if self.moderation == Moderation::None && self.unauthorized == UnauthorizedAction::Hold {
            return Err(PolicyError::HoldWithoutModeration);
        }

        if let Some(moderator) = &self.moderator
            && !address::is_valid(moderator)
        {
            return Err(PolicyError::InvalidModerator(moderator.clone()));
        }

        Ok(())
    }

    /// `true` when the posting rule alone lets `role` through.
    #[must_use]
    pub const fn permits(&self, role: SenderRole) -> bool {
        match role {
            SenderRole::Owner | SenderRole::Moderator => true,
            SenderRole::Subscriber => !matches!(self.posting, Posting::AnnounceOnly),
            SenderRole::NonSubscriber => matches!(self.posting, Posting::Open),
        }
    }

    /// `true` when a permitted post from `role` must still be held.
    #[must_use]
    pub const fn requires_moderation(&self, role: SenderRole) -> bool {
        match role {
            SenderRole::Owner | SenderRole::Moderator => false,
            SenderRole::Subscriber => matches!(self.moderation, Moderation::All),
            SenderRole::NonSubscriber => {
                matches!(self.moderation, Moderation::All | Moderation::NonSubscribers)
            }
        }
    }

    /// `true` when a refused sender is held instead of rejected.
    #[must_use]
    pub const fn holds_unauthorized(&self) -> bool {
        !matches!(self.moderation, Moderation::None)
            && matches!(self.unauthorized, UnauthorizedAction::Hold)
    }

    #[must_use]
    pub fn is_moderator(&self, sender: &str) -> bool {
        self.moderator
            .as_deref()
            .is_some_and(|m| address::normalize(m) == address::normalize(sender))
    }
}

/// How subscription requests are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionPolicy {
    /// Subscribe immediately.
    Open,
    /// Send a confirmation token first.
    #[default]
    Confirm,
    /// Forward the request to the owners.
    Request,
    /// Refuse all requests.
    Closed,
}

impl fmt::Display for SubscriptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Confirm => "confirm",
            Self::Request => "request",
            Self::Closed => "closed",
        })
    }
}
