use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ListId;
use crate::address;

/// A subscriber of a list. Unsubscribing clears `enabled`; the record stays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag is an independent delivery preference"
)]
pub struct ListSubscription {
    pub list: ListId,
    pub address: String,
    pub name: Option<String>,
    pub enabled: bool,
    /// Receives digests instead of individual posts.
    pub digest: bool,
    /// Subscribed (may post) but receives nothing.
    pub no_mail: bool,
    pub hide_address: bool,
    /// Receives copies of their own posts even on a `no_echo` list.
    pub receive_own_posts: bool,
    pub created_at: DateTime<Utc>,
}

impl ListSubscription {
    /// A fresh, enabled subscription with default delivery preferences.
    #[must_use]
    pub fn new(list: ListId, address: &str) -> Self {
        Self {
            list,
            address: address::normalize(address),
            name: None,
            enabled: true,
            digest: false,
            no_mail: false,
            hide_address: false,
            receive_own_posts: false,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `true` when individual posts should be sent to this subscriber.
    #[must_use]
    pub const fn receives_posts(&self) -> bool {
        self.enabled && !self.no_mail && !self.digest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOwner {
    pub list: ListId,
    pub address: String,
    pub name: Option<String>,
}

impl ListOwner {
    #[must_use]
    pub fn new(list: ListId, address: &str) -> Self {
        Self {
            list,
            address: address::normalize(address),
            name: None,
        }
    }
}

/// An administrative identity. The lists it owns are derived from the
/// [`ListOwner`] records sharing its address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub name: Option<String>,
    pub enabled: bool,
}

impl Account {
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self {
            address: address::normalize(address),
            name: None,
            enabled: true,
        }
    }
}

/// A subscribe request waiting for its confirmation token to come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub token: String,
    pub list: ListId,
    pub address: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}
