//! Sparse update descriptors.
//!
//! Each field is independently present or absent; nullable fields use
//! `Option<Option<_>>` so "leave alone" and "clear" stay distinct. A changeset
//! is applied by building the updated record first ([`apply_to`]) and only
//! then swapping it in, so a failing field leaves the record untouched.
//!
//! [`apply_to`]: MailingListChangeset::apply_to

use serde::{Deserialize, Serialize};

use super::{Account, ListId, ListOwner, ListSubscription, MailingList};
use crate::{address, error::RepositoryError};

fn valid_address(field: &str, value: &str) -> Result<String, RepositoryError> {
    if address::is_valid(value) {
        Ok(address::normalize(value))
    } else {
        Err(RepositoryError::Invalid(format!(
            "{field}: `{value}` is not a valid address"
        )))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingListChangeset {
    pub id: ListId,
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<Option<String>>,
    pub archive_url: Option<Option<String>>,
    pub tag: Option<String>,
    pub no_echo: Option<bool>,
    pub paused: Option<bool>,
}

impl MailingListChangeset {
    #[must_use]
    pub const fn new(id: ListId) -> Self {
        Self {
            id,
            name: None,
            address: None,
            description: None,
            archive_url: None,
            tag: None,
            no_echo: None,
            paused: None,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.description.is_none()
            && self.archive_url.is_none()
            && self.tag.is_none()
            && self.no_echo.is_none()
            && self.paused.is_none()
    }

    pub fn apply_to(&self, list: &MailingList) -> Result<MailingList, RepositoryError> {
        let mut updated = list.clone();
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(RepositoryError::Invalid("name: must not be empty".to_string()));
            }
            updated.name.clone_from(name);
        }
        if let Some(addr) = &self.address {
            updated.address = valid_address("address", addr)?;
        }
        if let Some(description) = &self.description {
            updated.description.clone_from(description);
        }
        if let Some(archive_url) = &self.archive_url {
            updated.archive_url.clone_from(archive_url);
        }
        if let Some(tag) = &self.tag {
            if tag.is_empty() || tag.contains(char::is_whitespace) {
                return Err(RepositoryError::Invalid(format!(
                    "tag: `{tag}` must be a single non-empty word"
                )));
            }
            updated.tag.clone_from(tag);
        }
        if let Some(no_echo) = self.no_echo {
            updated.no_echo = no_echo;
        }
        if let Some(paused) = self.paused {
            updated.paused = paused;
        }
        Ok(updated)
    }
}

/// Identified by `(list, address)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Mirrors the flags of ListSubscription"
)]
pub struct ListSubscriptionChangeset {
    pub list: ListId,
    pub address: String,
    pub name: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub digest: Option<bool>,
    pub no_mail: Option<bool>,
    pub hide_address: Option<bool>,
    pub receive_own_posts: Option<bool>,
}

impl ListSubscriptionChangeset {
    #[must_use]
    pub fn new(list: ListId, address: &str) -> Self {
        Self {
            list,
            address: address::normalize(address),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.enabled.is_none()
            && self.digest.is_none()
            && self.no_mail.is_none()
            && self.hide_address.is_none()
            && self.receive_own_posts.is_none()
    }

    #[must_use]
    pub fn apply_to(&self, subscription: &ListSubscription) -> ListSubscription {
        let mut updated = subscription.clone();
        if let Some(name) = &self.name {
            updated.name.clone_from(name);
        }
        if let Some(enabled) = self.enabled {
            updated.enabled = enabled;
        }
        if let Some(digest) = self.digest {
            updated.digest = digest;
        }
        if let Some(no_mail) = self.no_mail {
            updated.no_mail = no_mail;
        }
        if let Some(hide_address) = self.hide_address {
            updated.hide_address = hide_address;
        }
        if let Some(receive_own_posts) = self.receive_own_posts {
            updated.receive_own_posts = receive_own_posts;
        }
        updated
    }
}

/// Identified by `(list, address)`; `new_address` moves the ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOwnerChangeset {
    pub list: ListId,
    pub address: String,
    pub new_address: Option<String>,
    pub name: Option<Option<String>>,
}

impl ListOwnerChangeset {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.new_address.is_none() && self.name.is_none()
    }

    pub fn apply_to(&self, owner: &ListOwner) -> Result<ListOwner, RepositoryError> {
        let mut updated = owner.clone();
        if let Some(addr) = &self.new_address {
            updated.address = valid_address("new_address", addr)?;
        }
        if let Some(name) = &self.name {
            updated.name.clone_from(name);
        }
        Ok(updated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountChangeset {
    pub address: String,
    pub name: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl AccountChangeset {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.enabled.is_none()
    }

    #[must_use]
    pub fn apply_to(&self, account: &Account) -> Account {
        let mut updated = account.clone();
        if let Some(name) = &self.name {
            updated.name.clone_from(name);
        }
        if let Some(enabled) = self.enabled {
            updated.enabled = enabled;
        }
        updated
    }
}

/// Any changeset the repository accepts through `Repository::apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Changeset {
    MailingList(MailingListChangeset),
    ListSubscription(ListSubscriptionChangeset),
    ListOwner(ListOwnerChangeset),
    Account(AccountChangeset),
}

impl Changeset {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        match self {
            Self::MailingList(c) => c.is_empty(),
            Self::ListSubscription(c) => c.is_empty(),
            Self::ListOwner(c) => c.is_empty(),
            Self::Account(c) => c.is_empty(),
        }
    }

    /// The list whose cached context this change invalidates, if any.
    #[must_use]
    pub const fn list(&self) -> Option<ListId> {
        match self {
            Self::MailingList(c) => Some(c.id),
            Self::ListSubscription(c) => Some(c.list),
            Self::ListOwner(c) => Some(c.list),
            Self::Account(_) => None,
        }
    }
}

impl From<MailingListChangeset> for Changeset {
    fn from(value: MailingListChangeset) -> Self {
        Self::MailingList(value)
    }
}

impl From<ListSubscriptionChangeset> for Changeset {
    fn from(value: ListSubscriptionChangeset) -> Self {
        Self::ListSubscription(value)
    }
}

impl From<ListOwnerChangeset> for Changeset {
    fn from(value: ListOwnerChangeset) -> Self {
        Self::ListOwner(value)
    }
}

impl From<AccountChangeset> for Changeset {
    fn from(value: AccountChangeset) -> Self {
        Self::Account(value)
    }
}
