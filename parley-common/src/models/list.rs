use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ListId(pub u64);

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mailing list's identity. Other records refer to it by [`ListId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag is an independent list setting"
)]
pub struct MailingList {
    pub id: ListId,
    /// Display name, e.g. `Developers`.
    pub name: String,
    /// Posting address, e.g. `dev@lists.example.org`.
    pub address: String,
    pub description: Option<String>,
    /// Base URL of the web archive, without a trailing slash.
    pub archive_url: Option<String>,
    /// Short label used in the subject prefix and the `List-Id`.
    pub tag: String,
    /// Leave the sender out of the recipients of their own post.
    pub no_echo: bool,
    /// Accept posts but defer their distribution.
    pub paused: bool,
}

impl fmt::Display for MailingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[#{} {}] {} <{}>", self.id, self.tag, self.name, self.address)
    }
}

impl MailingList {
    fn parts(&self) -> (&str, &str) {
        address::split(&self.address).map_or((self.address.as_str(), ""), |p| (p.local, p.domain))
    }

    /// `"Name" <address>`
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("\"{}\" <{}>", self.name, self.address)
    }

    /// The list address with `+extension` added to its local part.
    #[must_use]
    pub fn request_address(&self, extension: &str) -> String {
        let (local, domain) = self.parts();
        format!("{local}{}{extension}@{domain}", address::EXTENSION_SEPARATOR)
    }

    #[must_use]
    pub fn owner_address(&self) -> String {
        self.request_address("owner")
    }

    /// `List-Id` (RFC 2919): `Name <tag.domain>`.
    #[must_use]
    pub fn list_id_header(&self) -> String {
        let (_, domain) = self.parts();
        format!("{} <{}.{domain}>", self.name, self.tag)
    }

    /// `List-Post` (RFC 2369 section 3.4).
    #[must_use]
    pub fn post_header(&self) -> String {
        format!("<mailto:{}>", self.address)
    }

    #[must_use]
    pub fn help_header(&self) -> String {
        format!("<mailto:{}>", self.request_address("help"))
    }

    #[must_use]
    pub fn subscribe_header(&self) -> String {
        format!("<mailto:{}>", self.request_address("subscribe"))
    }

    #[must_use]
    pub fn unsubscribe_header(&self) -> String {
        format!("<mailto:{}>", self.request_address("unsubscribe"))
    }

    /// `List-Archive`, only when the list has an archive.
    #[must_use]
    pub fn archive_header(&self) -> Option<String> {
        self.archive_url
            .as_ref()
            .map(|url| format!("<{}>", url.trim_end_matches('/')))
    }

    /// `[tag] `
    #[must_use]
    pub fn subject_prefix(&self) -> String {
        format!("[{}] ", self.tag)
    }
}
