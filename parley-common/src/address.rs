//! Address handling for list and subscriber addresses.
//!
//! Addresses are compared case-insensitively and stored in their normalised
//! form. A list address may carry a `+extension` on its local part
//! (`list+subscribe@example.org`); the extension selects a list request.

use std::fmt;

use mailparse::MailAddr;

pub const EXTENSION_SEPARATOR: char = '+';

/// The pieces of `local+extension@domain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParts<'a> {
    pub local: &'a str,
    pub extension: Option<&'a str>,
    pub domain: &'a str,
}

impl AddressParts<'_> {
    /// The address with its extension removed.
    #[must_use]
    pub fn base(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

impl fmt::Display for AddressParts<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension {
            Some(ext) => write!(f, "{}{EXTENSION_SEPARATOR}{ext}@{}", self.local, self.domain),
            None => write!(f, "{}@{}", self.local, self.domain),
        }
    }
}

/// Splits a bare address into local part, extension and domain.
///
/// Angle brackets and surrounding whitespace are ignored. Returns `None` when
/// the address has no `@`, or an empty local part or domain.
#[must_use]
pub fn split(address: &str) -> Option<AddressParts<'_>> {
    let address = strip_brackets(address);
    let (local, domain) = address.rsplit_once('@')?;
    if domain.is_empty() || domain.contains(char::is_whitespace) {
        return None;
    }

    let (local, extension) = match local.split_once(EXTENSION_SEPARATOR) {
        Some((local, ext)) => (local, Some(ext)),
        None => (local, None),
    };

    if local.is_empty() || local.contains(char::is_whitespace) {
        return None;
    }

    Some(AddressParts {
        local,
        extension,
        domain,
    })
}

/// Lower-cases and trims an address so it can be used as a lookup key.
#[must_use]
pub fn normalize(address: &str) -> String {
    strip_brackets(address).to_ascii_lowercase()
}

/// `true` when the string splits into a local part and a domain.
#[must_use]
pub fn is_valid(address: &str) -> bool {
    split(address).is_some()
}

/// The normalised address with any `+extension` removed.
#[must_use]
pub fn without_extension(address: &str) -> Option<String> {
    split(address).map(|parts| parts.base().to_ascii_lowercase())
}

/// Pulls the first mailbox out of a header value such as
/// `"Alice" <alice@example.org>`.
#[must_use]
pub fn first_mailbox(header_value: &str) -> Option<String> {
    let list = mailparse::addrparse(header_value).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(normalize(&info.addr)),
        MailAddr::Group(group) => group.addrs.first().map(|info| normalize(&info.addr)),
    })
}

fn strip_brackets(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim()
}
