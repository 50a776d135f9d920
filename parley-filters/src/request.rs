//! Control commands sent to a list instead of a post.
//!
//! A request is recognised from the recipient's `+extension`
//! (`dev+subscribe@lists.example.org`) or, when the message was sent to the
//! list or its `+request` address, from the first non-blank body line. Every
//! function here is total: input that is not a request yields `None`.

use std::fmt;

use parley_common::{address, incoming, message};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListRequest {
    Subscribe,
    Unsubscribe,
    /// Carries the token, upper-cased. Only its syntax has been checked.
    ConfirmSubscription(String),
    Help,
    ContactOwner,
}

impl fmt::Display for ListRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => f.write_str("subscribe"),
            Self::Unsubscribe => f.write_str("unsubscribe"),
            Self::ConfirmSubscription(token) => write!(f, "confirm {token}"),
            Self::Help => f.write_str("help"),
            Self::ContactOwner => f.write_str("owner"),
        }
    }
}

/// Extension that asks for the body to be read as a command.
pub const REQUEST_EXTENSION: &str = "request";

fn token(candidate: &str) -> Option<String> {
    ulid::Ulid::from_string(candidate.trim())
        .ok()
        .map(|ulid| ulid.to_string())
}

fn command(word: &str) -> Option<ListRequest> {
    match word.to_ascii_lowercase().as_str() {
        "subscribe" => Some(ListRequest::Subscribe),
        "unsubscribe" => Some(ListRequest::Unsubscribe),
        "help" => Some(ListRequest::Help),
        "owner" => Some(ListRequest::ContactOwner),
        _ => None,
    }
}

/// Classifies an address extension such as `subscribe` or `confirm-<token>`.
#[must_use]
pub fn parse_extension(extension: &str) -> Option<ListRequest> {
    let extension = extension.trim();
    let lower = extension.to_ascii_lowercase();

    if let Some(rest) = lower
        .strip_prefix("confirm-")
        .or_else(|| lower.strip_prefix("confirm="))
    {
        return token(&extension[extension.len() - rest.len()..])
            .map(ListRequest::ConfirmSubscription);
    }

    command(extension)
}

/// Recognises a request from an address's `+extension`.
#[must_use]
pub fn parse_address(recipient: &str) -> Option<ListRequest> {
    address::split(recipient)?
        .extension
        .and_then(parse_extension)
}

/// Recognises a request from the first non-blank line of a body. The line
/// must hold exactly one command word, or `confirm` and a token.
#[must_use]
pub fn parse_body(body: &[u8]) -> Option<ListRequest> {
    let text = String::from_utf8_lossy(body);
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;

    let mut words = line.split_whitespace();
    let first = words.next()?;
    let second = words.next();
    if words.next().is_some() {
        return None;
    }

    match second {
        None => command(first),
        Some(candidate) if first.eq_ignore_ascii_case("confirm") => {
            token(candidate).map(ListRequest::ConfirmSubscription)
        }
        Some(_) => None,
    }
}

/// Address when the input looks like one, otherwise body text.
#[must_use]
pub fn parse(input: &str) -> Option<ListRequest> {
    let trimmed = input.trim();
    if !trimmed.contains(char::is_whitespace) && address::is_valid(trimmed) {
        parse_address(trimmed)
    } else {
        parse_body(trimmed.as_bytes())
    }
}

/// Classifies a submission. A recognised extension decides on its own; the
/// body is only consulted for the bare list address or `+request`.
#[must_use]
pub fn recognize(recipient: &str, raw: &[u8]) -> Option<ListRequest> {
    let extension = address::split(recipient).and_then(|parts| parts.extension);

    let request = match extension {
        Some(ext) if !ext.eq_ignore_ascii_case(REQUEST_EXTENSION) => parse_extension(ext),
        _ => {
            let body = message::split(raw).map_or(raw, |sections| sections.body);
            parse_body(body)
        }
    };

    if let Some(request) = &request {
        incoming!(level = DEBUG, recipient = %recipient, request = %request, "Recognised list request");
    }
    request
}
