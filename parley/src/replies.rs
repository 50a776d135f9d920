//! Messages the list writes itself: answers to list requests, rejection
//! notices and notes to the owners.

use std::fmt::Write;

use chrono::Utc;
use parley_common::{MailingList, address};
use parley_filters::RejectReason;

/// A generated message before it is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Short name recorded as the queue entry's comment.
    pub kind: &'static str,
    pub subject: String,
    pub body: String,
}

impl Reply {
    fn new(kind: &'static str, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Render as an RFC 5322 message from the list's request address,
    /// with CRLF line endings.
    #[must_use]
    pub fn compose(&self, list: &MailingList, to: &str, in_reply_to: Option<&str>) -> Vec<u8> {
        let domain = address::split(&list.address).map_or("localhost", |parts| parts.domain);

        let mut headers = vec![
            format!("From: \"{}\" <{}>", list.name, list.request_address("request")),
            format!("To: {to}"),
            format!("Subject: {}{}", list.subject_prefix(), self.subject),
            format!("Date: {}", Utc::now().to_rfc2822()),
            format!("Message-ID: <{}@{domain}>", ulid::Ulid::new()),
        ];
        if let Some(id) = in_reply_to {
            headers.push(format!("In-Reply-To: {id}"));
            headers.push(format!("References: {id}"));
        }
        headers.extend([
            format!("List-Id: {}", list.list_id_header()),
            "Auto-Submitted: auto-replied".to_string(),
            "MIME-Version: 1.0".to_string(),
            "Content-Type: text/plain; charset=utf-8".to_string(),
        ]);

        let mut message = headers.join("\r\n");
        message.push_str("\r\n\r\n");
        for line in self.body.lines() {
            message.push_str(line);
            message.push_str("\r\n");
        }
        message.into_bytes()
    }
}

fn commands(list: &MailingList) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "To post, write to {}.", list.address);
    let _ = writeln!(text, "To subscribe, write to {}.", list.request_address("subscribe"));
    let _ = writeln!(text, "To unsubscribe, write to {}.", list.request_address("unsubscribe"));
    let _ = writeln!(text, "To reach the list owners, write to {}.", list.owner_address());
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "Commands can also be sent as the first line of a message to {}:",
        list.request_address("request")
    );
    let _ = writeln!(text, "subscribe, unsubscribe, help, owner, confirm <token>");
    text
}

pub fn help(list: &MailingList) -> Reply {
    let mut body = format!("This is the {} list.\n", list.name);
    if let Some(description) = &list.description {
        let _ = writeln!(body, "{description}");
    }
    if let Some(archive) = &list.archive_url {
        let _ = writeln!(body, "Archive: {archive}");
    }
    body.push('\n');
    body.push_str(&commands(list));
    Reply::new("help", format!("Help for {}", list.name), body)
}

pub fn welcome(list: &MailingList, subscriber: &str) -> Reply {
    Reply::new(
        "welcome",
        format!("Welcome to {}", list.name),
        format!(
            "{subscriber} is now subscribed to {}.\n\n{}",
            list.name,
            commands(list)
        ),
    )
}

pub fn already_subscribed(list: &MailingList, subscriber: &str) -> Reply {
    Reply::new(
        "already-subscribed",
        "Already subscribed",
        format!("{subscriber} is already subscribed to {}.\n", list.name),
    )
}

pub fn confirm(list: &MailingList, subscriber: &str, token: &str) -> Reply {
    Reply::new(
        "confirm",
        format!("Confirm your subscription to {}", list.name),
        format!(
            "Someone asked to subscribe {subscriber} to {}.\n\n\
             To confirm, write to {}\n\
             or send \"confirm {token}\" to {}.\n\n\
             If you did not ask for this, ignore this message.\n",
            list.name,
            list.request_address(&format!("confirm-{token}")),
            list.request_address("request"),
        ),
    )
}

pub fn request_forwarded(list: &MailingList) -> Reply {
    Reply::new(
        "request-forwarded",
        "Subscription request received",
        format!(
            "Subscriptions to {} are approved by its owners. Your request was passed on to them.\n",
            list.name
        ),
    )
}

pub fn closed(list: &MailingList) -> Reply {
    Reply::new(
        "closed",
        "Subscription refused",
        format!("{} does not accept subscription requests.\n", list.name),
    )
}

pub fn unsubscribed(list: &MailingList, subscriber: &str) -> Reply {
    Reply::new(
        "goodbye",
        format!("Unsubscribed from {}", list.name),
        format!("{subscriber} will no longer receive mail from {}.\n", list.name),
    )
}

pub fn not_subscribed(list: &MailingList, address: &str) -> Reply {
    Reply::new(
        "not-subscribed",
        "Not subscribed",
        format!("{address} is not subscribed to {}.\n", list.name),
    )
}

pub fn unknown_token(list: &MailingList) -> Reply {
    Reply::new(
        "unknown-token",
        "Confirmation failed",
        format!(
            "The confirmation token is unknown or was already used.\n\
             To subscribe again, write to {}.\n",
            list.request_address("subscribe")
        ),
    )
}

pub fn no_owners(list: &MailingList) -> Reply {
    Reply::new(
        "no-owners",
        "No list owners",
        format!("{} has no owners to forward your message to.\n", list.name),
    )
}

pub fn rejected(list: &MailingList, reason: &RejectReason) -> Reply {
    Reply::new(
        "rejection",
        "Your message was not distributed",
        format!(
            "Your message to {} was rejected:\n\n    {reason}\n\n{}",
            list.address,
            commands(list)
        ),
    )
}

/// Tells the owners someone asked to join a list that needs approval.
pub fn subscription_request(list: &MailingList, requester: &str) -> Reply {
    Reply::new(
        "subscription-request",
        format!("Subscription request from {requester}"),
        format!(
            "{requester} asked to subscribe to {}.\n\
             The list only accepts subscriptions approved by its owners.\n",
            list.name
        ),
    )
}
