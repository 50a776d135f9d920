//! Audit trail for list traffic.
//!
//! Every verdict the filter chain reaches, every subscription change and
//! every delivery attempt is emitted as a structured `tracing` event carrying
//! an `event` field, so operators can route them to a dedicated sink.
//!
//! ## Events
//!
//! - `PostAccepted`, `PostRejected`, `PostHeld`, `PostDeferred`
//! - `SubscriptionChanged`
//! - `DeliveryAttempt`, `DeliverySuccess`, `DeliveryFailure`
//!
//! Sender and recipient addresses can be redacted to `[REDACTED]@domain`.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace the local part of sender addresses in audit events
    #[serde(default)]
    pub redact_sender: bool,

    /// Replace the local part of recipient addresses in audit events
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Installs the audit configuration. Only the first call has any effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email
        .rsplit_once('@')
        .map_or_else(|| "[REDACTED]".to_string(), |(_, domain)| format!("[REDACTED]@{domain}"))
}

#[must_use]
pub fn redact_emails(emails: &[String], redact: bool) -> Vec<String> {
    emails.iter().map(|e| redact_email(e, redact)).collect()
}

/// A post passed the filter chain and was queued for distribution.
pub fn log_post_accepted(entry_id: &str, list: &str, sender: &str, recipients: &[String]) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "PostAccepted",
        entry_id = %entry_id,
        list = %list,
        sender = %redact_email(sender, config.redact_sender),
        recipients = ?redact_emails(recipients, config.redact_recipients),
        recipient_count = recipients.len(),
        "Audit: post accepted"
    );
}

/// A post was refused. `structural` distinguishes malformed input from a
/// policy decision.
pub fn log_post_rejected(list: &str, sender: &str, reason: &str, structural: bool) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "PostRejected",
        list = %list,
        sender = %redact_email(sender, config.redact_sender),
        reason = %reason,
        structural = structural,
        "Audit: post rejected"
    );
}

pub fn log_post_held(entry_id: &str, list: &str, sender: &str, reason: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "PostHeld",
        entry_id = %entry_id,
        list = %list,
        sender = %redact_email(sender, config.redact_sender),
        reason = %reason,
        "Audit: post held for moderation"
    );
}

pub fn log_post_deferred(entry_id: &str, list: &str, sender: &str, reason: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "PostDeferred",
        entry_id = %entry_id,
        list = %list,
        sender = %redact_email(sender, config.redact_sender),
        reason = %reason,
        "Audit: post deferred"
    );
}

/// `change` is a short verb such as `subscribed`, `unsubscribed` or
/// `confirmation-sent`.
pub fn log_subscription_changed(list: &str, address: &str, change: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SubscriptionChanged",
        list = %list,
        address = %redact_email(address, config.redact_recipients),
        change = %change,
        "Audit: subscription changed"
    );
}

pub fn log_delivery_attempt(entry_id: &str, list: &str, recipient_count: usize, attempt: u32) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryAttempt",
        entry_id = %entry_id,
        list = %list,
        recipient_count = recipient_count,
        delivery_attempt = attempt,
        "Audit: delivery attempt"
    );
}

pub fn log_delivery_success(
    entry_id: &str,
    list: &str,
    recipient_count: usize,
    attempt: u32,
    duration_ms: u128,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliverySuccess",
        entry_id = %entry_id,
        list = %list,
        recipient_count = recipient_count,
        delivery_attempt = attempt,
        duration_ms = duration_ms,
        "Audit: delivery successful"
    );
}

/// `status` is the queue kind the entry (or its failed part) ended up in.
pub fn log_delivery_failure(entry_id: &str, list: &str, error: &str, attempt: u32, status: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "DeliveryFailure",
        entry_id = %entry_id,
        list = %list,
        error = %error,
        delivery_attempt = attempt,
        status = %status,
        "Audit: delivery failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
    }

    #[test]
    fn test_redact_keeps_last_domain() {
        assert_eq!(
            redact_email("\"odd@local\"@lists.example.org", true),
            "[REDACTED]@lists.example.org"
        );
    }

    #[test]
    fn test_redact_emails() {
        let emails = vec![
            "alice@example.com".to_string(),
            "bob@example.org".to_string(),
        ];

        assert_eq!(
            redact_emails(&emails, true),
            vec!["[REDACTED]@example.com", "[REDACTED]@example.org"]
        );
        assert_eq!(redact_emails(&emails, false), emails);
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_sender);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_events_do_not_panic() {
        log_post_accepted("01H", "list@example.org", "a@example.org", &[]);
        log_post_rejected("list@example.org", "a@example.org", "not a subscriber", false);
        log_post_held("01H", "list@example.org", "a@example.org", "moderated");
        log_post_deferred("01H", "list@example.org", "a@example.org", "paused");
        log_subscription_changed("list@example.org", "a@example.org", "subscribed");
        log_delivery_attempt("01H", "list@example.org", 2, 1);
        log_delivery_success("01H", "list@example.org", 2, 1, 12);
        log_delivery_failure("01H", "list@example.org", "mailbox full", 1, "error");
    }
}
