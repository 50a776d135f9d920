//! The seam between the dispatcher and whatever actually moves mail.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parley_common::{ListId, address};
use parley_queue::EntryId;

use crate::error::DeliveryError;

/// A rendered copy ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub entry: EntryId,
    pub list: ListId,
    /// Envelope sender recorded on the entry.
    pub sender: String,
    pub data: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Transient(String),
    Permanent(String),
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => f.write_str("delivered"),
            Self::Transient(reason) => write!(f, "transient: {reason}"),
            Self::Permanent(reason) => write!(f, "permanent: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub status: DeliveryStatus,
}

impl RecipientOutcome {
    #[must_use]
    pub fn delivered(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            status: DeliveryStatus::Delivered,
        }
    }

    #[must_use]
    pub fn transient(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            status: DeliveryStatus::Transient(reason.into()),
        }
    }

    #[must_use]
    pub fn permanent(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            status: DeliveryStatus::Permanent(reason.into()),
        }
    }

    /// The same outcome for every recipient of a call that failed as a whole.
    #[must_use]
    pub fn for_all(recipients: &[String], error: &DeliveryError) -> Vec<Self> {
        let reason = error.to_string();
        recipients
            .iter()
            .map(|recipient| {
                if error.is_permanent() {
                    Self::permanent(recipient.as_str(), reason.as_str())
                } else {
                    Self::transient(recipient.as_str(), reason.as_str())
                }
            })
            .collect()
    }

    pub(crate) fn key(&self) -> String {
        address::normalize(&self.recipient)
    }
}

/// Hands a message to a batch of recipients.
///
/// A call may succeed for some recipients and fail for others; each
/// recipient's result is reported separately. Recipients missing from the
/// result count as transient failures. An `Err` applies to the whole batch.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        recipients: &[String],
        message: &OutboundMessage,
    ) -> Result<Vec<RecipientOutcome>, DeliveryError>;
}
