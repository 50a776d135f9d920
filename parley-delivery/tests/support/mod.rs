//! A scripted transport for dispatcher tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_delivery::{
    DeliveryError, DeliveryStatus, OutboundMessage, RecipientOutcome, Transport,
};

/// One call the dispatcher made.
#[derive(Debug, Clone)]
pub struct Call {
    pub recipients: Vec<String>,
    pub data: Arc<[u8]>,
}

/// Delivers to everyone unless told otherwise.
#[derive(Default)]
pub struct MockTransport {
    statuses: Mutex<AHashMap<String, DeliveryStatus>>,
    silent: Mutex<Vec<String>>,
    failure: Mutex<Option<fn() -> DeliveryError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `status` for `recipient` on every call.
    pub fn script(&self, recipient: &str, status: DeliveryStatus) {
        self.statuses.lock().insert(recipient.to_string(), status);
    }

    /// Leave `recipient` out of the reported outcomes.
    pub fn stay_silent_about(&self, recipient: &str) {
        self.silent.lock().push(recipient.to_string());
    }

    /// Fail every call as a whole.
    pub fn fail_with(&self, error: fn() -> DeliveryError) {
        *self.failure.lock() = Some(error);
    }

    /// Sleep before answering.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.recipients.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(
        &self,
        recipients: &[String],
        message: &OutboundMessage,
    ) -> Result<Vec<RecipientOutcome>, DeliveryError> {
        self.calls.lock().push(Call {
            recipients: recipients.to_vec(),
            data: Arc::clone(&message.data),
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = *self.failure.lock() {
            return Err(failure());
        }

        let statuses = self.statuses.lock();
        let silent = self.silent.lock();
        Ok(recipients
            .iter()
            .filter(|recipient| !silent.contains(recipient))
            .map(|recipient| RecipientOutcome {
                recipient: recipient.clone(),
                status: statuses
                    .get(recipient)
                    .cloned()
                    .unwrap_or(DeliveryStatus::Delivered),
            })
            .collect())
    }
}
