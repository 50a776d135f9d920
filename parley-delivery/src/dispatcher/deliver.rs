//! Delivery of one claimed entry, and folding the per-recipient results back
//! into the queue.

use std::{sync::Arc, time::Instant};

use ahash::AHashMap;
use parley_common::{address, audit, message, now_ms, outgoing};
use parley_queue::{Claim, Outcome, Queue, QueueError, QueueKind, RetrySchedule, SplitPart};

use crate::{
    config::DispatcherConfig,
    error::{DeliveryError, PermanentError, TransientError},
    transport::{DeliveryStatus, OutboundMessage, RecipientOutcome, Transport},
};

/// Where a delivered entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Delivered,
    Deferred,
    Failed,
    /// Mixed results; the entry was replaced by this many children.
    Split(usize),
}

/// Per-recipient results sorted into buckets, in the entry's recipient
/// order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Folded {
    pub delivered: Vec<String>,
    pub transient: Vec<(String, String)>,
    pub permanent: Vec<(String, String)>,
}

impl Folded {
    /// Matches outcomes to `recipients`. The first outcome reported for a
    /// recipient counts; recipients without one are transient failures.
    #[must_use]
    pub fn new(recipients: &[String], outcomes: Vec<RecipientOutcome>) -> Self {
        let mut by_recipient: AHashMap<String, DeliveryStatus> =
            AHashMap::with_capacity(outcomes.len());
        for outcome in outcomes {
            by_recipient.entry(outcome.key()).or_insert(outcome.status);
        }

        let mut folded = Self::default();
        for recipient in recipients {
            match by_recipient.remove(&address::normalize(recipient)) {
                Some(DeliveryStatus::Delivered) => folded.delivered.push(recipient.clone()),
                Some(DeliveryStatus::Permanent(reason)) => {
                    folded.permanent.push((recipient.clone(), reason));
                }
                Some(DeliveryStatus::Transient(reason)) => {
                    folded.transient.push((recipient.clone(), reason));
                }
                None => folded
                    .transient
                    .push((recipient.clone(), "no outcome reported".to_string())),
            }
        }
        folded
    }

    /// The single outcome for the entry, when every recipient shares it.
    #[must_use]
    pub fn uniform(&self) -> Option<Outcome> {
        match (
            self.delivered.is_empty(),
            self.transient.is_empty(),
            self.permanent.is_empty(),
        ) {
            (_, true, true) => Some(Outcome::Delivered),
            (true, false, true) => Some(Outcome::TransientFailure(summarize(&self.transient))),
            (true, true, false) => Some(Outcome::PermanentFailure(summarize(&self.permanent))),
            _ => None,
        }
    }
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(recipient, reason)| format!("{recipient}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn recipients_of(failures: &[(String, String)]) -> Vec<String> {
    failures.iter().map(|(recipient, _)| recipient.clone()).collect()
}

/// Everything a delivery task needs, cheap to clone into each task.
#[derive(Clone)]
pub struct Worker {
    pub queue: Arc<Queue>,
    pub transport: Arc<dyn Transport>,
    pub config: Arc<DispatcherConfig>,
}

impl Worker {
    /// Deliver a claimed entry and record the result.
    ///
    /// # Errors
    /// Queue errors while reading the payload or recording the result. The
    /// claim is released when the payload cannot be read so the next scan
    /// tries again.
    pub async fn deliver(&self, claim: Claim) -> Result<Settled, DeliveryError> {
        let entry = &claim.entry;
        let attempt = entry.attempts.saturating_add(1);
        let id = entry.id.to_string();
        let list = entry.list.to_string();
        let started = Instant::now();

        audit::log_delivery_attempt(&id, &list, entry.recipients.len(), attempt);

        let payload = match self.queue.payload(&entry.payload).await {
            Ok(payload) => payload,
            Err(QueueError::PayloadNotFound(payload)) => {
                let reason = format!("payload {payload} is missing");
                return self.settle_uniform(&claim, Outcome::PermanentFailure(reason)).await;
            }
            Err(e) => {
                if let Err(release) = self.queue.release(&claim).await {
                    outgoing!(level = WARN, "Could not release {id} after payload error: {release}");
                }
                return Err(e.into());
            }
        };

        let data = match message::render(&payload, entry.mutations.as_slice()) {
            Ok(data) => data,
            Err(e) => {
                let reason = PermanentError::Unrenderable(e.to_string()).to_string();
                return self.settle_uniform(&claim, Outcome::PermanentFailure(reason)).await;
            }
        };

        let message = OutboundMessage {
            entry: entry.id.clone(),
            list: entry.list,
            sender: entry.sender.clone(),
            data: Arc::from(data),
        };

        let outcomes = self.call_transport(&claim, &message).await;
        let folded = Folded::new(&entry.recipients, outcomes);

        let settled = match folded.uniform() {
            Some(outcome) => self.settle_uniform(&claim, outcome).await?,
            None => self.settle_split(&claim, &folded).await?,
        };

        if !folded.delivered.is_empty() {
            audit::log_delivery_success(
                &id,
                &list,
                folded.delivered.len(),
                attempt,
                started.elapsed().as_millis(),
            );
        }

        Ok(settled)
    }

    /// Sends to the entry's recipients in chunks, each call bounded by the
    /// transport timeout. Once the lease cannot cover another call the
    /// remaining recipients are reported as transient failures.
    async fn call_transport(&self, claim: &Claim, message: &OutboundMessage) -> Vec<RecipientOutcome> {
        let timeout = self.config.transport_timeout();
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let lease_ends = claim
            .entry
            .lease
            .as_ref()
            .map_or(u64::MAX, |lease| lease.expires_at_ms);

        let mut outcomes = Vec::with_capacity(claim.entry.recipients.len());
        for chunk in claim.entry.recipients.chunks(self.config.recipients_per_call) {
            if now_ms().saturating_add(timeout_ms) > lease_ends {
                outcomes.extend(RecipientOutcome::for_all(
                    chunk,
                    &TransientError::LeaseBudget.into(),
                ));
                continue;
            }

            match tokio::time::timeout(timeout, self.transport.deliver(chunk, message)).await {
                Ok(Ok(reported)) => outcomes.extend(reported),
                Ok(Err(e)) => {
                    outgoing!(level = DEBUG, entry = %message.entry, "Transport call failed: {e}");
                    outcomes.extend(RecipientOutcome::for_all(chunk, &e));
                }
                Err(_) => {
                    outgoing!(level = WARN, entry = %message.entry, "Transport call timed out");
                    outcomes.extend(RecipientOutcome::for_all(
                        chunk,
                        &TransientError::Timeout(timeout.as_secs()).into(),
                    ));
                }
            }
        }

        outcomes
    }

    async fn settle_uniform(&self, claim: &Claim, outcome: Outcome) -> Result<Settled, DeliveryError> {
        let error = match &outcome {
            Outcome::Delivered => None,
            Outcome::TransientFailure(reason) | Outcome::PermanentFailure(reason) => {
                Some(reason.clone())
            }
        };

        let transition = self
            .queue
            .mark_result(claim, outcome, &self.config.retry)
            .await?;

        let settled = match transition.to {
            None => Settled::Delivered,
            Some(QueueKind::Deferred) => Settled::Deferred,
            Some(_) => Settled::Failed,
        };

        if let (Some(error), Some(to)) = (error, transition.to) {
            audit::log_delivery_failure(
                &transition.id.to_string(),
                &claim.entry.list.to_string(),
                &error,
                transition.attempts,
                to.as_str(),
            );
        }

        outgoing!(
            level = DEBUG,
            entry = %transition.id,
            attempts = transition.attempts,
            "Entry settled as {settled:?}"
        );
        Ok(settled)
    }

    /// Replaces the entry by a remainder child holding the transient
    /// recipients and an error child holding the permanent ones. Delivered
    /// recipients are dropped.
    async fn settle_split(&self, claim: &Claim, folded: &Folded) -> Result<Settled, DeliveryError> {
        let entry = &claim.entry;
        let attempts = entry.attempts.saturating_add(1);
        let counted = attempts.saturating_sub(entry.requeued_at_attempt);
        let retry = &self.config.retry;

        let mut parts = Vec::with_capacity(2);
        if !folded.transient.is_empty() {
            let exhausted = retry.is_exhausted(counted);
            parts.push(SplitPart {
                kind: if exhausted {
                    QueueKind::Error
                } else {
                    QueueKind::Deferred
                },
                recipients: recipients_of(&folded.transient),
                attempts,
                last_error: Some(summarize(&folded.transient)),
                next_attempt_at_ms: (!exhausted).then(|| retry.next_attempt_at_ms(counted, now_ms())),
            });
        }
        if !folded.permanent.is_empty() {
            parts.push(SplitPart {
                kind: QueueKind::Error,
                recipients: recipients_of(&folded.permanent),
                attempts,
                last_error: Some(summarize(&folded.permanent)),
                next_attempt_at_ms: None,
            });
        }

        let children = self.queue.split(claim, parts.clone()).await?;

        for (part, child) in parts.iter().zip(&children) {
            audit::log_delivery_failure(
                &child.to_string(),
                &entry.list.to_string(),
                part.last_error.as_deref().unwrap_or_default(),
                attempts,
                part.kind.as_str(),
            );
        }

        outgoing!(
            level = INFO,
            entry = %entry.id,
            delivered = folded.delivered.len(),
            transient = folded.transient.len(),
            permanent = folded.permanent.len(),
            "Partial delivery, entry split into {} children",
            children.len()
        );

        Ok(Settled::Split(children.len()))
    }
}
