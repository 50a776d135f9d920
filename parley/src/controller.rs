use std::{sync::Arc, time::Duration};

use parley_common::{
    ListId, MailingList, Mutations, Repository, Signal, address, audit, incoming, internal,
    logging, message, now_ms,
};
use parley_delivery::{DeliveryError, Dispatcher, Transport};
use parley_filters::{ContextCache, FilterChain, Post, PostAction, RejectReason, request};
use parley_queue::{EntryId, NewEntry, Queue, QueueKind};
use parley_tracing::traced;
use tokio::sync::broadcast;

use crate::{
    config::ParleyConfig,
    error::SubmissionError,
    replies::{self, Reply},
    submission::{Submission, SubmissionReceipt},
};

/// The list manager: takes submissions in, queues what should go out and
/// drives delivery.
pub struct Parley {
    pub(crate) config: ParleyConfig,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) queue: Arc<Queue>,
    pub(crate) contexts: ContextCache,
    pub(crate) chain: FilterChain,
    holder: String,
}

impl std::fmt::Debug for Parley {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parley")
            .field("holder", &self.holder)
            .field("chain", &self.chain)
            .field("queue", &self.queue.counts())
            .finish_non_exhaustive()
    }
}

/// A post that passed the chain, ready to be queued.
struct Verdict {
    kind: QueueKind,
    recipients: Vec<String>,
    digest: Vec<String>,
    mutations: Mutations,
    comment: Option<String>,
    next_attempt_at_ms: Option<u64>,
}

impl Parley {
    /// Open the configured queue, repairing whatever a previous run left
    /// behind, and build the service around it.
    ///
    /// # Errors
    /// The queue store cannot be opened or recovered.
    #[traced(instrument(level = tracing::Level::INFO, skip_all), timing(precision = "ms"))]
    pub async fn new(config: ParleyConfig, repository: Arc<dyn Repository>) -> anyhow::Result<Self> {
        let store = config.queue.clone().into_backing_store()?;
        let queue = Queue::open(store)
            .await?
            .with_lease(config.dispatcher.lease());

        Ok(Self::with_queue(config, repository, Arc::new(queue)))
    }

    /// Build around an existing queue. The queue should already be
    /// recovered.
    #[must_use]
    pub fn with_queue(config: ParleyConfig, repository: Arc<dyn Repository>, queue: Arc<Queue>) -> Self {
        audit::init(config.audit.clone());

        Self {
            contexts: ContextCache::new(Duration::from_secs(config.submission.context_ttl_secs)),
            chain: FilterChain::standard(),
            holder: format!("submission-{}", std::process::id()),
            config,
            repository,
            queue,
        }
    }

    #[must_use]
    pub fn with_chain(mut self, chain: FilterChain) -> Self {
        self.chain = chain;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ParleyConfig {
        &self.config
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    #[must_use]
    pub const fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Forget cached facts about `list` after changing it outside of
    /// parley.
    pub fn invalidate(&self, list: ListId) {
        self.contexts.invalidate(list);
    }

    /// A dispatcher draining this service's queue through `transport`.
    ///
    /// # Errors
    /// The dispatcher configuration is invalid.
    pub fn dispatcher(&self, transport: Arc<dyn Transport>) -> Result<Dispatcher, DeliveryError> {
        Dispatcher::new(
            Arc::clone(&self.queue),
            transport,
            self.config.dispatcher.clone(),
        )
    }

    /// Deliver queued mail through `transport` until a shutdown signal.
    ///
    /// # Errors
    /// The dispatcher cannot be started.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(
        &self,
        transport: Arc<dyn Transport>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        logging::init();
        internal!("Parley running");

        let dispatcher = self.dispatcher(transport)?;
        dispatcher.serve(shutdown).await?;

        internal!("Shutting down...");
        Ok(())
    }

    /// The single entry point for inbound mail.
    ///
    /// List requests are answered, everything else runs through the filter
    /// chain. A post is only reported as queued once its entry is durable.
    ///
    /// # Errors
    /// - [`SubmissionError::Malformed`] for an unusable envelope
    /// - [`SubmissionError::UnknownList`] when no list has the recipient address
    /// - [`SubmissionError::Storage`] or [`SubmissionError::Queue`] when the
    ///   list cannot be read or the post cannot be queued
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(to = %submission.envelope_to)), timing(precision = "ms"))]
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt, SubmissionError> {
        if !address::is_valid(&submission.envelope_from) {
            return Err(SubmissionError::Malformed(format!(
                "invalid envelope sender `{}`",
                submission.envelope_from
            )));
        }
        let sender = address::normalize(&submission.envelope_from);

        let Some(parts) = address::split(&submission.envelope_to) else {
            return Err(SubmissionError::Malformed(format!(
                "invalid envelope recipient `{}`",
                submission.envelope_to
            )));
        };
        let list_address = parts.base();

        let Some(list) = self.repository.list_by_address(&list_address).await? else {
            incoming!(level = INFO, "No list at {list_address}");
            return Err(SubmissionError::UnknownList(list_address));
        };

        let request = if self.config.submission.body_commands {
            request::recognize(&submission.envelope_to, &submission.raw)
        } else {
            parts.extension.and_then(request::parse_extension)
        };

        if let Some(request) = request {
            return self.handle_request(&list, request, &submission, &sender).await;
        }

        self.post(&list, &submission, &sender).await
    }

    async fn post(
        &self,
        list: &MailingList,
        submission: &Submission,
        sender: &str,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let context = self.contexts.get(self.repository.as_ref(), list.id).await?;
        let post = Post::new(list.id, sender, Arc::clone(&submission.raw));
        let evaluation = self.chain.evaluate(post, &context);

        incoming!(
            level = DEBUG,
            list = %list.id,
            stages = ?evaluation.trace,
            "Post from {sender} evaluated as {}",
            evaluation.action.as_str()
        );

        let verdict = match evaluation.action {
            PostAction::Reject(reason) => {
                return Ok(self.reject(list, submission, sender, reason).await);
            }
            PostAction::Accept {
                recipients,
                digest,
                mutations,
            } => Verdict {
                kind: QueueKind::Outgoing,
                recipients,
                digest,
                mutations,
                comment: None,
                next_attempt_at_ms: None,
            },
            PostAction::Hold(reason) => Verdict {
                kind: QueueKind::Held,
                recipients: Vec::new(),
                digest: Vec::new(),
                mutations: Mutations::new(),
                comment: Some(reason),
                next_attempt_at_ms: None,
            },
            PostAction::Defer {
                recipients,
                digest,
                mutations,
                reason,
            } => Verdict {
                kind: QueueKind::Deferred,
                recipients,
                digest,
                mutations,
                comment: Some(reason),
                next_attempt_at_ms: Some(
                    now_ms().saturating_add(self.config.submission.defer_delay_secs.saturating_mul(1000)),
                ),
            },
        };

        if verdict.kind != QueueKind::Held && verdict.recipients.is_empty() {
            incoming!(level = INFO, list = %list.id, "Post from {sender} has no recipients");
            return Ok(SubmissionReceipt::NoRecipients);
        }

        let (id, kind) = self.enqueue_post(list, submission, sender, verdict).await?;
        Ok(SubmissionReceipt::Queued { id, kind })
    }

    /// Durably store the post as `Incoming` under a lease, then route it.
    /// A failed route leaves the entry for the dispatcher to route once the
    /// lease runs out.
    async fn enqueue_post(
        &self,
        list: &MailingList,
        submission: &Submission,
        sender: &str,
        verdict: Verdict,
    ) -> Result<(EntryId, QueueKind), SubmissionError> {
        let mut new = NewEntry::incoming(list.id, Arc::clone(&submission.raw), sender, verdict.kind)
            .with_recipients(verdict.recipients)
            .with_mutations(verdict.mutations);
        new.digest = verdict.digest;
        new.comment.clone_from(&verdict.comment);
        new.next_attempt_at_ms = verdict.next_attempt_at_ms;

        let recipients = new.recipients.clone();
        let claim = self.queue.enqueue_claimed(new, &self.holder).await?;
        let id = claim.id().clone();
        let entry = id.to_string();
        let list_id = list.id.to_string();

        let kind = match self.queue.route(&claim, verdict.kind).await {
            Ok(_) => verdict.kind,
            Err(e) => {
                incoming!(level = WARN, "Entry {id} queued but not routed: {e}");
                QueueKind::Incoming
            }
        };

        let reason = verdict.comment.unwrap_or_default();
        match verdict.kind {
            QueueKind::Held => audit::log_post_held(&entry, &list_id, sender, &reason),
            QueueKind::Deferred => audit::log_post_deferred(&entry, &list_id, sender, &reason),
            _ => audit::log_post_accepted(&entry, &list_id, sender, &recipients),
        }

        Ok((id, kind))
    }

    async fn reject(
        &self,
        list: &MailingList,
        submission: &Submission,
        sender: &str,
        reason: RejectReason,
    ) -> SubmissionReceipt {
        audit::log_post_rejected(&list.id.to_string(), sender, &reason.to_string(), reason.is_structural());

        let notice = if self.config.submission.notify_sender_on_reject {
            let in_reply_to = message::header_value(&submission.raw, "Message-ID");
            match self
                .send_reply(list, sender, &replies::rejected(list, &reason), in_reply_to.as_deref())
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    incoming!(level = WARN, "Rejection notice to {sender} not queued: {e}");
                    None
                }
            }
        } else {
            None
        };

        SubmissionReceipt::Rejected { reason, notice }
    }

    /// Queue a generated message to `to`, from the list's owner address.
    pub(crate) async fn send_reply(
        &self,
        list: &MailingList,
        to: &str,
        reply: &Reply,
        in_reply_to: Option<&str>,
    ) -> Result<EntryId, SubmissionError> {
        self.send(list, vec![to.to_string()], reply, in_reply_to).await
    }

    pub(crate) async fn send(
        &self,
        list: &MailingList,
        recipients: Vec<String>,
        reply: &Reply,
        in_reply_to: Option<&str>,
    ) -> Result<EntryId, SubmissionError> {
        let to = recipients.join(", ");
        let raw = reply.compose(list, &to, in_reply_to);
        let id = self
            .queue
            .enqueue(
                NewEntry::outgoing(list.id, raw, list.owner_address(), recipients)
                    .with_comment(reply.kind),
            )
            .await?;

        internal!(level = DEBUG, list = %list.id, "Queued {} message {id} to {to}", reply.kind);
        Ok(id)
    }
}
