//! Answers to list requests: subscribe, unsubscribe, confirm, help and
//! owner contact.

use std::sync::Arc;

use chrono::Utc;
use parley_common::{
    Changeset, ListSubscription, ListSubscriptionChangeset, MailingList, PendingConfirmation,
    SubscriptionPolicy, audit, incoming, message,
};
use parley_filters::ListRequest;
use parley_queue::{EntryId, NewEntry};

use crate::{
    controller::Parley,
    error::SubmissionError,
    replies,
    submission::{Submission, SubmissionReceipt},
};

impl Parley {
    pub(crate) async fn handle_request(
        &self,
        list: &MailingList,
        request: ListRequest,
        submission: &Submission,
        sender: &str,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        incoming!(level = INFO, list = %list.id, "{request} request from {sender}");

        let in_reply_to = message::header_value(&submission.raw, "Message-ID");
        let in_reply_to = in_reply_to.as_deref();

        let reply = match &request {
            ListRequest::Help => {
                self.send_reply(list, sender, &replies::help(list), in_reply_to)
                    .await?
            }
            ListRequest::Subscribe => self.subscribe(list, sender, in_reply_to).await?,
            ListRequest::Unsubscribe => self.unsubscribe(list, sender, in_reply_to).await?,
            ListRequest::ConfirmSubscription(token) => {
                self.confirm(list, sender, token, in_reply_to).await?
            }
            ListRequest::ContactOwner => self.contact_owners(list, submission, sender).await?,
        };

        Ok(SubmissionReceipt::Request {
            request,
            reply: Some(reply),
        })
    }

    async fn subscribe(
        &self,
        list: &MailingList,
        sender: &str,
        in_reply_to: Option<&str>,
    ) -> Result<EntryId, SubmissionError> {
        let existing = self.repository.subscription(list.id, sender).await?;
        if existing.as_ref().is_some_and(|s| s.enabled) {
            return self
                .send_reply(list, sender, &replies::already_subscribed(list, sender), in_reply_to)
                .await;
        }

        let policy = self.repository.subscription_policy(list.id).await?;
        match policy {
            SubscriptionPolicy::Open => {
                self.enable(list, sender, existing.is_some()).await?;
                self.send_reply(list, sender, &replies::welcome(list, sender), in_reply_to)
                    .await
            }
            SubscriptionPolicy::Confirm => {
                let token = ulid::Ulid::new().to_string();
                self.repository
                    .store_confirmation(PendingConfirmation {
                        token: token.clone(),
                        list: list.id,
                        address: sender.to_string(),
                        name: None,
                        created_at: Utc::now(),
                    })
                    .await?;
                audit::log_subscription_changed(&list.id.to_string(), sender, "pending");
                self.send_reply(list, sender, &replies::confirm(list, sender, &token), in_reply_to)
                    .await
            }
            SubscriptionPolicy::Request => {
                let owners = self.owner_addresses(list).await?;
                if !owners.is_empty() {
                    self.send(list, owners, &replies::subscription_request(list, sender), None)
                        .await?;
                }
                audit::log_subscription_changed(&list.id.to_string(), sender, "requested");
                self.send_reply(list, sender, &replies::request_forwarded(list), in_reply_to)
                    .await
            }
            SubscriptionPolicy::Closed => {
                self.send_reply(list, sender, &replies::closed(list), in_reply_to)
                    .await
            }
        }
    }

    async fn confirm(
        &self,
        list: &MailingList,
        sender: &str,
        token: &str,
        in_reply_to: Option<&str>,
    ) -> Result<EntryId, SubmissionError> {
        let pending = match self.repository.take_confirmation(token).await? {
            Some(pending) if pending.list == list.id => pending,
            Some(other) => {
                // Sent to the wrong list; keep it for the right one
                self.repository.store_confirmation(other).await?;
                return self
                    .send_reply(list, sender, &replies::unknown_token(list), in_reply_to)
                    .await;
            }
            None => {
                return self
                    .send_reply(list, sender, &replies::unknown_token(list), in_reply_to)
                    .await;
            }
        };

        let existing = self.repository.subscription(list.id, &pending.address).await?;
        if existing.as_ref().is_some_and(|s| s.enabled) {
            return self
                .send_reply(
                    list,
                    &pending.address,
                    &replies::already_subscribed(list, &pending.address),
                    in_reply_to,
                )
                .await;
        }

        self.enable(list, &pending.address, existing.is_some()).await?;
        self.send_reply(
            list,
            &pending.address,
            &replies::welcome(list, &pending.address),
            in_reply_to,
        )
        .await
    }

    async fn unsubscribe(
        &self,
        list: &MailingList,
        sender: &str,
        in_reply_to: Option<&str>,
    ) -> Result<EntryId, SubmissionError> {
        let subscribed = self
            .repository
            .subscription(list.id, sender)
            .await?
            .is_some_and(|s| s.enabled);

        if !subscribed {
            return self
                .send_reply(list, sender, &replies::not_subscribed(list, sender), in_reply_to)
                .await;
        }

        let changeset = ListSubscriptionChangeset {
            enabled: Some(false),
            ..ListSubscriptionChangeset::new(list.id, sender)
        };
        self.repository.apply(Changeset::from(changeset)).await?;
        self.contexts.invalidate(list.id);
        audit::log_subscription_changed(&list.id.to_string(), sender, "unsubscribed");

        self.send_reply(list, sender, &replies::unsubscribed(list, sender), in_reply_to)
            .await
    }

    /// Subscribe `address`, re-enabling a disabled subscription rather than
    /// creating a second one.
    async fn enable(
        &self,
        list: &MailingList,
        address: &str,
        exists: bool,
    ) -> Result<(), SubmissionError> {
        if exists {
            let changeset = ListSubscriptionChangeset {
                enabled: Some(true),
                ..ListSubscriptionChangeset::new(list.id, address)
            };
            self.repository.apply(Changeset::from(changeset)).await?;
        } else {
            self.repository
                .add_subscription(ListSubscription::new(list.id, address))
                .await?;
        }

        self.contexts.invalidate(list.id);
        audit::log_subscription_changed(&list.id.to_string(), address, "subscribed");
        Ok(())
    }

    /// Pass the original message on to the list owners, untouched.
    async fn contact_owners(
        &self,
        list: &MailingList,
        submission: &Submission,
        sender: &str,
    ) -> Result<EntryId, SubmissionError> {
        let owners = self.owner_addresses(list).await?;
        if owners.is_empty() {
            let in_reply_to = message::header_value(&submission.raw, "Message-ID");
            return self
                .send_reply(list, sender, &replies::no_owners(list), in_reply_to.as_deref())
                .await;
        }

        let id = self
            .queue
            .enqueue(
                NewEntry::outgoing(list.id, Arc::clone(&submission.raw), sender, owners)
                    .with_comment("owner contact"),
            )
            .await?;
        Ok(id)
    }

    async fn owner_addresses(&self, list: &MailingList) -> Result<Vec<String>, SubmissionError> {
        Ok(self
            .repository
            .owners(list.id)
            .await?
            .into_iter()
            .map(|owner| owner.address)
            .collect())
    }
}
