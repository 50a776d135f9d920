//! A list, a repository and a transport that remembers what it was given.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley::{Parley, ParleyConfig, Submission};
use parley_common::{
    ListId, ListOwner, ListSubscription, MailingList, MemoryRepository, PostPolicy, Repository,
    SubscriptionPolicy,
};
use parley_delivery::{DeliveryError, OutboundMessage, RecipientOutcome, Transport};
use parley_queue::QueueConfig;

pub const LIST: ListId = ListId(1);
pub const LIST_ADDRESS: &str = "dev@lists.example.org";
pub const OWNER: &str = "olive@example.org";

/// One message handed to the transport.
#[derive(Debug, Clone)]
pub struct Sent {
    pub sender: String,
    pub recipients: Vec<String>,
    pub data: Arc<[u8]>,
}

impl Sent {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Delivers everything, or refuses everything permanently once told to.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    refuse: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Everything delivered to `recipient`.
    pub fn sent_to(&self, recipient: &str) -> Vec<Sent> {
        self.sent
            .lock()
            .iter()
            .filter(|sent| sent.recipients.iter().any(|r| r == recipient))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        recipients: &[String],
        message: &OutboundMessage,
    ) -> Result<Vec<RecipientOutcome>, DeliveryError> {
        self.sent.lock().push(Sent {
            sender: message.sender.clone(),
            recipients: recipients.to_vec(),
            data: Arc::clone(&message.data),
        });

        let refuse = *self.refuse.lock();
        Ok(recipients
            .iter()
            .map(|recipient| {
                if refuse {
                    RecipientOutcome::permanent(recipient.clone(), "550 mailbox unavailable")
                } else {
                    RecipientOutcome::delivered(recipient.clone())
                }
            })
            .collect())
    }
}

pub fn list() -> MailingList {
    MailingList {
        id: LIST,
        name: "Developers".to_string(),
        address: LIST_ADDRESS.to_string(),
        description: Some("Development discussion".to_string()),
        archive_url: None,
        tag: "dev".to_string(),
        no_echo: true,
        paused: false,
    }
}

pub fn config() -> ParleyConfig {
    ParleyConfig {
        queue: QueueConfig::Memory { capacity: None },
        ..ParleyConfig::default()
    }
}

/// A service for [`list`], owned by [`OWNER`], with `subscribers`.
pub async fn service(
    list: MailingList,
    post_policy: PostPolicy,
    subscription_policy: SubscriptionPolicy,
    subscribers: &[&str],
) -> (Parley, MemoryRepository) {
    let repository = MemoryRepository::new();
    let list = repository
        .create_list(list, post_policy, subscription_policy)
        .await
        .unwrap();
    repository.add_owner(ListOwner::new(list.id, OWNER)).await.unwrap();
    for subscriber in subscribers {
        repository
            .add_subscription(ListSubscription::new(list.id, subscriber))
            .await
            .unwrap();
    }

    let parley = Parley::new(config(), Arc::new(repository.clone()))
        .await
        .unwrap();
    (parley, repository)
}

pub fn post(from: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {LIST_ADDRESS}\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{}@example.org>\r\n\
         \r\n\
         Notes from this week's sync are attached.\r\n",
        ulid::Ulid::new()
    )
    .into_bytes()
}

pub fn submission(from: &str, to: &str, body_first_line: Option<&str>) -> Submission {
    let raw = body_first_line.map_or_else(
        || post(from, "Weekly sync"),
        |line| {
            format!(
                "From: {from}\r\nTo: {to}\r\nSubject: request\r\nMessage-ID: <req-1@example.org>\r\n\r\n{line}\r\n"
            )
            .into_bytes()
        },
    );
    Submission::new(raw, from, to)
}
