use std::sync::Arc;

use parley_common::{ListId, Mutation, Mutations, address, message};

/// A message under evaluation.
///
/// Lives for one pass through the filter chain. Filters never touch `raw`;
/// they record header changes in `mutations`, which are applied when the
/// message is rendered for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub list: ListId,
    /// Normalised envelope sender.
    pub sender: String,
    pub raw: Arc<[u8]>,
    pub mutations: Mutations,
    /// Set when a moderator released the post; the rights check passes it.
    pub approved: bool,
}

impl Post {
    #[must_use]
    pub fn new(list: ListId, sender: &str, raw: impl Into<Arc<[u8]>>) -> Self {
        Self {
            list,
            sender: address::normalize(sender),
            raw: raw.into(),
            mutations: Mutations::new(),
            approved: false,
        }
    }

    #[must_use]
    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }

    /// A header as it will be sent: a recorded change wins over the
    /// original value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.mutations
            .header(name)
            .map(ToString::to_string)
            .or_else(|| message::header_value(&self.raw, name))
    }

    /// The `Message-ID` without angle brackets.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.header("Message-ID")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|id| !id.is_empty())
    }

    pub fn record(&mut self, mutation: Mutation) {
        self.mutations.record(mutation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_header_wins() {
        let mut post = Post::new(
            ListId(1),
            "Alice@Example.org",
            b"Reply-To: alice@example.org\nMessage-ID: <m1@example.org>\n\nhi\n".to_vec(),
        );
        assert_eq!(post.sender, "alice@example.org");
        assert_eq!(post.header("reply-to").as_deref(), Some("alice@example.org"));
        assert_eq!(post.message_id().as_deref(), Some("m1@example.org"));

        post.mutations.set_header("Reply-To", "list@example.org");
        assert_eq!(post.header("Reply-To").as_deref(), Some("list@example.org"));
    }

    #[test]
    fn test_missing_message_id() {
        let post = Post::new(ListId(1), "a@example.org", b"Subject: x\n\nbody".to_vec());
        assert!(post.message_id().is_none());
        assert!(!post.approved);
        assert!(post.approved().approved);
    }
}
