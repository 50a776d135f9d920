//! Per-list read-only snapshot handed to every filter stage.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parley_common::{
    ListId, ListOwner, ListSubscription, MailingList, PostPolicy, Repository, RepositoryError,
    SenderRole, SubscriptionPolicy, address, internal,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListContext {
    pub list: MailingList,
    pub post_policy: PostPolicy,
    pub subscription_policy: SubscriptionPolicy,
    /// Every subscription, disabled ones included.
    pub subscriptions: Vec<ListSubscription>,
    pub owners: Vec<ListOwner>,
}

impl ListContext {
    #[must_use]
    pub fn new(list: MailingList, post_policy: PostPolicy) -> Self {
        Self {
            list,
            post_policy,
            subscription_policy: SubscriptionPolicy::default(),
            subscriptions: Vec::new(),
            owners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_subscription_policy(mut self, policy: SubscriptionPolicy) -> Self {
        self.subscription_policy = policy;
        self
    }

    #[must_use]
    pub fn with_subscribers(mut self, subscriptions: Vec<ListSubscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    #[must_use]
    pub fn with_owners(mut self, owners: Vec<ListOwner>) -> Self {
        self.owners = owners;
        self
    }

    /// Reads everything the chain needs for `id` from the repository.
    pub async fn resolve(repository: &dyn Repository, id: ListId) -> Result<Self, RepositoryError> {
        let list = repository.list(id).await?;
        let post_policy = repository.post_policy(id).await?;
        let subscription_policy = repository.subscription_policy(id).await?;
        let subscriptions = repository.subscriptions(id).await?;
        let owners = repository.owners(id).await?;

        Ok(Self {
            list,
            post_policy,
            subscription_policy,
            subscriptions,
            owners,
        })
    }

    #[must_use]
    pub fn subscription(&self, sender: &str) -> Option<&ListSubscription> {
        let sender = address::normalize(sender);
        self.subscriptions
            .iter()
            .find(|s| address::normalize(&s.address) == sender)
    }

    #[must_use]
    pub fn is_owner(&self, sender: &str) -> bool {
        let sender = address::normalize(sender);
        self.owners
            .iter()
            .any(|o| address::normalize(&o.address) == sender)
    }

    /// Strongest relationship first: owner, moderator, enabled subscriber.
    #[must_use]
    pub fn sender_role(&self, sender: &str) -> SenderRole {
        if self.is_owner(sender) {
            SenderRole::Owner
        } else if self.post_policy.is_moderator(sender) {
            SenderRole::Moderator
        } else if self.subscription(sender).is_some_and(|s| s.enabled) {
            SenderRole::Subscriber
        } else {
            SenderRole::NonSubscriber
        }
    }

    /// `true` when the list policy turns the named stage off.
    #[must_use]
    pub fn is_disabled(&self, stage: &str) -> bool {
        self.post_policy
            .disabled_filters
            .iter()
            .any(|name| name.eq_ignore_ascii_case(stage))
    }
}

/// Short-lived cache of resolved contexts, keyed by list.
///
/// Entries expire after `ttl`; anything that changes list data should call
/// [`ContextCache::invalidate`] so the next post sees the change.
#[derive(Debug)]
pub struct ContextCache {
    entries: DashMap<ListId, (Arc<ListContext>, Instant)>,
    ttl: Duration,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ContextCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub async fn get(
        &self,
        repository: &dyn Repository,
        id: ListId,
    ) -> Result<Arc<ListContext>, RepositoryError> {
        if let Some(cached) = self.entries.get(&id)
            && cached.1.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&cached.0));
        }

        let context = Arc::new(ListContext::resolve(repository, id).await?);
        self.entries
            .insert(id, (Arc::clone(&context), Instant::now()));
        internal!(level = DEBUG, list = %id, "Resolved list context");
        Ok(context)
    }

    pub fn invalidate(&self, id: ListId) {
        self.entries.remove(&id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
