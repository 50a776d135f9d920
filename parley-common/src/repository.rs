//! The repository interface through which the pipeline reads and changes
//! list, policy, subscription, owner and account records.
//!
//! Persistent engines live outside this workspace; [`MemoryRepository`] is the
//! in-process implementation used by tests and small deployments.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    address,
    error::RepositoryError,
    models::{
        Account, Changeset, ListId, ListOwner, ListSubscription, MailingList,
        PendingConfirmation, PostPolicy, SubscriptionPolicy,
    },
};

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Stores a new list with its policies. Fails with `Conflict` when the id
    /// or the address is already taken.
    async fn create_list(
        &self,
        list: MailingList,
        post_policy: PostPolicy,
        subscription_policy: SubscriptionPolicy,
    ) -> Result<MailingList>;

    async fn list(&self, id: ListId) -> Result<MailingList>;

    /// Looks a list up by its posting address (without extension).
    async fn list_by_address(&self, address: &str) -> Result<Option<MailingList>>;

    async fn lists(&self) -> Result<Vec<MailingList>>;

    async fn post_policy(&self, list: ListId) -> Result<PostPolicy>;

    async fn subscription_policy(&self, list: ListId) -> Result<SubscriptionPolicy>;

    /// Replaces the posting policy wholesale after validating it.
    async fn set_post_policy(&self, list: ListId, policy: PostPolicy) -> Result<()>;

    async fn set_subscription_policy(&self, list: ListId, policy: SubscriptionPolicy)
    -> Result<()>;

    /// Every subscription of the list, disabled ones included.
    async fn subscriptions(&self, list: ListId) -> Result<Vec<ListSubscription>>;

    async fn enabled_subscribers(&self, list: ListId) -> Result<Vec<ListSubscription>> {
        Ok(self
            .subscriptions(list)
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    async fn subscription(&self, list: ListId, address: &str) -> Result<Option<ListSubscription>>;

    async fn add_subscription(&self, subscription: ListSubscription) -> Result<ListSubscription>;

    async fn owners(&self, list: ListId) -> Result<Vec<ListOwner>>;

    async fn add_owner(&self, owner: ListOwner) -> Result<()>;

    async fn account(&self, address: &str) -> Result<Account>;

    async fn add_account(&self, account: Account) -> Result<()>;

    /// Lists owned by the account, derived from owner records.
    async fn lists_owned(&self, address: &str) -> Result<Vec<ListId>>;

    /// Applies a changeset all-or-nothing. Empty changesets are `Invalid`.
    async fn apply(&self, changeset: Changeset) -> Result<()>;

    async fn store_confirmation(&self, pending: PendingConfirmation) -> Result<()>;

    /// Removes and returns the pending confirmation for `token`.
    async fn take_confirmation(&self, token: &str) -> Result<Option<PendingConfirmation>>;
}

#[derive(Debug, Clone)]
struct ListRecord {
    list: MailingList,
    post_policy: PostPolicy,
    subscription_policy: SubscriptionPolicy,
}

#[derive(Debug, Default)]
struct State {
    lists: AHashMap<ListId, ListRecord>,
    subscriptions: AHashMap<(ListId, String), ListSubscription>,
    owners: AHashMap<(ListId, String), ListOwner>,
    accounts: AHashMap<String, Account>,
    confirmations: AHashMap<String, PendingConfirmation>,
}

impl State {
    fn record(&self, id: ListId) -> Result<&ListRecord> {
        self.lists
            .get(&id)
            .ok_or(RepositoryError::NotFound("mailing list"))
    }

    fn record_mut(&mut self, id: ListId) -> Result<&mut ListRecord> {
        self.lists
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound("mailing list"))
    }

    fn address_taken(&self, address: &str, except: Option<ListId>) -> bool {
        self.lists
            .values()
            .any(|r| Some(r.list.id) != except && address::normalize(&r.list.address) == address)
    }

    fn apply(&mut self, changeset: &Changeset) -> Result<()> {
        match changeset {
            Changeset::MailingList(change) => {
                let updated = change.apply_to(&self.record(change.id)?.list)?;
                let address = address::normalize(&updated.address);
                if self.address_taken(&address, Some(change.id)) {
                    return Err(RepositoryError::Conflict(format!(
                        "list address {address} is already in use"
                    )));
                }
                self.record_mut(change.id)?.list = updated;
            }
            Changeset::ListSubscription(change) => {
                let key = (change.list, address::normalize(&change.address));
                let current = self
                    .subscriptions
                    .get(&key)
                    .ok_or(RepositoryError::NotFound("list subscription"))?;
                let updated = change.apply_to(current);
                self.subscriptions.insert(key, updated);
            }
            Changeset::ListOwner(change) => {
                let key = (change.list, address::normalize(&change.address));
                let current = self
                    .owners
                    .get(&key)
                    .ok_or(RepositoryError::NotFound("list owner"))?;
                let updated = change.apply_to(current)?;
                let new_key = (change.list, updated.address.clone());
                if new_key != key && self.owners.contains_key(&new_key) {
                    return Err(RepositoryError::Conflict(format!(
                        "{} already owns list {}",
                        updated.address, change.list
                    )));
                }
                self.owners.remove(&key);
                self.owners.insert(new_key, updated);
            }
            Changeset::Account(change) => {
                let key = address::normalize(&change.address);
                let current = self
                    .accounts
                    .get(&key)
                    .ok_or(RepositoryError::NotFound("account"))?;
                let updated = change.apply_to(current);
                self.accounts.insert(key, updated);
            }
        }
        Ok(())
    }
}

/// Process-local repository.
///
/// All records live behind one `parking_lot::RwLock`, which makes every
/// changeset trivially atomic. [`MemoryRepository::set_available`] simulates
/// an outage so callers' storage-error paths can be exercised.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    state: Arc<RwLock<State>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable(
                "memory repository is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_list(
        &self,
        mut list: MailingList,
        post_policy: PostPolicy,
        subscription_policy: SubscriptionPolicy,
    ) -> Result<MailingList> {
        self.check()?;
        post_policy.validate()?;
        if !address::is_valid(&list.address) {
            return Err(RepositoryError::Invalid(format!(
                "address: `{}` is not a valid address",
                list.address
            )));
        }
        list.address = address::normalize(&list.address);

        let mut state = self.state.write();
        if state.lists.contains_key(&list.id) {
            return Err(RepositoryError::Conflict(format!(
                "list {} already exists",
                list.id
            )));
        }
        if state.address_taken(&list.address, None) {
            return Err(RepositoryError::Conflict(format!(
                "list address {} is already in use",
                list.address
            )));
        }

        state.lists.insert(
            list.id,
            ListRecord {
                list: list.clone(),
                post_policy,
                subscription_policy,
            },
        );
        drop(state);

        Ok(list)
    }

    async fn list(&self, id: ListId) -> Result<MailingList> {
        self.check()?;
        Ok(self.state.read().record(id)?.list.clone())
    }

    async fn list_by_address(&self, address: &str) -> Result<Option<MailingList>> {
        self.check()?;
        let address = address::normalize(address);
        Ok(self
            .state
            .read()
            .lists
            .values()
            .find(|r| r.list.address == address)
            .map(|r| r.list.clone()))
    }

    async fn lists(&self) -> Result<Vec<MailingList>> {
        self.check()?;
        let mut lists: Vec<_> = self
            .state
            .read()
            .lists
            .values()
            .map(|r| r.list.clone())
            .collect();
        lists.sort_by_key(|l| l.id);
        Ok(lists)
    }

    async fn post_policy(&self, list: ListId) -> Result<PostPolicy> {
        self.check()?;
        Ok(self.state.read().record(list)?.post_policy.clone())
    }

    async fn subscription_policy(&self, list: ListId) -> Result<SubscriptionPolicy> {
        self.check()?;
        Ok(self.state.read().record(list)?.subscription_policy)
    }

    async fn set_post_policy(&self, list: ListId, policy: PostPolicy) -> Result<()> {
        self.check()?;
        policy.validate()?;
        self.state.write().record_mut(list)?.post_policy = policy;
        Ok(())
    }

    async fn set_subscription_policy(
        &self,
        list: ListId,
        policy: SubscriptionPolicy,
    ) -> Result<()> {
        self.check()?;
        self.state.write().record_mut(list)?.subscription_policy = policy;
        Ok(())
    }

    async fn subscriptions(&self, list: ListId) -> Result<Vec<ListSubscription>> {
        self.check()?;
        let state = self.state.read();
        state.record(list)?;
        let mut subs: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.list == list)
            .cloned()
            .collect();
        drop(state);
        subs.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(subs)
    }

    async fn subscription(&self, list: ListId, address: &str) -> Result<Option<ListSubscription>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .subscriptions
            .get(&(list, address::normalize(address)))
            .cloned())
    }

    async fn add_subscription(&self, mut subscription: ListSubscription) -> Result<ListSubscription> {
        self.check()?;
        if !address::is_valid(&subscription.address) {
            return Err(RepositoryError::Invalid(format!(
                "address: `{}` is not a valid address",
                subscription.address
            )));
        }
        subscription.address = address::normalize(&subscription.address);

        let mut state = self.state.write();
        state.record(subscription.list)?;
        let key = (subscription.list, subscription.address.clone());
        if state.subscriptions.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "{} is already subscribed to list {}",
                subscription.address, subscription.list
            )));
        }
        state.subscriptions.insert(key, subscription.clone());
        drop(state);

        Ok(subscription)
    }

    async fn owners(&self, list: ListId) -> Result<Vec<ListOwner>> {
        self.check()?;
        let state = self.state.read();
        state.record(list)?;
        let mut owners: Vec<_> = state
            .owners
            .values()
            .filter(|o| o.list == list)
            .cloned()
            .collect();
        drop(state);
        owners.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(owners)
    }

    async fn add_owner(&self, mut owner: ListOwner) -> Result<()> {
        self.check()?;
        if !address::is_valid(&owner.address) {
            return Err(RepositoryError::Invalid(format!(
                "address: `{}` is not a valid address",
                owner.address
            )));
        }
        owner.address = address::normalize(&owner.address);

        let mut state = self.state.write();
        state.record(owner.list)?;
        let key = (owner.list, owner.address.clone());
        if state.owners.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "{} already owns list {}",
                owner.address, owner.list
            )));
        }
        state.owners.insert(key, owner);
        Ok(())
    }

    async fn account(&self, address: &str) -> Result<Account> {
        self.check()?;
        self.state
            .read()
            .accounts
            .get(&address::normalize(address))
            .cloned()
            .ok_or(RepositoryError::NotFound("account"))
    }

    async fn add_account(&self, mut account: Account) -> Result<()> {
        self.check()?;
        account.address = address::normalize(&account.address);
        let mut state = self.state.write();
        if state.accounts.contains_key(&account.address) {
            return Err(RepositoryError::Conflict(format!(
                "account {} already exists",
                account.address
            )));
        }
        state.accounts.insert(account.address.clone(), account);
        Ok(())
    }

    async fn lists_owned(&self, address: &str) -> Result<Vec<ListId>> {
        self.check()?;
        let address = address::normalize(address);
        let mut ids: Vec<_> = self
            .state
            .read()
            .owners
            .values()
            .filter(|o| o.address == address)
            .map(|o| o.list)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn apply(&self, changeset: Changeset) -> Result<()> {
        self.check()?;
        if changeset.is_empty() {
            return Err(RepositoryError::Invalid(
                "changeset does not change anything".to_string(),
            ));
        }
        self.state.write().apply(&changeset)
    }

    async fn store_confirmation(&self, pending: PendingConfirmation) -> Result<()> {
        self.check()?;
        let mut state = self.state.write();
        state.record(pending.list)?;
        state
            .confirmations
            .insert(pending.token.to_ascii_uppercase(), pending);
        Ok(())
    }

    async fn take_confirmation(&self, token: &str) -> Result<Option<PendingConfirmation>> {
        self.check()?;
        Ok(self
            .state
            .write()
            .confirmations
            .remove(&token.to_ascii_uppercase()))
    }
}
