mod changesets;
mod list;
mod membership;
mod policy;

pub use changesets::{
    AccountChangeset, Changeset, ListOwnerChangeset, ListSubscriptionChangeset,
    MailingListChangeset,
};
pub use list::{ListId, MailingList};
pub use membership::{Account, ListOwner, ListSubscription, PendingConfirmation};
pub use policy::{
    Moderation, PostPolicy, Posting, SenderRole, SubscriptionPolicy, UnauthorizedAction,
};
