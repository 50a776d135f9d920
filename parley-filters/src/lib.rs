//! Post evaluation for parley: the per-list context, the filter chain that
//! turns a submission into a [`PostAction`], and the list request parser.

pub mod action;
pub mod context;
pub mod filter;
pub mod post;
pub mod request;

pub use action::{FilterOutcome, PostAction, RejectReason};
pub use context::{ContextCache, ListContext};
pub use filter::{
    AddListHeaders, ArchivedAtLink, Evaluation, Filter, FilterChain, FinalizeRecipients,
    FixLineEndings, PostRightsCheck,
};
pub use post::Post;
pub use request::ListRequest;
