//! The ordered chain of stages a post passes through.
//!
//! Each stage sees the post as left by the previous one and either hands it
//! on or ends evaluation with a [`PostAction`]. Stages are pure: they read the
//! [`ListContext`] snapshot and record header changes on the post, nothing
//! else.

mod archive;
mod headers;
mod line_endings;
mod recipients;
mod rights;

pub use archive::{ArchivedAtLink, digest};
pub use headers::AddListHeaders;
pub use line_endings::FixLineEndings;
pub use recipients::FinalizeRecipients;
pub use rights::PostRightsCheck;

use parley_common::internal;
use parley_tracing::traced;

use crate::{
    action::{FilterOutcome, PostAction},
    context::ListContext,
    post::Post,
};

pub trait Filter: Send + Sync {
    /// Stable name, used in logs and in a list's `disabled_filters`.
    fn name(&self) -> &'static str;

    /// Mandatory stages run even when a list disables them.
    fn mandatory(&self) -> bool {
        false
    }

    fn apply(&self, post: Post, ctx: &ListContext) -> FilterOutcome;
}

/// The verdict together with the stages that actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub action: PostAction,
    pub trace: Vec<&'static str>,
}

pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl FilterChain {
    /// Rights check, line endings, list headers, archive link, recipients.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_filters(vec![
            Box::new(PostRightsCheck),
            Box::new(FixLineEndings),
            Box::new(AddListHeaders),
            Box::new(ArchivedAtLink),
            Box::new(FinalizeRecipients),
        ])
    }

    #[must_use]
    pub fn from_filters(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    /// Runs the chain and returns its verdict.
    #[must_use]
    pub fn run(&self, post: Post, ctx: &ListContext) -> PostAction {
        self.evaluate(post, ctx).action
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(list = %ctx.list.id, sender = %post.sender)), timing(precision = "us"))]
    #[must_use]
    pub fn evaluate(&self, post: Post, ctx: &ListContext) -> Evaluation {
        let mut trace = Vec::with_capacity(self.filters.len());
        let mut current = post;

        for filter in &self.filters {
            if !filter.mandatory() && ctx.is_disabled(filter.name()) {
                internal!(list = %ctx.list.id, stage = filter.name(), "Stage disabled for list");
                continue;
            }

            trace.push(filter.name());
            match filter.apply(current, ctx) {
                FilterOutcome::Continue(post) => current = post,
                FilterOutcome::Terminal(action) => {
                    internal!(
                        level = DEBUG,
                        list = %ctx.list.id,
                        stage = filter.name(),
                        action = action.as_str(),
                        "Chain ended"
                    );
                    return Evaluation { action, trace };
                }
            }
        }

        // The recipient stage always ends the chain; only a custom chain
        // without one falls through here.
        Evaluation {
            action: PostAction::Accept {
                recipients: Vec::new(),
                digest: Vec::new(),
                mutations: current.mutations,
            },
            trace,
        }
    }
}
