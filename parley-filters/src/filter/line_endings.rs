use parley_common::{Mutation, message};

use super::Filter;
use crate::{
    action::{FilterOutcome, PostAction},
    context::ListContext,
    post::Post,
};

/// Makes the distributed copy use CRLF throughout. A message without a
/// header/body separator cannot be rendered and is rejected here.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixLineEndings;

impl FixLineEndings {
    pub const NAME: &'static str = "fix-line-endings";
}

impl Filter for FixLineEndings {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, mut post: Post, _ctx: &ListContext) -> FilterOutcome {
        if let Err(err) = message::split(&post.raw) {
            return FilterOutcome::Terminal(PostAction::structural_reject(err));
        }

        post.record(Mutation::NormalizeLineEndings);
        FilterOutcome::Continue(post)
    }
}
