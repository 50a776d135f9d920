use parley_common::{SenderRole, address, internal};

use super::Filter;
use crate::{
    action::{FilterOutcome, PostAction, RejectReason},
    context::ListContext,
    post::Post,
};

/// Decides whether the sender may post at all, and whether a moderator must
/// look first.
///
/// | posting rule refuses | moderation needed | result |
/// |----------------------|-------------------|--------|
/// | yes, list holds unauthorised | n/a | `Hold` |
/// | yes, otherwise | n/a | `Reject` |
/// | no | yes | `Hold` |
/// | no | no | continue |
///
/// Posts released by a moderator pass unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostRightsCheck;

impl PostRightsCheck {
    pub const NAME: &'static str = "post-rights-check";
}

const fn describe(role: SenderRole) -> &'static str {
    match role {
        SenderRole::Owner => "owner",
        SenderRole::Moderator => "moderator",
        SenderRole::Subscriber => "subscriber",
        SenderRole::NonSubscriber => "non-subscriber",
    }
}

impl Filter for PostRightsCheck {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn mandatory(&self) -> bool {
        true
    }

    fn apply(&self, post: Post, ctx: &ListContext) -> FilterOutcome {
        let list = ctx.list.id;

        if post.approved {
            internal!(list = %list, sender = %post.sender, "Approved by moderator");
            return FilterOutcome::Continue(post);
        }

        if !address::is_valid(&post.sender) {
            internal!(list = %list, sender = %post.sender, "Sender address is unusable");
            return FilterOutcome::Terminal(PostAction::Reject(RejectReason::Structural(
                format!("sender address `{}` is not valid", post.sender),
            )));
        }

        let policy = &ctx.post_policy;
        let role = ctx.sender_role(&post.sender);

        if !policy.permits(role) {
            if policy.holds_unauthorized() {
                internal!(list = %list, sender = %post.sender, role = describe(role), "Held: posting not permitted");
                return FilterOutcome::Terminal(PostAction::Hold(format!(
                    "{} {} may not post to {} without approval",
                    describe(role),
                    post.sender,
                    ctx.list.address
                )));
            }

            internal!(list = %list, sender = %post.sender, role = describe(role), "Rejected: posting not permitted");
            return FilterOutcome::Terminal(PostAction::policy_reject(format!(
                "{} is not allowed to post to {}",
                post.sender, ctx.list.address
            )));
        }

        if policy.requires_moderation(role) {
            internal!(list = %list, sender = %post.sender, role = describe(role), "Held for moderation");
            return FilterOutcome::Terminal(PostAction::Hold(format!(
                "posts from {} {} are moderated",
                describe(role),
                post.sender
            )));
        }

        internal!(list = %list, sender = %post.sender, role = describe(role), "Posting permitted");
        FilterOutcome::Continue(post)
    }
}
