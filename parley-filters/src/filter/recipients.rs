use std::collections::BTreeSet;

use parley_common::{address, internal};

use super::Filter;
use crate::{
    action::{FilterOutcome, PostAction},
    context::ListContext,
    post::Post,
};

/// Computes who receives the post and ends the chain.
///
/// Individual delivery goes to enabled subscribers that neither opted out of
/// mail nor take digests. Digest subscribers are reported on their own. On a
/// `no_echo` list the sender is left out unless their subscription asks for
/// their own posts. A paused list defers distribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeRecipients;

impl FinalizeRecipients {
    pub const NAME: &'static str = "finalize-recipients";
}

impl Filter for FinalizeRecipients {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn mandatory(&self) -> bool {
        true
    }

    fn apply(&self, post: Post, ctx: &ListContext) -> FilterOutcome {
        let sender = address::normalize(&post.sender);
        let skip_sender = ctx.list.no_echo
            && !ctx
                .subscription(&sender)
                .is_some_and(|s| s.receive_own_posts);

        let mut recipients = BTreeSet::new();
        let mut digest = BTreeSet::new();
        for subscription in &ctx.subscriptions {
            let address = address::normalize(&subscription.address);
            if skip_sender && address == sender {
                continue;
            }

            if subscription.receives_posts() {
                recipients.insert(address);
            } else if subscription.enabled && subscription.digest && !subscription.no_mail {
                digest.insert(address);
            }
        }

        let recipients: Vec<String> = recipients.into_iter().collect();
        let digest: Vec<String> = digest.into_iter().collect();
        internal!(
            level = DEBUG,
            list = %ctx.list.id,
            recipients = recipients.len(),
            digest = digest.len(),
            "Recipients resolved"
        );

        let action = if ctx.list.paused {
            PostAction::Defer {
                recipients,
                digest,
                mutations: post.mutations,
                reason: "list paused".to_string(),
            }
        } else {
            PostAction::Accept {
                recipients,
                digest,
                mutations: post.mutations,
            }
        };

        FilterOutcome::Terminal(action)
    }
}

#[cfg(test)]
mod tests {
    use parley_common::{ListId, ListSubscription};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fixtures;

    fn finalize(ctx: &ListContext, sender: &str) -> PostAction {
        let post = Post::new(ListId(1), sender, fixtures::MESSAGE.to_vec());
        FinalizeRecipients
            .apply(post, ctx)
            .into_action()
            .unwrap()
    }

    #[test]
    fn test_sender_is_excluded_on_no_echo_lists() {
        let ctx = fixtures::context(&["alice@example.org", "bob@example.org", "carol@example.org"]);
        let PostAction::Accept { recipients, .. } = finalize(&ctx, "Alice@example.org") else {
            panic!("expected accept");
        };
        assert_eq!(recipients, vec!["bob@example.org", "carol@example.org"]);
    }

    #[test]
    fn test_receive_own_posts_overrides_no_echo() {
        let mut ctx = fixtures::context(&["alice@example.org", "bob@example.org"]);
        ctx.subscriptions[0].receive_own_posts = true;
        let PostAction::Accept { recipients, .. } = finalize(&ctx, "alice@example.org") else {
            panic!("expected accept");
        };
        assert_eq!(recipients, vec!["alice@example.org", "bob@example.org"]);
    }

    #[test]
    fn test_preferences_and_duplicates() {
        let mut ctx = fixtures::context(&["b@example.org", "a@example.org"]);
        let mut digest = ListSubscription::new(ListId(1), "digest@example.org");
        digest.digest = true;
        let mut quiet = ListSubscription::new(ListId(1), "quiet@example.org");
        quiet.no_mail = true;
        let mut gone = ListSubscription::new(ListId(1), "gone@example.org");
        gone.enabled = false;
        let mut shouty = ListSubscription::new(ListId(1), "a@example.org");
        shouty.address = "A@EXAMPLE.ORG".to_string();
        ctx.subscriptions.extend([digest, quiet, gone, shouty]);

        let PostAction::Accept {
            recipients, digest, ..
        } = finalize(&ctx, "outsider@example.org")
        else {
            panic!("expected accept");
        };
        assert_eq!(recipients, vec!["a@example.org", "b@example.org"]);
        assert_eq!(digest, vec!["digest@example.org"]);
    }

    #[test]
    fn test_paused_list_defers() {
        let mut ctx = fixtures::context(&["bob@example.org"]);
        ctx.list.paused = true;
        let PostAction::Defer {
            recipients, reason, ..
        } = finalize(&ctx, "alice@example.org")
        else {
            panic!("expected defer");
        };
        assert_eq!(recipients, vec!["bob@example.org"]);
        assert_eq!(reason, "list paused");
    }
}
