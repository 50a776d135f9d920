use parley_common::Mutation;

use super::Filter;
use crate::{action::FilterOutcome, context::ListContext, post::Post};

/// RFC 2369/2919 list headers, the list as `Reply-To` and `Sender`, and the
/// subject tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddListHeaders;

impl AddListHeaders {
    pub const NAME: &'static str = "add-list-headers";
}

impl Filter for AddListHeaders {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, mut post: Post, ctx: &ListContext) -> FilterOutcome {
        let list = &ctx.list;
        let headers = &mut post.mutations;

        headers.set_header("List-Id", list.list_id_header());
        headers.set_header("List-Post", list.post_header());
        headers.set_header("List-Help", list.help_header());
        headers.set_header("List-Subscribe", list.subscribe_header());
        headers.set_header("List-Unsubscribe", list.unsubscribe_header());
        if let Some(archive) = list.archive_header() {
            headers.set_header("List-Archive", archive);
        }
        headers.set_header("Reply-To", list.address.clone());
        headers.set_header("Sender", list.owner_address());
        headers.record(Mutation::PrefixSubject {
            prefix: list.subject_prefix(),
        });

        FilterOutcome::Continue(post)
    }
}
