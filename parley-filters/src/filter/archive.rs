use hex::encode;
use parley_common::address;
use sha2::{Digest, Sha256};

use super::Filter;
use crate::{action::FilterOutcome, context::ListContext, post::Post};

/// Hex digits of the SHA-256 kept in archive links and derived ids.
const DIGEST_LEN: usize = 16;

/// Short hex form of the SHA-256 of `data`.
#[must_use]
pub fn digest(data: &[u8]) -> String {
    let mut hash = encode(Sha256::digest(data));
    hash.truncate(DIGEST_LEN);
    hash
}

/// Adds `Archived-At: <{archive}/{tag}/{hash of Message-ID}>`.
///
/// A message without a `Message-ID` gets one derived from the sender and the
/// payload, so the link is the same however often the post is evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchivedAtLink;

impl ArchivedAtLink {
    pub const NAME: &'static str = "archived-at-link";
}

impl Filter for ArchivedAtLink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, mut post: Post, ctx: &ListContext) -> FilterOutcome {
        let Some(base) = ctx.list.archive_url.as_deref() else {
            return FilterOutcome::Continue(post);
        };

        let message_id = if let Some(id) = post.message_id() {
            id
        } else {
            let mut seed = post.sender.clone().into_bytes();
            seed.extend_from_slice(&post.raw);
            let domain = address::split(&ctx.list.address).map_or("localhost", |p| p.domain);
            let id = format!("{}@{domain}", digest(&seed));
            post.mutations.set_header("Message-ID", format!("<{id}>"));
            id
        };

        post.mutations.set_header(
            "Archived-At",
            format!(
                "<{}/{}/{}>",
                base.trim_end_matches('/'),
                ctx.list.tag,
                digest(message_id.as_bytes())
            ),
        );

        FilterOutcome::Continue(post)
    }
}
