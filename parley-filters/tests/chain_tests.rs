#![allow(clippy::expect_used, clippy::unwrap_used)]

use parley_common::{
    ListId, ListOwner, ListSubscription, MailingList, MemoryRepository, Moderation, PostPolicy,
    Repository, SubscriptionPolicy, message,
};
use parley_filters::{
    AddListHeaders, ArchivedAtLink, FilterChain, FinalizeRecipients, FixLineEndings, ListContext,
    Post, PostAction, PostRightsCheck, RejectReason,
};
use pretty_assertions::assert_eq;

const RAW: &[u8] = b"From: Bob <bob@example.org>\r\n\
Subject: Release notes\r\n\
Message-ID: <notes-1@example.org>\r\n\
\r\n\
Draft below.\r\n";

async fn repository(policy: PostPolicy) -> MemoryRepository {
    let repository = MemoryRepository::new();
    repository
        .create_list(
            MailingList {
                id: ListId(10),
                name: "Releases".to_string(),
                address: "releases@lists.example.org".to_string(),
                description: Some("Release coordination".to_string()),
                archive_url: Some("https://archive.example.org".to_string()),
                tag: "releases".to_string(),
                no_echo: true,
                paused: false,
            },
            policy,
            SubscriptionPolicy::Confirm,
        )
        .await
        .unwrap();

    for address in ["alice@example.org", "bob@example.org", "carol@example.org"] {
        repository
            .add_subscription(ListSubscription::new(ListId(10), address))
            .await
            .unwrap();
    }
    repository
        .add_owner(ListOwner::new(ListId(10), "owner@example.org"))
        .await
        .unwrap();

    repository
}

async fn context(policy: PostPolicy) -> ListContext {
    let repository = repository(policy).await;
    ListContext::resolve(&repository, ListId(10)).await.unwrap()
}

#[tokio::test]
async fn test_subscriber_on_open_list_reaches_other_subscribers() {
    let ctx = context(PostPolicy::open()).await;
    let post = Post::new(ListId(10), "bob@example.org", RAW.to_vec());

    let evaluation = FilterChain::standard().evaluate(post, &ctx);
    assert_eq!(evaluation.trace.len(), 5);

    let PostAction::Accept {
        recipients,
        digest,
        mutations,
    } = evaluation.action
    else {
        panic!("expected accept, got {:?}", evaluation.action);
    };
    assert_eq!(recipients, vec!["alice@example.org", "carol@example.org"]);
    assert!(digest.is_empty());

    let rendered = message::render(RAW, mutations.as_slice()).unwrap();
    assert_eq!(
        message::header_value(&rendered, "Subject").as_deref(),
        Some("[releases] Release notes")
    );
    assert_eq!(
        message::header_value(&rendered, "List-Id").as_deref(),
        Some("Releases <releases.lists.example.org>")
    );
    assert!(
        message::header_value(&rendered, "Archived-At")
            .unwrap()
            .starts_with("<https://archive.example.org/releases/")
    );
    assert!(!rendered.windows(2).any(|w| w[1] == b'\n' && w[0] != b'\r'));
}

#[tokio::test]
async fn test_non_subscriber_rejected_before_headers() {
    let ctx = context(PostPolicy::subscribers_only()).await;
    let post = Post::new(ListId(10), "mallory@example.org", RAW.to_vec());

    let evaluation = FilterChain::standard().evaluate(post, &ctx);
    assert_eq!(evaluation.trace, vec![PostRightsCheck::NAME]);
    assert!(matches!(
        evaluation.action,
        PostAction::Reject(RejectReason::Policy(_))
    ));
}

#[tokio::test]
async fn test_rerunning_the_chain_is_stable() {
    let ctx = context(PostPolicy::open()).await;
    let chain = FilterChain::standard();

    let first = chain.run(Post::new(ListId(10), "bob@example.org", RAW.to_vec()), &ctx);
    let second = chain.run(Post::new(ListId(10), "bob@example.org", RAW.to_vec()), &ctx);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_moderated_post_is_held_then_released() {
    let ctx = context(PostPolicy {
        moderation: Moderation::All,
        ..PostPolicy::open()
    })
    .await;
    let chain = FilterChain::standard();

    let held = chain.run(Post::new(ListId(10), "bob@example.org", RAW.to_vec()), &ctx);
    assert!(matches!(held, PostAction::Hold(_)));

    let released = chain.run(
        Post::new(ListId(10), "bob@example.org", RAW.to_vec()).approved(),
        &ctx,
    );
    assert!(matches!(released, PostAction::Accept { ref recipients, .. } if recipients.len() == 2));
}

#[tokio::test]
async fn test_malformed_message_is_structural() {
    let ctx = context(PostPolicy::open()).await;
    let post = Post::new(
        ListId(10),
        "bob@example.org",
        b"Subject: no separator\nthis line is body text".to_vec(),
    );

    let evaluation = FilterChain::standard().evaluate(post, &ctx);
    assert_eq!(
        evaluation.trace,
        vec![PostRightsCheck::NAME, FixLineEndings::NAME]
    );
    let PostAction::Reject(reason) = evaluation.action else {
        panic!("expected reject");
    };
    assert!(reason.is_structural());
}

#[tokio::test]
async fn test_headers_only_post_is_accepted() {
    let ctx = context(PostPolicy::open()).await;
    let raw = b"From: bob@example.org\r\nSubject: See title\r\nMessage-ID: <title-only@example.org>\r\n";
    let post = Post::new(ListId(10), "bob@example.org", raw.to_vec());

    let PostAction::Accept {
        recipients,
        mutations,
        ..
    } = FilterChain::standard().run(post, &ctx)
    else {
        panic!("expected a headers-only post to be accepted");
    };
    assert_eq!(recipients, vec!["alice@example.org", "carol@example.org"]);

    let rendered = message::render(raw, mutations.as_slice()).unwrap();
    assert_eq!(
        message::header_value(&rendered, "Subject").as_deref(),
        Some("[releases] See title")
    );
    assert!(rendered.ends_with(b"\r\n\r\n"));
}

#[tokio::test]
async fn test_list_can_disable_optional_stages() {
    let ctx = context(PostPolicy {
        disabled_filters: vec![
            AddListHeaders::NAME.to_string(),
            ArchivedAtLink::NAME.to_string(),
            FinalizeRecipients::NAME.to_string(),
        ],
        ..PostPolicy::open()
    })
    .await;
    let post = Post::new(ListId(10), "bob@example.org", RAW.to_vec());

    let evaluation = FilterChain::standard().evaluate(post, &ctx);
    assert_eq!(
        evaluation.trace,
        vec![
            PostRightsCheck::NAME,
            FixLineEndings::NAME,
            FinalizeRecipients::NAME
        ]
    );
    let PostAction::Accept { mutations, .. } = evaluation.action else {
        panic!("expected accept");
    };
    assert!(mutations.header("List-Id").is_none());
}

#[tokio::test]
async fn test_owner_posts_to_announce_list() {
    let ctx = context(PostPolicy::announce_only()).await;
    let chain = FilterChain::standard();

    let from_owner = chain.run(Post::new(ListId(10), "owner@example.org", RAW.to_vec()), &ctx);
    let PostAction::Accept { recipients, .. } = from_owner else {
        panic!("expected accept");
    };
    assert_eq!(recipients.len(), 3);

    let from_subscriber = chain.run(Post::new(ListId(10), "alice@example.org", RAW.to_vec()), &ctx);
    assert!(matches!(from_subscriber, PostAction::Reject(_)));
}
