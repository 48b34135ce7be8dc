#![cfg(test)]

use std::{collections::HashSet, rc::Rc};

use futures::channel::mpsc::UnboundedReceiver;
use plaudit_mock_server::{Call, MockServer};

use crate::{
    api::{
        self, CommentId, ContentId, CurrentUser, RelationKey, RelationStatus, UserId, UserSummary,
        Uuid, ValidationError,
    },
    Applied, Config, EntityKey, EntityKind, Error, FollowersView, InvalidationBus, KeyFilter,
    Phase, RelationView, StoreError, ThreadView,
};

struct Env {
    server: Rc<MockServer>,
    bus: InvalidationBus,
    me: UserSummary,
    other: UserSummary,
    content: ContentId,
}

impl Env {
    fn new() -> Env {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt::try_init();
        }
        let me = UserSummary {
            id: UserId(Uuid::from_u128(1)),
            display_name: String::from("me"),
            avatar_url: None,
        };
        let server = Rc::new(MockServer::new(me.clone()));
        let other = server.add_user("other");
        Env {
            server,
            bus: InvalidationBus::new(),
            me,
            other,
            content: ContentId(Uuid::from_u128(42)),
        }
    }

    fn thread(&self) -> ThreadView<MockServer> {
        self.thread_with(Config::default())
    }

    fn thread_with(&self, config: Config) -> ThreadView<MockServer> {
        ThreadView::new(
            self.content,
            self.server.clone(),
            self.bus.clone(),
            CurrentUser::new(self.me.id),
            config,
        )
    }

    fn root(&self, author: &UserSummary, text: &str) -> CommentId {
        self.server.add_comment(self.content, None, author, text).id
    }

    fn reply(&self, root: CommentId, author: &UserSummary, text: &str) -> CommentId {
        self.server
            .add_comment(self.content, Some(root), author, text)
            .id
    }
}

fn drain(rx: &mut UnboundedReceiver<EntityKey>) -> HashSet<EntityKey> {
    std::iter::from_fn(|| rx.try_next().ok().flatten()).collect()
}

#[tokio::test]
async fn expanding_twice_fetches_once() {
    let env = Env::new();
    let root = env.root(&env.other, "root");
    env.reply(root, &env.other, "first");
    env.reply(root, &env.me, "second");
    let view = env.thread();
    view.refresh().await.unwrap();

    env.server.hold(Call::ListReplies);
    let first = view.expansion().ensure_loaded(root);
    let second = view.expansion().ensure_loaded(root);
    assert!(view.expansion().is_loading(root));
    assert!(view.store().get(root).unwrap().loading_replies);
    let (a, b, released) = futures::join!(first, second, async {
        env.server.release(Call::ListReplies)
    });
    assert_eq!(released, 1);
    a.unwrap();
    b.unwrap();
    assert_eq!(env.server.calls(Call::ListReplies), 1);

    let store = view.store();
    let node = store.get(root).unwrap();
    assert!(node.expanded && node.replies_loaded && !node.loading_replies);
    assert_eq!(node.replies.len(), 2);
    drop(store);

    // already loaded, nothing more gets fetched
    view.expansion().ensure_loaded(root).await.unwrap();
    view.on_toggle_expand(root).await.unwrap();
    assert!(!view.store().get(root).unwrap().expanded);
    view.on_toggle_expand(root).await.unwrap();
    assert!(view.store().get(root).unwrap().expanded);
    assert_eq!(env.server.calls(Call::ListReplies), 1);
}

#[tokio::test]
async fn failed_reply_fetch_can_be_retried() {
    let env = Env::new();
    let root = env.root(&env.other, "root");
    env.reply(root, &env.other, "reply");
    let view = env.thread();
    view.refresh().await.unwrap();

    env.server
        .fail_next(Call::ListReplies, api::Error::Network(String::from("offline")));
    let err = view.on_toggle_expand(root).await.unwrap_err();
    assert!(err.is_retryable());
    let node = view.store().get(root).unwrap().clone();
    assert!(!node.replies_loaded && !node.loading_replies && node.replies.is_empty());
    assert!(!view.expansion().is_loading(root));

    view.on_toggle_expand(root).await.unwrap();
    assert_eq!(view.store().get(root).unwrap().replies.len(), 1);
    assert_eq!(env.server.calls(Call::ListReplies), 2);
}

#[tokio::test]
async fn replies_arriving_after_teardown_are_dropped() {
    let env = Env::new();
    let root = env.root(&env.other, "root");
    env.reply(root, &env.other, "reply");
    let view = env.thread();
    view.refresh().await.unwrap();

    env.server.hold(Call::ListReplies);
    let mut fetch = view.expansion().ensure_loaded(root);
    assert!(futures::poll!(&mut fetch).is_pending());
    view.teardown();
    assert!(!view.is_alive());
    env.server.release(Call::ListReplies);
    assert_eq!(fetch.await, Err(Error::TornDown));
    assert!(!view.store().get(root).unwrap().replies_loaded);
    assert!(view.store().get(root).unwrap().replies.is_empty());
}

#[tokio::test]
async fn like_rolls_back_on_network_failure() {
    let env = Env::new();
    let key = RelationKey::like(env.me.id, env.content);
    let view = RelationView::new(
        env.server.clone(),
        env.bus.clone(),
        key,
        RelationStatus {
            active: false,
            count: 10,
        },
    );
    let mut rx = env.bus.subscribe(KeyFilter::All);

    env.server.hold(Call::SetRelation);
    let mut apply = Box::pin(view.on_apply_relation());
    assert!(futures::poll!(apply.as_mut()).is_pending());
    assert!(view.is_active());
    assert_eq!(view.displayed_count(), Some(11));
    assert_eq!(view.state().phase(), Phase::Pending);

    env.server
        .fail_next(Call::SetRelation, api::Error::Network(String::from("timeout")));
    env.server.release(Call::SetRelation);
    let err = apply.await.unwrap_err();
    assert_eq!(err, Error::Api(api::Error::Network(String::from("timeout"))));
    assert!(!view.is_active());
    assert_eq!(view.displayed_count(), Some(10));
    assert_eq!(view.state().phase(), Phase::Idle);
    assert!(!env.server.has_relation(key));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn like_commits_and_invalidates() {
    let env = Env::new();
    let view = RelationView::like(
        env.server.clone(),
        env.bus.clone(),
        CurrentUser::new(env.me.id),
        env.content,
        RelationStatus {
            active: false,
            count: 3,
        },
    );
    let mut rx = env.bus.subscribe(KeyFilter::All);
    assert!(!view.is_stale());

    let applied = view.on_apply_relation().await.unwrap();
    assert_eq!(applied, Applied::Committed { active: true });
    assert!(view.is_active());
    assert_eq!(view.displayed_count(), Some(4));
    assert_eq!(
        drain(&mut rx),
        HashSet::from([EntityKey::content(env.content), EntityKey::likes(env.content)])
    );

    // the server only knows about our like, refreshing adopts its count
    assert!(view.is_stale());
    view.refresh().await.unwrap();
    assert!(!view.is_stale());
    assert!(view.is_active());
    assert_eq!(view.displayed_count(), Some(1));
}

#[tokio::test]
async fn double_tap_sends_one_mutation() {
    let env = Env::new();
    let view = RelationView::like(
        env.server.clone(),
        env.bus.clone(),
        CurrentUser::new(env.me.id),
        env.content,
        RelationStatus {
            active: false,
            count: 0,
        },
    );
    env.server.hold(Call::SetRelation);
    let (first, second, _) = futures::join!(
        view.on_apply_relation(),
        view.on_apply_relation(),
        async { env.server.release(Call::SetRelation) },
    );
    assert_eq!(first, Ok(Applied::Committed { active: true }));
    assert_eq!(second, Ok(Applied::Busy));
    assert_eq!(env.server.calls(Call::SetRelation), 1);
    assert!(view.is_active());
}

#[tokio::test]
async fn follow_invalidates_both_users() {
    let env = Env::new();
    let view = RelationView::follow(
        env.server.clone(),
        env.bus.clone(),
        CurrentUser::new(env.me.id),
        env.other.id,
        RelationStatus {
            active: false,
            count: 0,
        },
    );
    let mut rx = env.bus.subscribe(KeyFilter::Kind(EntityKind::Following));
    let mut all = env.bus.subscribe(KeyFilter::All);
    view.on_apply_relation().await.unwrap();
    assert_eq!(
        drain(&mut all),
        HashSet::from([
            EntityKey::user(env.other.id),
            EntityKey::followers(env.other.id),
            EntityKey::following(env.me.id),
        ])
    );
    assert_eq!(
        drain(&mut rx),
        HashSet::from([EntityKey::following(env.me.id)])
    );
    assert!(env
        .server
        .has_relation(RelationKey::follow(env.me.id, env.other.id)));
}

#[tokio::test]
async fn creating_comments_and_replies() {
    let env = Env::new();
    let view = env.thread();
    view.refresh().await.unwrap();
    let mut rx = env.bus.subscribe(KeyFilter::All);

    let root = view
        .on_create_node(None, String::from("hello"))
        .await
        .unwrap();
    assert_eq!(
        drain(&mut rx),
        HashSet::from([EntityKey::comments(env.content), EntityKey::content(env.content)])
    );
    assert!(view.can_delete(root));

    view.on_toggle_expand(root).await.unwrap();
    let reply = view
        .on_create_node(Some(root), String::from("hi back"))
        .await
        .unwrap();
    assert_eq!(
        drain(&mut rx),
        HashSet::from([EntityKey::replies(root), EntityKey::comments(env.content)])
    );
    let node = view.store().get(root).unwrap().clone();
    assert_eq!(node.replies_count, 1);
    assert_eq!(node.replies.iter().map(|r| r.id).collect::<Vec<_>>(), vec![reply]);

    // two levels only
    let calls = env.server.calls(Call::CreateReply);
    assert_eq!(
        view.on_create_node(Some(reply), String::from("nested")).await,
        Err(Error::Store(StoreError::NotARoot(reply)))
    );
    assert_eq!(env.server.calls(Call::CreateReply), calls);
}

#[tokio::test]
async fn invalid_text_never_reaches_the_server() {
    let env = Env::new();
    let view = env.thread_with(Config {
        max_content_len: 5,
        ..Config::default()
    });
    view.refresh().await.unwrap();
    let cases = [
        (String::from("   "), ValidationError::Empty),
        (String::from("a\0b"), ValidationError::NullByte),
        (String::from("toolong"), ValidationError::TooLong { len: 7, max: 5 }),
    ];
    for (text, expected) in cases {
        assert_eq!(
            view.on_create_node(None, text).await,
            Err(Error::Api(api::Error::Validation(expected)))
        );
    }
    assert_eq!(env.server.calls(Call::CreateComment), 0);
    assert!(view.roots().is_empty());
}

#[tokio::test]
async fn failed_delete_keeps_the_node() {
    let env = Env::new();
    let theirs = env.root(&env.other, "not yours");
    let view = env.thread();
    view.refresh().await.unwrap();
    assert!(!view.can_delete(theirs));

    let mut rx = env.bus.subscribe(KeyFilter::All);
    assert_eq!(
        view.on_delete_node(theirs).await,
        Err(Error::Api(api::Error::PermissionDenied))
    );
    assert!(view.store().contains(theirs));
    assert!(drain(&mut rx).is_empty());

    // unknown ids are rejected locally
    let unknown = CommentId(Uuid::from_u128(1234));
    assert_eq!(
        view.on_delete_node(unknown).await,
        Err(Error::Store(StoreError::NotFound(unknown)))
    );
    assert_eq!(env.server.calls(Call::DeleteComment), 1);
}

#[tokio::test]
async fn deleting_a_root_drops_its_replies() {
    let env = Env::new();
    let root = env.root(&env.me, "root");
    let reply = env.reply(root, &env.other, "reply");
    let kept = env.root(&env.other, "other thread");
    let view = env.thread();
    view.refresh().await.unwrap();
    view.on_toggle_expand(root).await.unwrap();
    assert!(view.store().contains(reply));

    view.on_delete_node(root).await.unwrap();
    assert!(!view.store().contains(root));
    assert!(!view.store().contains(reply));
    assert_eq!(view.roots().iter().map(|r| r.id).collect::<Vec<_>>(), vec![kept]);
    assert!(!env.server.has_comment(reply));
}

#[tokio::test]
async fn deleting_a_reply_updates_its_root() {
    let env = Env::new();
    let root = env.root(&env.other, "root");
    let mine = env.reply(root, &env.me, "mine");
    let theirs = env.reply(root, &env.other, "theirs");
    let view = env.thread();
    view.refresh().await.unwrap();
    view.on_toggle_expand(root).await.unwrap();
    let mut rx = env.bus.subscribe(KeyFilter::Key(EntityKey::replies(root)));

    view.on_delete_node(mine).await.unwrap();
    let node = view.store().get(root).unwrap().clone();
    assert_eq!(node.replies_count, 1);
    assert_eq!(node.replies.iter().map(|r| r.id).collect::<Vec<_>>(), vec![theirs]);
    assert_eq!(drain(&mut rx), HashSet::from([EntityKey::replies(root)]));
}

#[tokio::test]
async fn late_delete_still_invalidates() {
    let env = Env::new();
    let root = env.root(&env.me, "root");
    let view = env.thread();
    view.refresh().await.unwrap();
    let mut rx = env.bus.subscribe(KeyFilter::All);

    env.server.hold(Call::DeleteComment);
    let mut delete = Box::pin(view.on_delete_node(root));
    assert!(futures::poll!(delete.as_mut()).is_pending());
    view.teardown();
    env.server.release(Call::DeleteComment);
    assert_eq!(delete.await, Err(Error::TornDown));
    assert!(!env.server.has_comment(root));
    assert_eq!(
        drain(&mut rx),
        HashSet::from([EntityKey::comments(env.content), EntityKey::content(env.content)])
    );
}

#[tokio::test]
async fn pages_append_in_order() {
    let env = Env::new();
    env.server.set_page_size(2);
    let ids = (0..5)
        .map(|i| env.root(&env.other, &format!("comment {i}")))
        .collect::<Vec<_>>();
    let view = env.thread();
    assert!(view.load_more().await.unwrap());
    assert_eq!(view.total(), Some(5));
    assert_eq!(view.roots().len(), 2);
    assert!(view.load_more().await.unwrap());
    assert!(view.load_more().await.unwrap());
    assert!(!view.has_more());
    assert!(!view.load_more().await.unwrap());
    assert_eq!(view.roots().iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    assert_eq!(env.server.calls(Call::ListComments), 3);
}

#[tokio::test]
async fn other_views_see_staleness() {
    let env = Env::new();
    let first = env.thread();
    let second = env.thread();
    assert!(first.refresh_if_stale().await.unwrap());
    assert!(!first.refresh_if_stale().await.unwrap());
    second.refresh().await.unwrap();

    second
        .on_create_node(None, String::from("new"))
        .await
        .unwrap();
    assert!(first.is_stale());
    assert!(first.roots().is_empty());
    assert!(first.refresh_if_stale().await.unwrap());
    assert_eq!(first.roots().len(), 1);
}

#[tokio::test]
async fn refresh_keeps_expanded_threads() {
    let env = Env::new();
    let root = env.root(&env.other, "root");
    env.reply(root, &env.other, "reply");
    let view = env.thread();
    view.refresh().await.unwrap();
    view.on_toggle_expand(root).await.unwrap();

    env.root(&env.other, "newer");
    view.refresh().await.unwrap();
    assert_eq!(view.roots().len(), 2);
    let node = view.store().get(root).unwrap().clone();
    assert!(node.expanded && node.replies_loaded);
    assert_eq!(node.replies.len(), 1);
}

#[tokio::test]
async fn followers_refresh_keeps_pending_toggle() {
    let env = Env::new();
    let third = env.server.add_user("third");
    env.server
        .add_relation(RelationKey::follow(env.other.id, env.me.id));
    let view = FollowersView::new(
        env.server.clone(),
        env.bus.clone(),
        CurrentUser::new(env.me.id),
        env.me.id,
    );
    assert!(view.is_stale());
    view.refresh().await.unwrap();
    assert!(!view.is_stale());
    assert_eq!(view.entries().len(), 1);
    assert!(!view.entries()[0].toggle.optimistic());

    env.server.hold(Call::SetRelation);
    let mut apply = Box::pin(view.on_apply_relation(env.other.id));
    assert!(futures::poll!(apply.as_mut()).is_pending());
    assert_eq!(view.entries()[0].toggle.phase(), Phase::Pending);

    // a new follower shows up while the follow-back is in flight
    env.server
        .add_relation(RelationKey::follow(third.id, env.me.id));
    view.refresh().await.unwrap();
    assert_eq!(
        view.entries().iter().map(|e| e.user.id).collect::<Vec<_>>(),
        vec![env.other.id, third.id]
    );
    let entry = view.entries()[0].clone();
    assert_eq!(entry.toggle.phase(), Phase::Pending);
    assert!(entry.toggle.optimistic());
    assert!(!entry.toggle.settled());

    env.server.release(Call::SetRelation);
    assert_eq!(apply.await, Ok(Applied::Committed { active: true }));
    assert!(view.entries()[0].toggle.settled());

    let missing = UserId(Uuid::from_u128(99));
    assert!(matches!(
        view.on_apply_relation(missing).await,
        Err(Error::Api(api::Error::Conflict(_)))
    ));
}

#[tokio::test]
async fn create_racing_a_refresh_still_succeeds() {
    let env = Env::new();
    let view = env.thread();
    view.refresh().await.unwrap();

    env.server.hold_responses(Call::CreateComment);
    let mut create = Box::pin(view.on_create_node(None, String::from("hello")));
    assert!(futures::poll!(create.as_mut()).is_pending());

    // the server already stored it, so the refresh brings it in first
    view.refresh().await.unwrap();
    assert_eq!(view.roots().len(), 1);
    let fetched = view.roots()[0].id;

    assert_eq!(env.server.release_responses(Call::CreateComment), 1);
    assert_eq!(create.await, Ok(fetched));
    assert_eq!(view.roots().len(), 1);
    assert_eq!(view.store().len(), 1);
}
