#![cfg(test)]

use std::{collections::HashSet, panic::AssertUnwindSafe, rc::Rc};

use plaudit_mock_server::{Call, MockServer};

use crate::{
    api::{self, CommentId, ContentId, CurrentUser, RelationKey, RelationStatus, UserId, UserSummary, Uuid},
    Applied, Config, Error, InvalidationBus, Phase, RelationView, ThreadView,
};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                let _ = tracing_subscriber::fmt::try_init();
            }
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn me() -> UserSummary {
    UserSummary {
        id: UserId(Uuid::from_u128(1)),
        display_name: String::from("me"),
        avatar_url: None,
    }
}

#[derive(Clone, Copy, Debug, bolero::generator::TypeGenerator)]
enum FailedCall {
    ListComments,
    ListReplies,
    CreateComment,
    CreateReply,
    DeleteComment,
}

impl From<FailedCall> for Call {
    fn from(c: FailedCall) -> Call {
        match c {
            FailedCall::ListComments => Call::ListComments,
            FailedCall::ListReplies => Call::ListReplies,
            FailedCall::CreateComment => Call::CreateComment,
            FailedCall::CreateReply => Call::CreateReply,
            FailedCall::DeleteComment => Call::DeleteComment,
        }
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum ThreadOp {
    Refresh,
    LoadMore,
    Create { reply_to: Option<u8>, text_len: u8 },
    Delete(u8),
    ToggleExpand(u8),
    ForeignComment { reply_to: Option<u8> },
    FailNext(FailedCall),
}

fn known_ids(view: &ThreadView<MockServer>) -> Vec<CommentId> {
    view.roots()
        .iter()
        .flat_map(|r| std::iter::once(r.id).chain(r.replies.iter().map(|c| c.id)))
        .collect()
}

fn pick(ids: &[CommentId], i: u8) -> Option<CommentId> {
    match ids.is_empty() {
        true => None,
        false => Some(ids[i as usize % ids.len()]),
    }
}

fn check_thread(view: &ThreadView<MockServer>, server: &MockServer) {
    let ids = known_ids(view);
    assert_eq!(
        ids.len(),
        ids.iter().collect::<HashSet<_>>().len(),
        "thread has duplicate ids"
    );
    for root in view.roots().iter() {
        assert!(root.is_root());
        for r in &root.replies {
            assert_eq!(r.parent_id, Some(root.id), "reply listed under the wrong root");
        }
    }
    for id in ids {
        assert!(server.has_comment(id), "thread shows {id:?}, unknown to the server");
    }
}

do_tokio_test!(fuzz_thread_view, Vec<ThreadOp>, |ops: Vec<ThreadOp>| async move {
    let server = Rc::new(MockServer::new(me()));
    server.set_page_size(3);
    let other = server.add_user("other");
    let content = ContentId(Uuid::from_u128(42));
    let view = ThreadView::new(
        content,
        server.clone(),
        InvalidationBus::new(),
        CurrentUser::new(me().id),
        Config::default(),
    );

    for op in ops {
        let ids = known_ids(&view);
        match op {
            ThreadOp::Refresh => {
                let _ = view.refresh().await;
            }
            ThreadOp::LoadMore => {
                let _ = view.load_more().await;
            }
            ThreadOp::Create { reply_to, text_len } => {
                let parent = reply_to.and_then(|i| pick(&ids, i));
                let text = "x".repeat(text_len as usize % 4);
                let calls_before =
                    server.calls(Call::CreateComment) + server.calls(Call::CreateReply);
                let res = view.on_create_node(parent, text).await;
                let calls_after =
                    server.calls(Call::CreateComment) + server.calls(Call::CreateReply);
                if text_len % 4 == 0 {
                    assert!(matches!(res, Err(Error::Api(api::Error::Validation(_)))));
                    assert_eq!(calls_before, calls_after);
                }
                if let Ok(id) = res {
                    assert!(view.store().contains(id));
                }
            }
            ThreadOp::Delete(i) => {
                if let Some(id) = pick(&ids, i) {
                    let res = view.on_delete_node(id).await;
                    assert_eq!(res.is_ok(), !view.store().contains(id));
                }
            }
            ThreadOp::ToggleExpand(i) => {
                if let Some(id) = pick(&ids, i) {
                    let _ = view.on_toggle_expand(id).await;
                }
            }
            ThreadOp::ForeignComment { reply_to } => {
                let roots = view.roots().iter().map(|r| r.id).collect::<Vec<_>>();
                let parent = reply_to.and_then(|i| pick(&roots, i));
                server.add_comment(content, parent, &other, "from someone else");
            }
            ThreadOp::FailNext(call) => server.fail_next(call.into(), api::Error::Network(String::from("fuzzed"))),
        }
        check_thread(&view, &server);
    }

    // once everything got refetched, the thread matches the server
    server.clear_failures();
    view.refresh().await.expect("refreshing thread");
    while view.load_more().await.expect("loading more roots") {}
    let loaded = view
        .roots()
        .iter()
        .filter(|r| r.replies_loaded)
        .map(|r| r.id)
        .collect::<Vec<_>>();
    for root in loaded {
        view.reload_replies(root).await.expect("reloading replies");
    }
    let dump = server.dump();
    let server_roots = dump
        .comments
        .iter()
        .filter(|c| c.content_id == content && c.is_root())
        .collect::<Vec<_>>();
    let roots = view.roots();
    assert_eq!(
        roots.iter().map(|r| r.id).collect::<Vec<_>>(),
        server_roots.iter().map(|c| c.id).collect::<Vec<_>>(),
    );
    for (root, expected) in roots.iter().zip(server_roots) {
        assert_eq!(root.replies_count, expected.replies_count);
        if root.replies_loaded {
            let expected_replies = dump
                .comments
                .iter()
                .filter(|c| c.parent_id == Some(root.id))
                .map(|c| c.id)
                .collect::<Vec<_>>();
            assert_eq!(root.replies.iter().map(|r| r.id).collect::<Vec<_>>(), expected_replies);
        }
    }
});

#[derive(Clone, Copy, Debug, bolero::generator::TypeGenerator)]
enum LikeOp {
    Apply,
    ApplyTwice,
    FailNext,
    Refresh,
}

do_tokio_test!(fuzz_like_button, Vec<LikeOp>, |ops: Vec<LikeOp>| async move {
    let server = Rc::new(MockServer::new(me()));
    let content = ContentId(Uuid::from_u128(42));
    let key = RelationKey::like(me().id, content);
    let view = RelationView::new(
        server.clone(),
        InvalidationBus::new(),
        key,
        RelationStatus {
            active: false,
            count: 0,
        },
    );

    for op in ops {
        let sets_before = server.calls(Call::SetRelation);
        match op {
            LikeOp::Apply => {
                let was = view.is_active();
                match view.on_apply_relation().await {
                    Ok(applied) => assert_eq!(applied, Applied::Committed { active: !was }),
                    Err(_) => assert_eq!(view.is_active(), was),
                }
                assert_eq!(server.calls(Call::SetRelation), sets_before + 1);
            }
            LikeOp::ApplyTwice => {
                let was = view.is_active();
                server.hold(Call::SetRelation);
                let (first, second, released) = futures::join!(
                    view.on_apply_relation(),
                    view.on_apply_relation(),
                    async { server.release(Call::SetRelation) },
                );
                assert_eq!(released, 1);
                assert_eq!(second, Ok(Applied::Busy));
                match first {
                    Ok(applied) => assert_eq!(applied, Applied::Committed { active: !was }),
                    Err(_) => assert_eq!(view.is_active(), was),
                }
                assert_eq!(server.calls(Call::SetRelation), sets_before + 1);
            }
            LikeOp::FailNext => {
                server.fail_next(Call::SetRelation, api::Error::Network(String::from("fuzzed")))
            }
            LikeOp::Refresh => {
                let _ = view.refresh().await;
            }
        }
        let state = view.state();
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.optimistic(), state.settled());
        assert_eq!(state.settled(), server.has_relation(key));
        let expected = server.has_relation(key) as u64;
        assert_eq!(state.displayed_count(), Some(expected));
    }
});
