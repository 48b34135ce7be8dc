use std::rc::Rc;

use plaudit_api::{Api, CurrentUser, RelationKey};
use plaudit_client::{Applied, Config, FollowersView, InvalidationBus, RelationView, ThreadView};
use plaudit_mock_server::{Dump, MockServer};
use rand::{rngs::StdRng, SeedableRng};

fn load() -> (Dump, Rc<MockServer>) {
    let dump = tests::generate_dump(&mut StdRng::seed_from_u64(42));
    let json = serde_json::to_string(&dump).expect("serializing dump");
    let server = MockServer::from_json(dump.users[0].id, &json).expect("loading dump");
    (dump, Rc::new(server))
}

#[tokio::test]
async fn threads_match_generated_data() {
    let (dump, server) = load();
    server.set_page_size(7);
    let me = CurrentUser::new(dump.users[0].id);
    let bus = InvalidationBus::new();
    let contents = dump
        .comments
        .iter()
        .map(|c| c.content_id)
        .collect::<std::collections::BTreeSet<_>>();

    for content in contents {
        let view = ThreadView::new(content, server.clone(), bus.clone(), me, Config::default());
        while view.load_more().await.expect("loading roots") {}
        let expected_roots = dump
            .comments
            .iter()
            .filter(|c| c.content_id == content && c.is_root())
            .collect::<Vec<_>>();
        assert_eq!(view.total(), Some(expected_roots.len() as u32));

        let roots = view.roots().iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(roots, expected_roots.iter().map(|c| c.id).collect::<Vec<_>>());
        for root in roots {
            view.on_toggle_expand(root).await.expect("expanding root");
            let expected = dump
                .comments
                .iter()
                .filter(|c| c.parent_id == Some(root))
                .map(|c| c.id)
                .collect::<Vec<_>>();
            let store = view.store();
            let node = store.get(root).expect("root vanished");
            assert!(node.expanded);
            assert_eq!(node.replies_count as usize, expected.len());
            assert_eq!(node.replies.iter().map(|r| r.id).collect::<Vec<_>>(), expected);
        }
    }
}

#[tokio::test]
async fn likes_and_follows_match_generated_data() {
    let (dump, server) = load();
    let me = CurrentUser::new(dump.users[0].id);
    let bus = InvalidationBus::new();

    let content = dump.comments[0].content_id;
    let key = RelationKey::like(me.id, content);
    let status = server.get_relation(key).await.expect("fetching like");
    let like = RelationView::new(server.clone(), bus.clone(), key, status);
    assert_eq!(like.displayed_count(), Some(status.count));
    assert_eq!(
        like.on_apply_relation().await,
        Ok(Applied::Committed {
            active: !status.active
        })
    );
    assert_eq!(server.has_relation(key), !status.active);
    like.refresh().await.expect("refreshing like");
    assert_eq!(like.displayed_count(), like.state().base_count());

    for user in &dump.users {
        let followers = FollowersView::new(server.clone(), bus.clone(), me, user.id);
        followers.refresh().await.expect("listing followers");
        let expected = dump
            .relations
            .iter()
            .filter_map(|r| match r {
                RelationKey::Follow { follower, followee } if *followee == user.id => {
                    Some(*follower)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        let entries = followers.entries();
        assert_eq!(entries.iter().map(|e| e.user.id).collect::<Vec<_>>(), expected);
        for e in entries.iter() {
            assert_eq!(
                e.toggle.settled(),
                server.has_relation(RelationKey::follow(me.id, e.user.id))
            );
        }
    }
}
