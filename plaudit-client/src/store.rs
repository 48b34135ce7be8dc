use std::collections::HashMap;

use crate::{api::CommentId, merge_list, CommentNode};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("comment {0:?} is not in the thread")]
    NotFound(CommentId),

    #[error("comment {0:?} is already in the thread")]
    DuplicateId(CommentId),

    #[error("comment {0:?} is a reply, replies cannot have replies")]
    NotARoot(CommentId),

    #[error("comment {node:?} does not belong under {expected_parent:?}")]
    WrongParent {
        node: CommentId,
        expected_parent: Option<CommentId>,
    },
}

/// What `ThreadStore::toggle_expanded` did
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expansion {
    Expanded,
    Collapsed,

    /// Replies were never loaded, nothing changed yet: the caller has to fetch
    /// them, and attaching them will expand the node
    NeedsFetch,
}

/// Two-level comment tree for one content item
///
/// The index owns identity: it maps every comment in the tree to its owning
/// root (`None` for roots). The display tree in `roots` is kept in sync with
/// it on every operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ThreadStore {
    roots: Vec<CommentNode>,
    index: HashMap<CommentId, Option<CommentId>>,
}

impl ThreadStore {
    pub fn new() -> ThreadStore {
        ThreadStore::default()
    }

    pub fn roots(&self) -> &[CommentNode] {
        &self.roots
    }

    /// Number of comments in the tree, replies included
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.index.contains_key(&id)
    }

    /// `None` if `id` is not in the tree, `Some(None)` if it is a root
    pub fn parent_of(&self, id: CommentId) -> Option<Option<CommentId>> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: CommentId) -> Option<&CommentNode> {
        match self.index.get(&id)? {
            None => self.root(id),
            Some(root) => self.root(*root)?.replies.iter().find(|r| r.id == id),
        }
    }

    pub fn replies_loaded(&self, root_id: CommentId) -> bool {
        self.root(root_id).map_or(false, |r| r.replies_loaded)
    }

    /// Replaces the root list with a freshly fetched one, keeping the display
    /// state and loaded replies of roots that are still there
    pub fn load_roots(&mut self, items: Vec<CommentNode>) {
        let items = items
            .into_iter()
            .filter(|n| {
                if !n.is_root() {
                    tracing::error!(id = ?n.id, parent = ?n.parent_id, "server listed a reply as a root comment");
                }
                n.is_root()
            })
            .collect();
        self.roots = merge_list(&self.roots, items, |n| n.id);
        self.rebuild_index();
    }

    /// Appends a further page of roots, skipping the ones already known
    pub fn append_roots(&mut self, items: Vec<CommentNode>) {
        for n in items {
            if !n.is_root() {
                tracing::error!(id = ?n.id, parent = ?n.parent_id, "server listed a reply as a root comment");
                continue;
            }
            if self.index.contains_key(&n.id) {
                tracing::debug!(id = ?n.id, "skipping already-loaded root comment");
                continue;
            }
            self.index.insert(n.id, None);
            self.roots.push(n);
        }
    }

    /// Sets the replies of `root_id`, and expands it
    ///
    /// A root that is no longer there (eg. deleted while its replies were
    /// being fetched) makes this a no-op. A batch containing replies of
    /// another comment or ids already elsewhere in the tree is rejected
    /// whole, leaving the root as it was.
    pub fn attach_replies(
        &mut self,
        root_id: CommentId,
        items: Vec<CommentNode>,
    ) -> Result<(), StoreError> {
        match self.index.get(&root_id) {
            None => {
                tracing::warn!(id = ?root_id, "attaching replies to a comment not in the thread");
                return Ok(());
            }
            Some(Some(_)) => return Err(StoreError::NotARoot(root_id)),
            Some(None) => (),
        }

        if let Err(err) = self.check_replies(root_id, &items) {
            tracing::error!(id = ?root_id, ?err, "rejecting malformed replies");
            if let Some(root) = self.root_mut(root_id) {
                root.loading_replies = false;
            }
            return Err(err);
        }

        let root = self
            .root_mut(root_id)
            .ok_or(StoreError::NotFound(root_id))?;
        let old = std::mem::take(&mut root.replies);
        root.replies = merge_list(&old, items, |n| n.id);
        root.replies_loaded = true;
        root.expanded = true;
        root.loading_replies = false;
        let new_ids = root.replies.iter().map(|r| r.id).collect::<Vec<_>>();

        for r in old {
            self.index.remove(&r.id);
        }
        self.index
            .extend(new_ids.into_iter().map(|id| (id, Some(root_id))));
        Ok(())
    }

    pub fn insert_root(&mut self, node: CommentNode) -> Result<(), StoreError> {
        if !node.is_root() {
            return Err(StoreError::WrongParent {
                node: node.id,
                expected_parent: None,
            });
        }
        if self.index.contains_key(&node.id) {
            return Err(StoreError::DuplicateId(node.id));
        }
        self.index.insert(node.id, None);
        self.roots.push(node);
        Ok(())
    }

    /// Appends a newly created reply. Replies that were never loaded stay
    /// that way, so that expanding the root still fetches its full list.
    pub fn insert_reply(&mut self, root_id: CommentId, node: CommentNode) -> Result<(), StoreError> {
        match self.index.get(&root_id) {
            None => return Err(StoreError::NotFound(root_id)),
            Some(Some(_)) => return Err(StoreError::NotARoot(root_id)),
            Some(None) => (),
        }
        if node.parent_id != Some(root_id) {
            return Err(StoreError::WrongParent {
                node: node.id,
                expected_parent: Some(root_id),
            });
        }
        if self.index.contains_key(&node.id) {
            return Err(StoreError::DuplicateId(node.id));
        }
        let root = self
            .root_mut(root_id)
            .ok_or(StoreError::NotFound(root_id))?;
        root.replies_count += 1;
        let id = node.id;
        root.replies.push(node);
        self.index.insert(id, Some(root_id));
        Ok(())
    }

    /// Removes a root (along with its replies) or a reply
    pub fn remove(&mut self, id: CommentId) -> Result<CommentNode, StoreError> {
        let parent = self.index.remove(&id).ok_or(StoreError::NotFound(id))?;
        match parent {
            None => {
                let pos = self
                    .roots
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or(StoreError::NotFound(id))?;
                let root = self.roots.remove(pos);
                for r in root.replies.iter() {
                    self.index.remove(&r.id);
                }
                Ok(root)
            }
            Some(root_id) => {
                let root = self
                    .root_mut(root_id)
                    .ok_or(StoreError::NotFound(root_id))?;
                let pos = root
                    .replies
                    .iter()
                    .position(|r| r.id == id)
                    .ok_or(StoreError::NotFound(id))?;
                root.replies_count = root.replies_count.saturating_sub(1);
                Ok(root.replies.remove(pos))
            }
        }
    }

    /// Collapses an expanded root, or expands it if its replies are already
    /// there. Collapsing keeps the loaded replies around.
    pub fn toggle_expanded(&mut self, root_id: CommentId) -> Result<Expansion, StoreError> {
        match self.index.get(&root_id) {
            None => return Err(StoreError::NotFound(root_id)),
            Some(Some(_)) => return Err(StoreError::NotARoot(root_id)),
            Some(None) => (),
        }
        let root = self
            .root_mut(root_id)
            .ok_or(StoreError::NotFound(root_id))?;
        Ok(if root.expanded {
            root.expanded = false;
            Expansion::Collapsed
        } else if root.replies_loaded {
            root.expanded = true;
            Expansion::Expanded
        } else {
            Expansion::NeedsFetch
        })
    }

    /// Returns false if `root_id` is not a root of this thread
    pub fn set_loading(&mut self, root_id: CommentId, loading: bool) -> bool {
        match self.root_mut(root_id) {
            Some(root) => {
                root.loading_replies = loading;
                true
            }
            None => false,
        }
    }

    fn root(&self, id: CommentId) -> Option<&CommentNode> {
        self.roots.iter().find(|r| r.id == id)
    }

    fn root_mut(&mut self, id: CommentId) -> Option<&mut CommentNode> {
        self.roots.iter_mut().find(|r| r.id == id)
    }

    fn check_replies(&self, root_id: CommentId, items: &[CommentNode]) -> Result<(), StoreError> {
        let mut batch = std::collections::HashSet::with_capacity(items.len());
        for n in items {
            if n.parent_id != Some(root_id) {
                return Err(StoreError::WrongParent {
                    node: n.id,
                    expected_parent: Some(root_id),
                });
            }
            let elsewhere = matches!(self.index.get(&n.id), Some(p) if *p != Some(root_id));
            if elsewhere || !batch.insert(n.id) {
                return Err(StoreError::DuplicateId(n.id));
            }
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for root in self.roots.iter() {
            self.index.insert(root.id, None);
        }
        for root in self.roots.iter_mut() {
            let index = &mut self.index;
            let root_id = root.id;
            root.replies.retain(|r| {
                if index.contains_key(&r.id) {
                    tracing::error!(id = ?r.id, "reply is already elsewhere in the thread, dropping it");
                    return false;
                }
                index.insert(r.id, Some(root_id));
                true
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContentId, Time, UserId, UserSummary, Uuid};

    fn cid(n: u128) -> CommentId {
        CommentId(Uuid::from_u128(n))
    }

    fn node(id: u128, parent: Option<u128>, replies_count: u32) -> CommentNode {
        CommentNode::from(crate::api::Comment {
            id: cid(id),
            content_id: ContentId::stub(),
            parent_id: parent.map(cid),
            author: UserSummary {
                id: UserId::stub(),
                display_name: String::from("alice"),
                avatar_url: None,
            },
            text: format!("comment {id}"),
            created_at: Time::default(),
            replies_count,
        })
    }

    fn check_invariants(s: &ThreadStore) {
        let mut seen = 0;
        for root in s.roots() {
            assert_eq!(s.parent_of(root.id), Some(None));
            seen += 1;
            for r in root.replies.iter() {
                assert_eq!(s.parent_of(r.id), Some(Some(root.id)));
                assert!(r.replies.is_empty());
                assert!(!r.expanded);
                seen += 1;
            }
        }
        assert_eq!(seen, s.len(), "index and tree disagree");
    }

    fn attach(s: &mut ThreadStore, root: u128, replies: &[u128]) {
        s.attach_replies(
            cid(root),
            replies.iter().map(|r| node(*r, Some(root), 0)).collect(),
        )
        .unwrap();
    }

    fn two_threads() -> ThreadStore {
        let mut s = ThreadStore::new();
        s.load_roots(vec![node(1, None, 2), node(2, None, 1)]);
        attach(&mut s, 1, &[10, 11]);
        attach(&mut s, 2, &[20]);
        check_invariants(&s);
        s
    }

    fn reply_ids(s: &ThreadStore, root: u128) -> Vec<CommentId> {
        s.get(cid(root))
            .unwrap()
            .replies
            .iter()
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn expand_then_remove_reply() {
        let mut s = ThreadStore::new();
        s.load_roots(vec![node(1, None, 2)]);
        assert_eq!(s.toggle_expanded(cid(1)), Ok(Expansion::NeedsFetch));
        assert!(s.set_loading(cid(1), true));

        attach(&mut s, 1, &[10, 11]);
        let a = s.get(cid(1)).unwrap();
        assert!(a.expanded);
        assert!(!a.loading_replies);
        assert_eq!(reply_ids(&s, 1), vec![cid(10), cid(11)]);

        let removed = s.remove(cid(10)).unwrap();
        assert_eq!(removed.id, cid(10));
        assert_eq!(reply_ids(&s, 1), vec![cid(11)]);
        assert_eq!(s.get(cid(1)).unwrap().replies_count, 1);
        check_invariants(&s);
    }

    #[test]
    fn remove_root_leaves_other_threads_alone() {
        let mut s = two_threads();
        let removed = s.remove(cid(1)).unwrap();
        assert_eq!(removed.replies.len(), 2);
        assert_eq!(s.roots().len(), 1);
        assert_eq!(reply_ids(&s, 2), vec![cid(20)]);
        assert_eq!(s.get(cid(2)).unwrap().replies_count, 1);
        assert!(!s.contains(cid(10)));
        assert!(!s.contains(cid(11)));
        assert_eq!(s.remove(cid(10)), Err(StoreError::NotFound(cid(10))));
        check_invariants(&s);
    }

    #[test]
    fn remove_reply_touches_only_its_root() {
        let mut s = two_threads();
        s.remove(cid(11)).unwrap();
        assert_eq!(reply_ids(&s, 1), vec![cid(10)]);
        assert_eq!(s.get(cid(1)).unwrap().replies_count, 1);
        assert_eq!(reply_ids(&s, 2), vec![cid(20)]);
        assert_eq!(s.get(cid(2)).unwrap().replies_count, 1);
        check_invariants(&s);
    }

    #[test]
    fn reloading_roots_keeps_expanded_threads() {
        let mut s = two_threads();
        s.toggle_expanded(cid(2)).unwrap(); // collapse
        s.load_roots(vec![node(1, None, 3), node(3, None, 0), node(2, None, 1)]);

        let ids = s.roots().iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![cid(1), cid(3), cid(2)]);
        let one = s.get(cid(1)).unwrap();
        assert!(one.expanded);
        assert_eq!(one.replies_count, 3);
        assert_eq!(reply_ids(&s, 1), vec![cid(10), cid(11)]);
        let two = s.get(cid(2)).unwrap();
        assert!(!two.expanded);
        assert!(two.replies_loaded);
        assert!(!s.get(cid(3)).unwrap().replies_loaded);
        check_invariants(&s);

        // roots the server no longer lists go away, along with their replies
        s.load_roots(vec![node(3, None, 0)]);
        assert_eq!(s.len(), 1);
        check_invariants(&s);
    }

    #[test]
    fn replies_are_never_listed_as_roots() {
        let mut s = ThreadStore::new();
        s.load_roots(vec![node(1, None, 0), node(10, Some(1), 0)]);
        assert_eq!(s.len(), 1);
        s.append_roots(vec![node(11, Some(1), 0), node(1, None, 0), node(2, None, 0)]);
        assert_eq!(s.len(), 2);
        check_invariants(&s);
    }

    #[test]
    fn attach_replies_edge_cases() {
        let mut s = two_threads();

        // deleted while fetching: silently ignored
        assert_eq!(s.attach_replies(cid(99), vec![node(98, Some(99), 0)]), Ok(()));
        assert!(!s.contains(cid(98)));

        // only one level of nesting
        assert_eq!(
            s.attach_replies(cid(10), vec![node(12, Some(10), 0)]),
            Err(StoreError::NotARoot(cid(10))),
        );

        // malformed batches leave the root untouched
        s.set_loading(cid(1), true);
        assert_eq!(
            s.attach_replies(cid(1), vec![node(12, Some(1), 0), node(21, Some(2), 0)]),
            Err(StoreError::WrongParent {
                node: cid(21),
                expected_parent: Some(cid(1)),
            }),
        );
        assert_eq!(
            s.attach_replies(cid(1), vec![node(20, Some(1), 0)]),
            Err(StoreError::DuplicateId(cid(20))),
        );
        let one = s.get(cid(1)).unwrap();
        assert!(!one.loading_replies);
        assert_eq!(reply_ids(&s, 1), vec![cid(10), cid(11)]);

        // refetching replaces the list
        attach(&mut s, 1, &[11, 12]);
        assert_eq!(reply_ids(&s, 1), vec![cid(11), cid(12)]);
        assert!(!s.contains(cid(10)));
        check_invariants(&s);
    }

    #[test]
    fn insert_appends_in_creation_order() {
        let mut s = two_threads();
        s.insert_root(node(3, None, 0)).unwrap();
        assert_eq!(s.roots().last().unwrap().id, cid(3));
        assert_eq!(
            s.insert_root(node(3, None, 0)),
            Err(StoreError::DuplicateId(cid(3)))
        );
        assert_eq!(
            s.insert_root(node(4, Some(1), 0)),
            Err(StoreError::WrongParent {
                node: cid(4),
                expected_parent: None,
            }),
        );

        s.insert_reply(cid(1), node(12, Some(1), 0)).unwrap();
        assert_eq!(reply_ids(&s, 1), vec![cid(10), cid(11), cid(12)]);
        assert_eq!(s.get(cid(1)).unwrap().replies_count, 3);
        assert_eq!(
            s.insert_reply(cid(10), node(13, Some(10), 0)),
            Err(StoreError::NotARoot(cid(10))),
        );
        assert_eq!(
            s.insert_reply(cid(2), node(14, Some(1), 0)),
            Err(StoreError::WrongParent {
                node: cid(14),
                expected_parent: Some(cid(2)),
            }),
        );

        // replying to a thread never expanded keeps it unloaded
        s.insert_reply(cid(3), node(30, Some(3), 0)).unwrap();
        assert!(!s.replies_loaded(cid(3)));
        assert_eq!(s.toggle_expanded(cid(3)), Ok(Expansion::NeedsFetch));
        check_invariants(&s);
    }

    #[test]
    fn collapsing_keeps_replies() {
        let mut s = two_threads();
        assert_eq!(s.toggle_expanded(cid(1)), Ok(Expansion::Collapsed));
        assert_eq!(reply_ids(&s, 1), vec![cid(10), cid(11)]);
        assert_eq!(s.toggle_expanded(cid(1)), Ok(Expansion::Expanded));
        assert_eq!(
            s.toggle_expanded(cid(10)),
            Err(StoreError::NotARoot(cid(10)))
        );
        assert_eq!(
            s.toggle_expanded(cid(42)),
            Err(StoreError::NotFound(cid(42)))
        );
    }
}
