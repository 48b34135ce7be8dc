use std::{cell::RefCell, collections::HashMap, rc::Rc};

use futures::channel::mpsc;

use crate::api::{CommentId, ContentId, RelationKey, UserId, Uuid};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EntityKind {
    /// A content item itself, including its aggregate counts
    Content,

    /// The root comment list of a content item
    Comments,

    /// The replies of a root comment
    Replies,

    User,
    Followers,
    Following,
    Likes,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityKey {
    pub fn content(c: ContentId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Content,
            id: c.0,
        }
    }

    pub fn comments(c: ContentId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Comments,
            id: c.0,
        }
    }

    pub fn replies(c: CommentId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Replies,
            id: c.0,
        }
    }

    pub fn user(u: UserId) -> EntityKey {
        EntityKey {
            kind: EntityKind::User,
            id: u.0,
        }
    }

    pub fn followers(u: UserId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Followers,
            id: u.0,
        }
    }

    pub fn following(u: UserId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Following,
            id: u.0,
        }
    }

    pub fn likes(c: ContentId) -> EntityKey {
        EntityKey {
            kind: EntityKind::Likes,
            id: c.0,
        }
    }

    /// Keys whose cached copy is stale once `key` changed on the server
    pub fn invalidated_by(key: RelationKey) -> Vec<EntityKey> {
        match key {
            RelationKey::Like { content, .. } => {
                vec![EntityKey::content(content), EntityKey::likes(content)]
            }
            RelationKey::Follow { follower, followee } => vec![
                EntityKey::user(followee),
                EntityKey::followers(followee),
                EntityKey::following(follower),
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyFilter {
    All,
    Kind(EntityKind),
    Key(EntityKey),
}

impl KeyFilter {
    pub fn matches(&self, key: &EntityKey) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Kind(k) => key.kind == *k,
            KeyFilter::Key(k) => key == k,
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    generations: HashMap<EntityKey, u64>,
    subscribers: Vec<(KeyFilter, mpsc::UnboundedSender<EntityKey>)>,
}

/// Tells views that their cached copy of an entity may be stale
///
/// Nothing gets pushed but the key: views refetch when they next read. Clones
/// share the same state, there is one bus per client session.
#[derive(Clone, Debug, Default)]
pub struct InvalidationBus(Rc<RefCell<BusState>>);

impl InvalidationBus {
    pub fn new() -> InvalidationBus {
        InvalidationBus::default()
    }

    pub fn invalidate(&self, key: EntityKey) {
        let mut state = self.0.borrow_mut();
        *state.generations.entry(key).or_insert(0) += 1;
        state
            .subscribers
            .retain(|(filter, s)| !filter.matches(&key) || s.unbounded_send(key).is_ok());
        tracing::debug!(?key, "invalidated");
    }

    pub fn invalidate_all(&self, keys: impl IntoIterator<Item = EntityKey>) {
        for k in keys {
            self.invalidate(k);
        }
    }

    /// Subscribers are dropped on the next matching invalidation after the
    /// receiver is dropped
    pub fn subscribe(&self, filter: KeyFilter) -> mpsc::UnboundedReceiver<EntityKey> {
        let (sender, receiver) = mpsc::unbounded();
        self.0.borrow_mut().subscribers.push((filter, sender));
        receiver
    }

    /// Number of times `key` got invalidated so far
    pub fn generation(&self, key: EntityKey) -> u64 {
        self.0.borrow().generations.get(&key).copied().unwrap_or(0)
    }

    /// Whether `key` got invalidated since the caller read `generation(key)`
    pub fn is_stale(&self, key: EntityKey, seen_generation: u64) -> bool {
        self.generation(key) != seen_generation
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.borrow().subscribers.len()
    }
}
