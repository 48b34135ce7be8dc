use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use futures::channel::oneshot;
use plaudit_api::{
    Api, Comment, CommentId, CommentPage, ContentId, Error, FollowerEntry, NewComment,
    RelationKey, RelationStatus, UserId, UserSummary, Uuid,
};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_CONTENT_LEN: usize = 2000;

/// Operations of the `Api`, for counting calls and injecting failures
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum Call {
    ListComments,
    ListReplies,
    CreateComment,
    CreateReply,
    DeleteComment,
    SetRelation,
    GetRelation,
    ListFollowers,
}

/// Serializable contents of a mock server
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Dump {
    pub users: Vec<UserSummary>,

    /// Comments and replies in creation order. `replies_count` is ignored and
    /// recomputed on every listing.
    pub comments: Vec<Comment>,

    pub relations: Vec<RelationKey>,
}

#[derive(Debug)]
struct State {
    acting_user: UserId,
    page_size: usize,
    users: BTreeMap<UserId, UserSummary>,
    comments: Vec<Comment>,
    relations: Vec<RelationKey>,
}

impl State {
    fn user(&self, id: UserId) -> Result<UserSummary, Error> {
        self.users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Conflict(format!("user {:?} does not exist", id.0)))
    }

    fn with_count(&self, c: &Comment) -> Comment {
        let mut c = c.clone();
        c.replies_count = self
            .comments
            .iter()
            .filter(|r| r.parent_id == Some(c.id))
            .count() as u32;
        c
    }

    fn find(&self, id: CommentId) -> Result<&Comment, Error> {
        self.comments
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::Conflict(format!("comment {:?} does not exist", id.0)))
    }

    fn count_for(&self, key: RelationKey) -> u64 {
        self.relations
            .iter()
            .filter(|r| match (r, key) {
                (RelationKey::Like { content: a, .. }, RelationKey::Like { content: b, .. }) => {
                    *a == b
                }
                (
                    RelationKey::Follow { followee: a, .. },
                    RelationKey::Follow { followee: b, .. },
                ) => *a == b,
                _ => false,
            })
            .count() as u64
    }
}

/// In-memory server, single-threaded like the engine it serves
pub struct MockServer {
    state: RefCell<State>,
    calls: RefCell<HashMap<Call, usize>>,
    failures: RefCell<HashMap<Call, VecDeque<Error>>>,

    // calls to a held operation wait here until released
    held: Gates,
    held_responses: Gates,
}

impl MockServer {
    pub fn new(acting_user: UserSummary) -> MockServer {
        let acting = acting_user.id;
        let mut users = BTreeMap::new();
        users.insert(acting, acting_user);
        MockServer::with_state(State {
            acting_user: acting,
            page_size: DEFAULT_PAGE_SIZE,
            users,
            comments: Vec::new(),
            relations: Vec::new(),
        })
    }

    pub fn from_dump(acting_user: UserId, dump: Dump) -> anyhow::Result<MockServer> {
        let users = dump
            .users
            .into_iter()
            .map(|u| (u.id, u))
            .collect::<BTreeMap<_, _>>();
        if !users.contains_key(&acting_user) {
            return Err(anyhow!("acting user {acting_user:?} is not in the dump"));
        }
        Ok(MockServer::with_state(State {
            acting_user,
            page_size: DEFAULT_PAGE_SIZE,
            users,
            comments: dump.comments,
            relations: dump.relations,
        }))
    }

    pub fn from_json(acting_user: UserId, json: &str) -> anyhow::Result<MockServer> {
        let dump = serde_json::from_str(json).context("parsing mock server dump")?;
        MockServer::from_dump(acting_user, dump)
    }

    fn with_state(state: State) -> MockServer {
        MockServer {
            state: RefCell::new(state),
            calls: RefCell::new(HashMap::new()),
            failures: RefCell::new(HashMap::new()),
            held: RefCell::new(HashMap::new()),
            held_responses: RefCell::new(HashMap::new()),
        }
    }

    pub fn dump(&self) -> Dump {
        let state = self.state.borrow();
        Dump {
            users: state.users.values().cloned().collect(),
            comments: state.comments.iter().map(|c| state.with_count(c)).collect(),
            relations: state.relations.clone(),
        }
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state.borrow_mut().page_size = page_size;
    }

    pub fn acting_user(&self) -> UserSummary {
        let state = self.state.borrow();
        state.users[&state.acting_user].clone()
    }

    pub fn add_user(&self, display_name: &str) -> UserSummary {
        let user = UserSummary {
            id: UserId(Uuid::new_v4()),
            display_name: String::from(display_name),
            avatar_url: None,
        };
        self.state.borrow_mut().users.insert(user.id, user.clone());
        user
    }

    /// Adds a comment or reply without going through the api
    pub fn add_comment(
        &self,
        content: ContentId,
        parent: Option<CommentId>,
        author: &UserSummary,
        text: &str,
    ) -> Comment {
        let c = Comment {
            id: CommentId(Uuid::new_v4()),
            content_id: content,
            parent_id: parent,
            author: author.clone(),
            text: String::from(text),
            created_at: Utc::now(),
            replies_count: 0,
        };
        let mut state = self.state.borrow_mut();
        state.users.entry(author.id).or_insert_with(|| author.clone());
        state.comments.push(c.clone());
        c
    }

    /// Sets a relation without going through the api
    pub fn add_relation(&self, key: RelationKey) {
        let mut state = self.state.borrow_mut();
        if !state.relations.contains(&key) {
            state.relations.push(key);
        }
    }

    pub fn has_relation(&self, key: RelationKey) -> bool {
        self.state.borrow().relations.contains(&key)
    }

    pub fn has_comment(&self, id: CommentId) -> bool {
        self.state.borrow().comments.iter().any(|c| c.id == id)
    }

    /// Number of times `call` was made so far, failed calls included
    pub fn calls(&self, call: Call) -> usize {
        self.calls.borrow().get(&call).copied().unwrap_or(0)
    }

    /// Makes the next call to `call` fail with `err`, after counting it
    pub fn fail_next(&self, call: Call, err: Error) {
        self.failures
            .borrow_mut()
            .entry(call)
            .or_insert_with(VecDeque::new)
            .push_back(err);
    }

    pub fn clear_failures(&self) {
        self.failures.borrow_mut().clear();
    }

    /// Makes calls to `call` wait until `release` gets called
    pub fn hold(&self, call: Call) {
        self.held.borrow_mut().entry(call).or_insert_with(Vec::new);
    }

    /// Lets the held calls to `call` proceed, returning how many there were
    pub fn release(&self, call: Call) -> usize {
        release_gate(&self.held, call)
    }

    /// Makes `CreateComment` and `CreateReply` store the new comment right
    /// away, but wait until `release_responses` before returning it
    pub fn hold_responses(&self, call: Call) {
        self.held_responses
            .borrow_mut()
            .entry(call)
            .or_insert_with(Vec::new);
    }

    pub fn release_responses(&self, call: Call) -> usize {
        release_gate(&self.held_responses, call)
    }

    async fn enter(&self, call: Call) -> Result<(), Error> {
        *self.calls.borrow_mut().entry(call).or_insert(0) += 1;
        tracing::trace!(?call, "mock server call");
        if let Some(gate) = gate(&self.held, call) {
            let _ = gate.await;
        }
        let failure = self
            .failures
            .borrow_mut()
            .get_mut(&call)
            .and_then(|f| f.pop_front());
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn respond<T>(&self, call: Call, res: T) -> T {
        if let Some(gate) = gate(&self.held_responses, call) {
            let _ = gate.await;
        }
        res
    }
}

type Gates = RefCell<HashMap<Call, Vec<oneshot::Sender<()>>>>;

fn gate(gates: &Gates, call: Call) -> Option<oneshot::Receiver<()>> {
    let mut gates = gates.borrow_mut();
    let waiting = gates.get_mut(&call)?;
    let (sender, receiver) = oneshot::channel();
    waiting.push(sender);
    Some(receiver)
}

fn release_gate(gates: &Gates, call: Call) -> usize {
    let waiting = gates.borrow_mut().remove(&call).unwrap_or_default();
    let num = waiting.len();
    for w in waiting {
        let _ = w.send(());
    }
    num
}

#[async_trait(?Send)]
impl Api for MockServer {
    async fn list_comments(&self, content: ContentId, page: u32) -> Result<CommentPage, Error> {
        self.enter(Call::ListComments).await?;
        if page == 0 {
            return Err(Error::Unknown(String::from("pages start at 1")));
        }
        let state = self.state.borrow();
        let roots = state
            .comments
            .iter()
            .filter(|c| c.content_id == content && c.is_root())
            .collect::<Vec<_>>();
        Ok(CommentPage {
            total: roots.len() as u32,
            comments: roots
                .into_iter()
                .skip((page as usize - 1) * state.page_size)
                .take(state.page_size)
                .map(|c| state.with_count(c))
                .collect(),
        })
    }

    async fn list_replies(&self, comment: CommentId) -> Result<Vec<Comment>, Error> {
        self.enter(Call::ListReplies).await?;
        let state = self.state.borrow();
        if !state.find(comment)?.is_root() {
            return Err(Error::Conflict(String::from(
                "replies are only listed for root comments",
            )));
        }
        Ok(state
            .comments
            .iter()
            .filter(|c| c.parent_id == Some(comment))
            .cloned()
            .collect())
    }

    async fn create_comment(&self, content: ContentId, c: NewComment) -> Result<Comment, Error> {
        self.enter(Call::CreateComment).await?;
        c.validate(MAX_CONTENT_LEN)?;
        let author = {
            let state = self.state.borrow();
            state.user(state.acting_user)?
        };
        let created = self.add_comment(content, None, &author, &c.text);
        Ok(self.respond(Call::CreateComment, created).await)
    }

    async fn create_reply(&self, comment: CommentId, c: NewComment) -> Result<Comment, Error> {
        self.enter(Call::CreateReply).await?;
        c.validate(MAX_CONTENT_LEN)?;
        let (content, author) = {
            let state = self.state.borrow();
            let parent = state.find(comment)?;
            if !parent.is_root() {
                return Err(Error::Conflict(String::from("cannot reply to a reply")));
            }
            (parent.content_id, state.user(state.acting_user)?)
        };
        let created = self.add_comment(content, Some(comment), &author, &c.text);
        Ok(self.respond(Call::CreateReply, created).await)
    }

    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        self.enter(Call::DeleteComment).await?;
        let mut state = self.state.borrow_mut();
        if state.find(comment)?.author.id != state.acting_user {
            return Err(Error::PermissionDenied);
        }
        state
            .comments
            .retain(|c| c.id != comment && c.parent_id != Some(comment));
        Ok(())
    }

    async fn set_relation(&self, key: RelationKey, active: bool) -> Result<(), Error> {
        self.enter(Call::SetRelation).await?;
        let mut state = self.state.borrow_mut();
        if key.subject_id() != state.acting_user {
            return Err(Error::PermissionDenied);
        }
        if let RelationKey::Follow { follower, followee } = key {
            if follower == followee {
                return Err(Error::Conflict(String::from("cannot follow oneself")));
            }
            state.user(followee)?;
        }
        let pos = state.relations.iter().position(|r| *r == key);
        match (active, pos) {
            (true, None) => state.relations.push(key),
            (false, Some(pos)) => {
                state.relations.remove(pos);
            }
            _ => (),
        }
        Ok(())
    }

    async fn get_relation(&self, key: RelationKey) -> Result<RelationStatus, Error> {
        self.enter(Call::GetRelation).await?;
        let state = self.state.borrow();
        Ok(RelationStatus {
            active: state.relations.contains(&key),
            count: state.count_for(key),
        })
    }

    async fn list_followers(&self, user: UserId) -> Result<Vec<FollowerEntry>, Error> {
        self.enter(Call::ListFollowers).await?;
        let state = self.state.borrow();
        state
            .relations
            .iter()
            .filter_map(|r| match r {
                RelationKey::Follow { follower, followee } if *followee == user => Some(*follower),
                _ => None,
            })
            .map(|follower| {
                let back = RelationKey::follow(state.acting_user, follower);
                Ok(FollowerEntry {
                    user: state.user(follower)?,
                    followed_by_me: state.relations.contains(&back),
                    followers_count: state.count_for(back),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> MockServer {
        MockServer::new(UserSummary {
            id: UserId(Uuid::from_u128(1)),
            display_name: String::from("alice"),
            avatar_url: None,
        })
    }

    #[tokio::test]
    async fn comments_are_paginated_oldest_first() {
        let s = server();
        s.set_page_size(2);
        let me = s.acting_user();
        let content = ContentId(Uuid::from_u128(7));
        let ids = (0..5)
            .map(|i| s.add_comment(content, None, &me, &format!("c{i}")).id)
            .collect::<Vec<_>>();
        s.add_comment(content, Some(ids[0]), &me, "reply");

        let first = s.list_comments(content, 1).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(
            first.comments.iter().map(|c| c.id).collect::<Vec<_>>(),
            ids[..2]
        );
        assert_eq!(first.comments[0].replies_count, 1);
        let last = s.list_comments(content, 3).await.unwrap();
        assert_eq!(last.comments.len(), 1);
        assert!(s.list_comments(content, 4).await.unwrap().comments.is_empty());
        assert_eq!(s.calls(Call::ListComments), 3);
    }

    #[tokio::test]
    async fn deleting_a_root_deletes_its_replies() {
        let s = server();
        let me = s.acting_user();
        let other = s.add_user("bob");
        let content = ContentId::stub();
        let root = s.add_comment(content, None, &me, "root");
        let reply = s.add_comment(content, Some(root.id), &other, "reply");

        assert_eq!(s.delete_comment(reply.id).await, Err(Error::PermissionDenied));
        s.delete_comment(root.id).await.unwrap();
        assert!(!s.has_comment(reply.id));
        assert!(matches!(
            s.delete_comment(root.id).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_and_gates() {
        let s = server();
        let key = RelationKey::like(s.acting_user().id, ContentId::stub());
        s.fail_next(Call::SetRelation, Error::Network(String::from("timeout")));
        assert!(s.set_relation(key, true).await.is_err());
        assert!(!s.has_relation(key));

        s.hold(Call::SetRelation);
        let (res, released) = futures::join!(s.set_relation(key, true), async {
            tokio::task::yield_now().await;
            s.release(Call::SetRelation)
        });
        res.unwrap();
        assert_eq!(released, 1);
        assert!(s.has_relation(key));
        assert_eq!(s.calls(Call::SetRelation), 2);
        assert_eq!(
            s.get_relation(key).await,
            Ok(RelationStatus {
                active: true,
                count: 1,
            })
        );
    }
}
