use async_trait::async_trait;

use crate::{
    Comment, CommentId, CommentPage, ContentId, Error, FollowerEntry, NewComment, RelationKey,
    RelationStatus, UserId,
};

/// Remote operations the interaction engine relies on
///
/// Transport and wire format belong to the implementor. Futures are not
/// required to be `Send`: the engine runs on a single-threaded event loop.
#[async_trait(?Send)]
pub trait Api {
    /// `page` starts at 1
    async fn list_comments(&self, content: ContentId, page: u32) -> Result<CommentPage, Error>;
    async fn list_replies(&self, comment: CommentId) -> Result<Vec<Comment>, Error>;
    async fn create_comment(&self, content: ContentId, c: NewComment) -> Result<Comment, Error>;
    async fn create_reply(&self, comment: CommentId, c: NewComment) -> Result<Comment, Error>;
    async fn delete_comment(&self, comment: CommentId) -> Result<(), Error>;
    async fn set_relation(&self, key: RelationKey, active: bool) -> Result<(), Error>;
    async fn get_relation(&self, key: RelationKey) -> Result<RelationStatus, Error>;
    async fn list_followers(&self, user: UserId) -> Result<Vec<FollowerEntry>, Error>;
}
