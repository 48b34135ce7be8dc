use uuid::Uuid;

use crate::{Error, Time, UserSummary, ValidationError, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ContentId(pub Uuid);

impl ContentId {
    pub fn stub() -> ContentId {
        ContentId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// A comment or reply as returned by the server
///
/// Replies are never embedded: they are listed separately through
/// `Api::list_replies`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub content_id: ContentId,

    /// Root comment this is a reply to, `None` for root comments
    pub parent_id: Option<CommentId>,

    pub author: UserSummary,
    pub text: String,
    pub created_at: Time,

    /// Total number of replies known to the server
    pub replies_count: u32,
}

impl Comment {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One page of root comments, oldest first
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPage {
    pub comments: Vec<Comment>,

    /// Total number of root comments on the content item, across all pages
    pub total: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub text: String,
}

impl NewComment {
    pub fn new(text: String) -> NewComment {
        NewComment { text }
    }

    pub fn validate(&self, max_len: usize) -> Result<(), Error> {
        crate::validate_string(&self.text)?;
        if self.text.trim().is_empty() {
            return Err(Error::Validation(ValidationError::Empty));
        }
        let len = self.text.chars().count();
        if len > max_len {
            return Err(Error::Validation(ValidationError::TooLong { len, max: max_len }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_new_comment() {
        assert_eq!(NewComment::new(String::from("hello")).validate(10), Ok(()));
        assert_eq!(
            NewComment::new(String::from("  \n\t")).validate(10),
            Err(Error::Validation(ValidationError::Empty)),
        );
        assert_eq!(
            NewComment::new(String::from("foo\0bar")).validate(10),
            Err(Error::Validation(ValidationError::NullByte)),
        );
        assert_eq!(
            NewComment::new(String::from("éééééé")).validate(5),
            Err(Error::Validation(ValidationError::TooLong { len: 6, max: 5 })),
        );
    }
}
