use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod api;
pub use api::Api;

mod comment;
pub use comment::{Comment, CommentId, CommentPage, ContentId, NewComment};

mod error;
pub use error::{Error, ValidationError};

mod relation;
pub use relation::{FollowerEntry, RelationKey, RelationKind, RelationStatus};

mod user;
pub use user::{CurrentUser, UserId, UserSummary};

/// Rejects strings the server would refuse to store
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::Validation(ValidationError::NullByte));
    }
    Ok(())
}
