use crate::{
    api::{self, CommentId, Time, UserSummary},
    merge::Transient,
};

/// A comment as displayed in a thread, along with its local display state
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub id: CommentId,

    /// Owning root comment, `None` if this node is itself a root
    pub parent_id: Option<CommentId>,

    pub author: UserSummary,
    pub content: String,
    pub created_at: Time,

    /// Total number of replies known to the server, may exceed `replies.len()`
    pub replies_count: u32,

    /// Replies in server order, empty until expanded. Always empty for replies.
    pub replies: Vec<CommentNode>,

    /// Whether `replies` has been fetched at least once
    pub replies_loaded: bool,

    pub expanded: bool,
    pub loading_replies: bool,
}

impl From<api::Comment> for CommentNode {
    fn from(c: api::Comment) -> CommentNode {
        CommentNode {
            id: c.id,
            parent_id: c.parent_id,
            author: c.author,
            content: c.text,
            created_at: c.created_at,
            replies_count: c.replies_count,
            replies: Vec::new(),
            replies_loaded: false,
            expanded: false,
            loading_replies: false,
        }
    }
}

impl CommentNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Transient for CommentNode {
    // Loaded replies are kept too: collapsing or refreshing a thread never
    // throws them away, only a refetch of the replies themselves does.
    fn carry_transient_from(&mut self, previous: &CommentNode) {
        if !self.is_root() {
            return;
        }
        self.expanded = previous.expanded;
        self.loading_replies = previous.loading_replies;
        if previous.replies_loaded && !self.replies_loaded {
            self.replies = previous.replies.clone();
            self.replies_loaded = true;
        }
    }
}
