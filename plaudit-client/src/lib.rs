mod comment;
pub use comment::CommentNode;

mod config;
pub use config::{Config, CONFIG_ENV_VAR};

mod error;
pub use error::Error;

mod expansion;
pub use expansion::{LazyExpansionController, ReplyFetch};

mod fuzz;

mod invalidation;
pub use invalidation::{EntityKey, EntityKind, InvalidationBus, KeyFilter};

mod liveness;
pub use liveness::Liveness;

mod merge;
pub use merge::{merge_list, Transient};

mod relation_view;
pub use relation_view::{Applied, FollowersView, RelationEntry, RelationView};

mod scenarios;

mod store;
pub use store::{Expansion, StoreError, ThreadStore};

mod thread_view;
pub use thread_view::ThreadView;

mod toggle;
pub use toggle::{Busy, PendingMutation, Phase, RelationToggle};

pub mod api {
    pub use plaudit_api::*;
}
