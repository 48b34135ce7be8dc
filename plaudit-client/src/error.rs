use crate::{api::Error as ApiError, StoreError};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("view was torn down before the response arrived")]
    TornDown,
}

impl Error {
    /// Whether the user can be offered to retry the action
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api(e) => e.is_retryable(),
            Error::Store(_) | Error::TornDown => false,
        }
    }
}
