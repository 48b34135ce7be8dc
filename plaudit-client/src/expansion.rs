use std::{cell::RefCell, collections::HashMap, rc::Rc};

use futures::{
    future::{self, LocalBoxFuture, Shared},
    FutureExt,
};

use crate::{
    api::{Api, CommentId},
    CommentNode, Error, Liveness, StoreError, ThreadStore,
};

/// Handle on an in-flight reply fetch, can be awaited any number of times
pub type ReplyFetch = Shared<LocalBoxFuture<'static, Result<(), Error>>>;

/// Fetches the replies of root comments, with at most one fetch in flight per
/// root
pub struct LazyExpansionController<A: ?Sized> {
    api: Rc<A>,
    store: Rc<RefCell<ThreadStore>>,
    liveness: Liveness,
    in_flight: Rc<RefCell<HashMap<CommentId, ReplyFetch>>>,
}

impl<A: Api + ?Sized + 'static> LazyExpansionController<A> {
    pub fn new(
        api: Rc<A>,
        store: Rc<RefCell<ThreadStore>>,
        liveness: Liveness,
    ) -> LazyExpansionController<A> {
        LazyExpansionController {
            api,
            store,
            liveness,
            in_flight: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn is_loading(&self, root_id: CommentId) -> bool {
        self.in_flight.borrow().contains_key(&root_id)
    }

    /// Makes sure the replies of `root_id` are loaded, fetching them if they
    /// never were. Calls made while a fetch is in flight share it.
    pub fn ensure_loaded(&self, root_id: CommentId) -> ReplyFetch {
        if let Some(fetch) = self.in_flight.borrow().get(&root_id) {
            return fetch.clone();
        }
        if self.store.borrow().replies_loaded(root_id) {
            return future::ready(Ok(())).boxed_local().shared();
        }
        self.fetch(root_id)
    }

    /// Refetches the replies of `root_id` even if they were already loaded,
    /// unless a fetch is already in flight
    pub fn reload(&self, root_id: CommentId) -> ReplyFetch {
        if let Some(fetch) = self.in_flight.borrow().get(&root_id) {
            return fetch.clone();
        }
        self.fetch(root_id)
    }

    fn fetch(&self, root_id: CommentId) -> ReplyFetch {
        {
            let mut store = self.store.borrow_mut();
            let err = match store.parent_of(root_id) {
                None => Some(StoreError::NotFound(root_id)),
                Some(Some(_)) => Some(StoreError::NotARoot(root_id)),
                Some(None) => None,
            };
            if let Some(err) = err {
                return future::ready(Err(Error::Store(err))).boxed_local().shared();
            }
            store.set_loading(root_id, true);
        }

        let api = self.api.clone();
        let store = self.store.clone();
        let liveness = self.liveness.clone();
        let in_flight = self.in_flight.clone();
        let fetch = async move {
            tracing::debug!(id = ?root_id, "fetching replies");
            let res = api.list_replies(root_id).await;
            in_flight.borrow_mut().remove(&root_id);
            if !liveness.is_alive() {
                tracing::debug!(id = ?root_id, "dropping replies received after teardown");
                return Err(Error::TornDown);
            }
            let mut store = store.borrow_mut();
            match res {
                Ok(replies) => {
                    let replies = replies.into_iter().map(CommentNode::from).collect();
                    store.attach_replies(root_id, replies)?;
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(id = ?root_id, %err, "failed fetching replies");
                    store.set_loading(root_id, false);
                    Err(Error::Api(err))
                }
            }
        }
        .boxed_local()
        .shared();

        self.in_flight.borrow_mut().insert(root_id, fetch.clone());
        fetch
    }
}
