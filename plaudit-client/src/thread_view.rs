use std::{
    cell::{Cell, Ref, RefCell},
    rc::Rc,
};

use crate::{
    api::{self, Api, CommentId, ContentId, CurrentUser, NewComment},
    CommentNode, Config, EntityKey, Error, Expansion, InvalidationBus, LazyExpansionController,
    Liveness, ReplyFetch, StoreError, ThreadStore,
};

/// Comment thread of one content item, as shown by one view
///
/// Dropping it (or calling `teardown`) makes every response still in flight
/// get ignored.
pub struct ThreadView<A: ?Sized> {
    content: ContentId,
    api: Rc<A>,
    bus: InvalidationBus,
    user: CurrentUser,
    config: Config,
    store: Rc<RefCell<ThreadStore>>,
    expansion: LazyExpansionController<A>,
    liveness: Liveness,

    pages_loaded: Cell<u32>,
    total: Cell<Option<u32>>,
    seen_generation: Cell<u64>,
}

impl<A: Api + ?Sized + 'static> ThreadView<A> {
    pub fn new(
        content: ContentId,
        api: Rc<A>,
        bus: InvalidationBus,
        user: CurrentUser,
        config: Config,
    ) -> ThreadView<A> {
        let store = Rc::new(RefCell::new(ThreadStore::new()));
        let liveness = Liveness::new();
        let expansion = LazyExpansionController::new(api.clone(), store.clone(), liveness.clone());
        ThreadView {
            content,
            api,
            bus,
            user,
            config,
            store,
            expansion,
            liveness,
            pages_loaded: Cell::new(0),
            total: Cell::new(None),
            seen_generation: Cell::new(0),
        }
    }

    pub fn content(&self) -> ContentId {
        self.content
    }

    pub fn store(&self) -> Ref<'_, ThreadStore> {
        self.store.borrow()
    }

    pub fn roots(&self) -> Ref<'_, [CommentNode]> {
        Ref::map(self.store.borrow(), |s| s.roots())
    }

    pub fn expansion(&self) -> &LazyExpansionController<A> {
        &self.expansion
    }

    /// Total number of root comments, as last reported by the server
    pub fn total(&self) -> Option<u32> {
        self.total.get()
    }

    pub fn has_more(&self) -> bool {
        match self.total.get() {
            None => true,
            Some(total) => self.store.borrow().roots().len() < total as usize,
        }
    }

    /// Whether the root comment list got invalidated since it was last loaded
    pub fn is_stale(&self) -> bool {
        self.pages_loaded.get() == 0
            || self.bus.is_stale(
                EntityKey::comments(self.content),
                self.seen_generation.get(),
            )
    }

    pub fn can_delete(&self, id: CommentId) -> bool {
        self.store
            .borrow()
            .get(id)
            .map_or(false, |n| n.author.id == self.user.id)
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn teardown(&self) {
        tracing::debug!(content = ?self.content, "tearing down thread view");
        self.liveness.kill();
    }

    /// Fetches the first page of root comments and merges it into the thread
    pub async fn refresh(&self) -> Result<(), Error> {
        let generation = self.bus.generation(EntityKey::comments(self.content));
        let page = self
            .api
            .list_comments(self.content, self.config.first_page)
            .await;
        self.check_alive()?;
        let page = page?;
        self.store
            .borrow_mut()
            .load_roots(page.comments.into_iter().map(CommentNode::from).collect());
        self.pages_loaded.set(1);
        self.total.set(Some(page.total));
        self.seen_generation.set(generation);
        Ok(())
    }

    pub async fn refresh_if_stale(&self) -> Result<bool, Error> {
        if !self.is_stale() {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Fetches the next page of root comments. Returns false if there was
    /// nothing more to load.
    pub async fn load_more(&self) -> Result<bool, Error> {
        if self.pages_loaded.get() == 0 {
            self.refresh().await?;
            return Ok(true);
        }
        if !self.has_more() {
            return Ok(false);
        }
        let page_num = self.config.first_page + self.pages_loaded.get();
        let page = self.api.list_comments(self.content, page_num).await;
        self.check_alive()?;
        let page = page?;
        let got_any = !page.comments.is_empty();
        self.store
            .borrow_mut()
            .append_roots(page.comments.into_iter().map(CommentNode::from).collect());
        self.pages_loaded.set(self.pages_loaded.get() + 1);
        self.total.set(Some(page.total));
        Ok(got_any)
    }

    pub async fn on_toggle_expand(&self, root_id: CommentId) -> Result<(), Error> {
        let expansion = self.store.borrow_mut().toggle_expanded(root_id)?;
        tracing::trace!(id = ?root_id, ?expansion, "toggled comment expansion");
        match expansion {
            Expansion::Expanded | Expansion::Collapsed => Ok(()),
            Expansion::NeedsFetch => self.expansion.ensure_loaded(root_id).await,
        }
    }

    /// Refetches replies of an already-expanded root, eg. after they got
    /// invalidated
    pub fn reload_replies(&self, root_id: CommentId) -> ReplyFetch {
        self.expansion.reload(root_id)
    }

    pub fn replies_are_stale(&self, root_id: CommentId, seen_generation: u64) -> bool {
        self.bus
            .is_stale(EntityKey::replies(root_id), seen_generation)
    }

    /// Posts a new root comment (`parent` is `None`) or reply, and appends it
    /// to the thread once the server accepted it
    pub async fn on_create_node(
        &self,
        parent: Option<CommentId>,
        text: String,
    ) -> Result<CommentId, Error> {
        let new_comment = NewComment::new(text);
        new_comment.validate(self.config.max_content_len)?;

        let created = match parent {
            None => {
                let c = self.api.create_comment(self.content, new_comment).await;
                if c.is_ok() {
                    self.bus.invalidate_all([
                        EntityKey::comments(self.content),
                        EntityKey::content(self.content),
                    ]);
                }
                c
            }
            Some(root_id) => {
                match self.store.borrow().parent_of(root_id) {
                    None => return Err(Error::Store(StoreError::NotFound(root_id))),
                    Some(Some(_)) => return Err(Error::Store(StoreError::NotARoot(root_id))),
                    Some(None) => (),
                }
                let c = self.api.create_reply(root_id, new_comment).await;
                if c.is_ok() {
                    self.bus.invalidate_all([
                        EntityKey::replies(root_id),
                        EntityKey::comments(self.content),
                    ]);
                }
                c
            }
        };
        self.check_alive()?;
        let created = CommentNode::from(created?);
        if created.parent_id != parent {
            tracing::error!(id = ?created.id, expected = ?parent, got = ?created.parent_id, "server created comment under an unexpected parent");
            return Err(Error::Api(api::Error::Malformed(String::from(
                "created comment has an unexpected parent",
            ))));
        }

        let id = created.id;
        let mut store = self.store.borrow_mut();
        let inserted = match parent {
            None => store.insert_root(created),
            Some(root_id) => store.insert_reply(root_id, created),
        };
        match inserted {
            Ok(()) => tracing::debug!(?id, ?parent, "created comment"),
            // a refresh that completed meanwhile already brought it in
            Err(StoreError::DuplicateId(dup)) if dup == id => {
                tracing::debug!(?id, ?parent, "created comment was already in the thread")
            }
            Err(err) => return Err(err.into()),
        }
        Ok(id)
    }

    /// Deletes a comment or reply. The node only goes away once the server
    /// confirmed the deletion.
    pub async fn on_delete_node(&self, id: CommentId) -> Result<(), Error> {
        let parent = self
            .store
            .borrow()
            .parent_of(id)
            .ok_or(StoreError::NotFound(id))?;
        let keys = match parent {
            None => [
                EntityKey::comments(self.content),
                EntityKey::content(self.content),
            ],
            Some(root_id) => [
                EntityKey::replies(root_id),
                EntityKey::comments(self.content),
            ],
        };

        let res = self.api.delete_comment(id).await;
        match &res {
            Ok(()) => self.bus.invalidate_all(keys),
            // our copy disagrees with the server, have it refetched
            Err(api::Error::Conflict(_)) => self.bus.invalidate_all(keys),
            Err(_) => (),
        }
        self.check_alive()?;
        if let Err(err) = res {
            tracing::warn!(?id, %err, "failed deleting comment");
            return Err(Error::Api(err));
        }

        match self.store.borrow_mut().remove(id) {
            Ok(_) => (),
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(?id, "deleted comment was already gone from the thread")
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn check_alive(&self) -> Result<(), Error> {
        match self.liveness.is_alive() {
            true => Ok(()),
            false => {
                tracing::debug!(content = ?self.content, "dropping response received after teardown");
                Err(Error::TornDown)
            }
        }
    }
}

impl<A: ?Sized> Drop for ThreadView<A> {
    fn drop(&mut self) {
        self.liveness.kill();
    }
}
