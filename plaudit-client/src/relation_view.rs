use std::{
    cell::{Cell, Ref, RefCell},
    rc::Rc,
};

use crate::{
    api::{self, Api, ContentId, CurrentUser, RelationKey, RelationStatus, UserId, UserSummary},
    merge::Transient,
    merge_list, EntityKey, Error, InvalidationBus, Liveness, PendingMutation, RelationToggle,
};

/// Outcome of a user toggling a relation
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Applied {
    /// The server accepted the new value
    Committed { active: bool },

    /// A mutation was already in flight, nothing was sent
    Busy,
}

/// Sends the mutation for an applied toggle and settles it
///
/// `settle` is called with the handle and whether the server accepted it,
/// unless the view got torn down in the meantime.
async fn drive_mutation<A, F>(
    api: &A,
    bus: &InvalidationBus,
    liveness: &Liveness,
    m: PendingMutation,
    settle: F,
) -> Result<Applied, Error>
where
    A: Api + ?Sized,
    F: FnOnce(PendingMutation, bool),
{
    let key = m.key();
    let desired = m.desired();
    let res = api.set_relation(key, desired).await;
    match &res {
        Ok(()) => bus.invalidate_all(EntityKey::invalidated_by(key)),
        // server state is not what we thought, have it refetched
        Err(api::Error::Conflict(_)) => bus.invalidate_all(EntityKey::invalidated_by(key)),
        Err(_) => (),
    }
    if !liveness.is_alive() {
        tracing::debug!(?key, "dropping relation mutation result received after teardown");
        return Err(Error::TornDown);
    }
    match res {
        Ok(()) => {
            settle(m, true);
            Ok(Applied::Committed { active: desired })
        }
        Err(err) => {
            tracing::warn!(?key, %err, "relation mutation failed, rolling back");
            settle(m, false);
            Err(Error::Api(err))
        }
    }
}

/// A like or follow button, along with the count shown next to it
pub struct RelationView<A: ?Sized> {
    api: Rc<A>,
    bus: InvalidationBus,
    toggle: Rc<RefCell<RelationToggle>>,
    liveness: Liveness,
    seen_generation: Cell<u64>,
}

impl<A: Api + ?Sized> RelationView<A> {
    /// `initial` is what the server reported along with the displayed entity
    pub fn new(
        api: Rc<A>,
        bus: InvalidationBus,
        key: RelationKey,
        initial: RelationStatus,
    ) -> RelationView<A> {
        let seen_generation = Cell::new(bus.generation(Self::watched_key(key)));
        RelationView {
            api,
            bus,
            toggle: Rc::new(RefCell::new(RelationToggle::from_status(key, initial))),
            liveness: Liveness::new(),
            seen_generation,
        }
    }

    pub fn like(
        api: Rc<A>,
        bus: InvalidationBus,
        user: CurrentUser,
        content: ContentId,
        initial: RelationStatus,
    ) -> RelationView<A> {
        RelationView::new(api, bus, RelationKey::like(user.id, content), initial)
    }

    pub fn follow(
        api: Rc<A>,
        bus: InvalidationBus,
        user: CurrentUser,
        followee: UserId,
        initial: RelationStatus,
    ) -> RelationView<A> {
        RelationView::new(api, bus, RelationKey::follow(user.id, followee), initial)
    }

    pub fn state(&self) -> Ref<'_, RelationToggle> {
        self.toggle.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.toggle.borrow().optimistic()
    }

    pub fn displayed_count(&self) -> Option<u64> {
        self.toggle.borrow().displayed_count()
    }

    pub fn is_stale(&self) -> bool {
        let key = Self::watched_key(self.toggle.borrow().key());
        self.bus.is_stale(key, self.seen_generation.get())
    }

    pub fn teardown(&self) {
        self.liveness.kill();
    }

    /// Flips the relation right away, then confirms it with the server or
    /// rolls it back
    pub async fn on_apply_relation(&self) -> Result<Applied, Error> {
        let m = match self.toggle.borrow_mut().apply() {
            Ok(m) => m,
            Err(_) => return Ok(Applied::Busy),
        };
        let toggle = self.toggle.clone();
        drive_mutation(&*self.api, &self.bus, &self.liveness, m, move |m, ok| {
            let mut toggle = toggle.borrow_mut();
            match ok {
                true => toggle.commit(m),
                false => toggle.rollback(m),
            };
        })
        .await
    }

    /// Refetches the server truth for this relation
    pub async fn refresh(&self) -> Result<(), Error> {
        let key = self.toggle.borrow().key();
        let generation = self.bus.generation(Self::watched_key(key));
        let status = self.api.get_relation(key).await;
        if !self.liveness.is_alive() {
            return Err(Error::TornDown);
        }
        let status = status?;
        self.toggle
            .borrow_mut()
            .reconcile(status.active, Some(status.count));
        self.seen_generation.set(generation);
        Ok(())
    }

    // the entity whose invalidation means this view must refetch
    fn watched_key(key: RelationKey) -> EntityKey {
        match key {
            RelationKey::Like { content, .. } => EntityKey::likes(content),
            RelationKey::Follow { followee, .. } => EntityKey::followers(followee),
        }
    }
}

impl<A: ?Sized> Drop for RelationView<A> {
    fn drop(&mut self) {
        self.liveness.kill();
    }
}

/// A row of a followers list, with the current user's follow-back button
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationEntry {
    pub user: UserSummary,
    pub toggle: RelationToggle,
}

impl Transient for RelationEntry {
    // A row with a mutation in flight keeps its optimistic state, the fresh
    // server value only becomes its settled value
    fn carry_transient_from(&mut self, previous: &RelationEntry) {
        if previous.toggle.phase() == crate::Phase::Idle {
            return;
        }
        let mut toggle = previous.toggle.clone();
        toggle.reconcile(self.toggle.settled(), self.toggle.base_count());
        self.toggle = toggle;
    }
}

/// Followers of a user
pub struct FollowersView<A: ?Sized> {
    api: Rc<A>,
    bus: InvalidationBus,
    user: CurrentUser,
    of: UserId,
    entries: Rc<RefCell<Vec<RelationEntry>>>,
    liveness: Liveness,
    seen_generation: Cell<Option<u64>>,
}

impl<A: Api + ?Sized> FollowersView<A> {
    pub fn new(api: Rc<A>, bus: InvalidationBus, user: CurrentUser, of: UserId) -> FollowersView<A> {
        FollowersView {
            api,
            bus,
            user,
            of,
            entries: Rc::new(RefCell::new(Vec::new())),
            liveness: Liveness::new(),
            seen_generation: Cell::new(None),
        }
    }

    pub fn entries(&self) -> Ref<'_, [RelationEntry]> {
        Ref::map(self.entries.borrow(), |e| &e[..])
    }

    pub fn is_stale(&self) -> bool {
        match self.seen_generation.get() {
            None => true,
            Some(seen) => self.bus.is_stale(EntityKey::followers(self.of), seen),
        }
    }

    pub fn teardown(&self) {
        self.liveness.kill();
    }

    pub async fn refresh(&self) -> Result<(), Error> {
        let generation = self.bus.generation(EntityKey::followers(self.of));
        let fetched = self.api.list_followers(self.of).await;
        if !self.liveness.is_alive() {
            return Err(Error::TornDown);
        }
        let incoming = fetched?
            .into_iter()
            .map(|f| RelationEntry {
                toggle: RelationToggle::new(
                    RelationKey::follow(self.user.id, f.user.id),
                    f.followed_by_me,
                    Some(f.followers_count),
                ),
                user: f.user,
            })
            .collect();
        let mut entries = self.entries.borrow_mut();
        *entries = merge_list(&entries, incoming, |e| e.user.id);
        self.seen_generation.set(Some(generation));
        Ok(())
    }

    /// Toggles whether the current user follows `follower`
    pub async fn on_apply_relation(&self, follower: UserId) -> Result<Applied, Error> {
        let m = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries
                .iter_mut()
                .find(|e| e.user.id == follower)
                .ok_or_else(|| {
                    Error::Api(api::Error::Conflict(format!(
                        "{follower:?} is not in the followers list"
                    )))
                })?;
            match entry.toggle.apply() {
                Ok(m) => m,
                Err(_) => return Ok(Applied::Busy),
            }
        };
        let entries = self.entries.clone();
        drive_mutation(&*self.api, &self.bus, &self.liveness, m, move |m, ok| {
            let mut entries = entries.borrow_mut();
            match entries.iter_mut().find(|e| e.user.id == follower) {
                None => tracing::debug!(?follower, "follower left the list before the mutation settled"),
                Some(e) => {
                    match ok {
                        true => e.toggle.commit(m),
                        false => e.toggle.rollback(m),
                    };
                }
            }
        })
        .await
    }
}

impl<A: ?Sized> Drop for FollowersView<A> {
    fn drop(&mut self) {
        self.liveness.kill();
    }
}
