use crate::api::{RelationKey, RelationKind, RelationStatus, UserId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Pending,
    RollingBack,
}

/// Returned by `RelationToggle::apply` when a mutation is already in flight
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("a mutation is already in flight for {0:?}")]
pub struct Busy(pub RelationKey);

/// Handle on an in-flight optimistic mutation
///
/// It is consumed by exactly one of `RelationToggle::commit` or
/// `RelationToggle::rollback`.
#[derive(Debug, Eq, PartialEq)]
#[must_use = "a pending mutation must be committed or rolled back"]
pub struct PendingMutation {
    key: RelationKey,
    desired: bool,
    epoch: u64,
}

impl PendingMutation {
    pub fn key(&self) -> RelationKey {
        self.key
    }

    /// Value to send to the server
    pub fn desired(&self) -> bool {
        self.desired
    }
}

/// Optimistic state of a boolean relation (like, follow) between a subject
/// and an object
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationToggle {
    key: RelationKey,

    /// Last value confirmed by the server
    settled: bool,

    /// Value currently shown, only differs from `settled` while not idle
    optimistic: bool,

    phase: Phase,

    /// Adjustment to `base_count` while a mutation is pending
    counter_delta: i64,

    /// Aggregate count reported by the server, if the view shows one
    base_count: Option<u64>,

    // bumped on every seed, so that handles from before a reseed are ignored
    epoch: u64,
}

impl RelationToggle {
    pub fn new(key: RelationKey, initial: bool, initial_count: Option<u64>) -> RelationToggle {
        RelationToggle {
            key,
            settled: initial,
            optimistic: initial,
            phase: Phase::Idle,
            counter_delta: 0,
            base_count: initial_count,
            epoch: 0,
        }
    }

    pub fn from_status(key: RelationKey, status: RelationStatus) -> RelationToggle {
        RelationToggle::new(key, status.active, Some(status.count))
    }

    pub fn key(&self) -> RelationKey {
        self.key
    }

    pub fn kind(&self) -> RelationKind {
        self.key.kind()
    }

    pub fn subject_id(&self) -> UserId {
        self.key.subject_id()
    }

    pub fn settled(&self) -> bool {
        self.settled
    }

    pub fn optimistic(&self) -> bool {
        self.optimistic
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counter_delta(&self) -> i64 {
        self.counter_delta
    }

    pub fn base_count(&self) -> Option<u64> {
        self.base_count
    }

    /// Count to display next to the relation, including the pending delta
    pub fn displayed_count(&self) -> Option<u64> {
        self.base_count
            .map(|base| (base as i64).saturating_add(self.counter_delta).max(0) as u64)
    }

    pub fn seed(&mut self, initial: bool, initial_count: Option<u64>) {
        if self.phase != Phase::Idle {
            tracing::debug!(key = ?self.key, "reseeding relation toggle with a mutation in flight");
        }
        self.settled = initial;
        self.optimistic = initial;
        self.phase = Phase::Idle;
        self.counter_delta = 0;
        self.base_count = initial_count;
        self.epoch += 1;
    }

    pub fn apply(&mut self) -> Result<PendingMutation, Busy> {
        if self.phase != Phase::Idle {
            tracing::debug!(key = ?self.key, phase = ?self.phase, "ignoring toggle while busy");
            return Err(Busy(self.key));
        }
        self.optimistic = !self.settled;
        self.counter_delta = match self.optimistic {
            true => 1,
            false => -1,
        };
        self.phase = Phase::Pending;
        tracing::trace!(key = ?self.key, optimistic = self.optimistic, "applied optimistic toggle");
        Ok(PendingMutation {
            key: self.key,
            desired: self.optimistic,
            epoch: self.epoch,
        })
    }

    /// Returns false if `m` was stale and got ignored
    pub fn commit(&mut self, m: PendingMutation) -> bool {
        if !self.is_current(&m) {
            return false;
        }
        self.settled = self.optimistic;
        // the delta is now part of the server truth
        self.base_count = self.displayed_count();
        self.counter_delta = 0;
        self.phase = Phase::Idle;
        tracing::trace!(key = ?self.key, settled = self.settled, "committed toggle");
        true
    }

    /// Returns false if `m` was stale and got ignored
    pub fn rollback(&mut self, m: PendingMutation) -> bool {
        if !self.is_current(&m) {
            return false;
        }
        self.phase = Phase::RollingBack;
        tracing::debug!(key = ?self.key, phase = ?self.phase, settled = self.settled, "rolling back toggle");
        self.optimistic = self.settled;
        self.counter_delta = 0;
        self.phase = Phase::Idle;
        true
    }

    /// Takes into account freshly fetched server state
    ///
    /// While a mutation is in flight only the settled value moves: the
    /// mutation's outcome still decides what gets displayed. A fresh count
    /// that already reflects the in-flight value is displayed as is.
    pub fn reconcile(&mut self, active: bool, count: Option<u64>) {
        self.settled = active;
        match self.phase {
            Phase::Idle => self.optimistic = active,
            Phase::Pending | Phase::RollingBack => {
                if count.is_some() {
                    self.counter_delta = match (active == self.optimistic, self.optimistic) {
                        (true, _) => 0,
                        (false, true) => 1,
                        (false, false) => -1,
                    };
                }
            }
        }
        if count.is_some() {
            self.base_count = count;
        }
    }

    fn is_current(&self, m: &PendingMutation) -> bool {
        let current = m.epoch == self.epoch && m.key == self.key && self.phase == Phase::Pending;
        if !current {
            tracing::debug!(key = ?self.key, "ignoring stale pending mutation");
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContentId, Uuid};

    fn like_key() -> RelationKey {
        RelationKey::like(UserId(Uuid::from_u128(1)), ContentId(Uuid::from_u128(2)))
    }

    #[test]
    fn apply_then_rollback() {
        let mut t = RelationToggle::new(like_key(), false, Some(4));

        let m = t.apply().unwrap();
        assert!(m.desired());
        assert!(t.optimistic());
        assert_eq!(t.counter_delta(), 1);
        assert_eq!(t.phase(), Phase::Pending);
        assert_eq!(t.displayed_count(), Some(5));

        assert!(t.rollback(m));
        assert!(!t.optimistic());
        assert!(!t.settled());
        assert_eq!(t.counter_delta(), 0);
        assert_eq!(t.phase(), Phase::Idle);
        assert_eq!(t.displayed_count(), Some(4));
    }

    #[test]
    fn apply_then_commit_keeps_count() {
        let mut t = RelationToggle::new(like_key(), true, Some(1));
        let m = t.apply().unwrap();
        assert!(!m.desired());
        assert_eq!(t.displayed_count(), Some(0));
        assert!(t.commit(m));
        assert!(!t.settled());
        assert!(!t.optimistic());
        assert_eq!(t.phase(), Phase::Idle);
        assert_eq!(t.displayed_count(), Some(0));
    }

    #[test]
    fn apply_while_pending_is_rejected() {
        let mut t = RelationToggle::new(like_key(), false, None);
        let m = t.apply().unwrap();
        assert_eq!(t.apply(), Err(Busy(like_key())));
        assert!(t.optimistic());
        assert_eq!(t.counter_delta(), 1);
        assert!(t.commit(m));
        assert!(t.apply().is_ok());
    }

    #[test]
    fn handle_from_before_reseed_is_ignored() {
        let mut t = RelationToggle::new(like_key(), false, Some(3));
        let m = t.apply().unwrap();
        t.seed(true, Some(10));
        assert!(!t.commit(m));
        assert!(t.settled());
        assert_eq!(t.displayed_count(), Some(10));
        assert_eq!(t.phase(), Phase::Idle);
    }

    #[test]
    fn reconcile_while_pending_only_moves_settled() {
        let mut t = RelationToggle::new(like_key(), false, Some(3));
        let m = t.apply().unwrap();
        t.reconcile(false, Some(7));
        assert!(t.optimistic());
        assert_eq!(t.displayed_count(), Some(8));
        t.rollback(m);
        assert!(!t.optimistic());
        assert_eq!(t.displayed_count(), Some(7));

        t.reconcile(true, None);
        assert!(t.optimistic());
        assert!(t.settled());
        assert_eq!(t.displayed_count(), Some(7));
    }

    #[test]
    fn reconcile_with_in_flight_value_already_counted() {
        let mut t = RelationToggle::new(like_key(), false, Some(3));
        let m = t.apply().unwrap();
        assert_eq!(t.displayed_count(), Some(4));
        t.reconcile(true, Some(4));
        assert!(t.optimistic());
        assert_eq!(t.counter_delta(), 0);
        assert_eq!(t.displayed_count(), Some(4));

        // an older read showing the previous value brings the delta back
        t.reconcile(false, Some(3));
        assert_eq!(t.displayed_count(), Some(4));
        t.reconcile(true, Some(4));

        assert!(t.commit(m));
        assert_eq!(t.base_count(), Some(4));
        assert_eq!(t.displayed_count(), Some(4));
        assert_eq!(t.phase(), Phase::Idle);
    }

    #[test]
    fn reconcile_with_in_flight_value_then_rollback() {
        let mut t = RelationToggle::new(like_key(), true, Some(5));
        let m = t.apply().unwrap();
        assert_eq!(t.displayed_count(), Some(4));
        t.reconcile(false, Some(4));
        assert!(t.rollback(m));
        assert!(!t.optimistic());
        assert_eq!(t.displayed_count(), Some(4));
    }

    #[derive(Clone, Debug, bolero::generator::TypeGenerator)]
    enum ToggleOp {
        Apply,
        Commit,
        Rollback,
        Reconcile(bool),
        Seed(bool),
    }

    #[test]
    fn fuzz_idle_means_settled() {
        bolero::check!()
            .with_type::<Vec<ToggleOp>>()
            .cloned()
            .for_each(|ops| {
                let mut t = RelationToggle::new(like_key(), false, Some(0));
                let mut pending = None;
                for op in ops {
                    match op {
                        ToggleOp::Apply => match t.apply() {
                            Ok(m) => {
                                assert!(pending.is_none(), "apply accepted twice");
                                pending = Some(m);
                            }
                            Err(_) => assert!(pending.is_some()),
                        },
                        ToggleOp::Commit => {
                            if let Some(m) = pending.take() {
                                t.commit(m);
                            }
                        }
                        ToggleOp::Rollback => {
                            if let Some(m) = pending.take() {
                                t.rollback(m);
                            }
                        }
                        ToggleOp::Reconcile(active) => t.reconcile(active, None),
                        ToggleOp::Seed(active) => {
                            pending = None;
                            t.seed(active, Some(0));
                        }
                    }
                    assert_ne!(t.phase(), Phase::RollingBack);
                    if t.phase() == Phase::Idle {
                        assert_eq!(t.optimistic(), t.settled());
                        assert_eq!(t.counter_delta(), 0);
                    } else {
                        assert_eq!(t.counter_delta().abs(), 1);
                    }
                }
            });
    }
}
