use std::{cell::Cell, rc::Rc};

/// Shared flag cleared when the owning view is torn down
///
/// Every continuation that runs after an await checks it before touching
/// view state, so that late responses are dropped.
#[derive(Clone, Debug)]
pub struct Liveness(Rc<Cell<bool>>);

impl Liveness {
    pub fn new() -> Liveness {
        Liveness(Rc::new(Cell::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.get()
    }

    pub fn kill(&self) {
        self.0.set(false);
    }
}

impl Default for Liveness {
    fn default() -> Liveness {
        Liveness::new()
    }
}
