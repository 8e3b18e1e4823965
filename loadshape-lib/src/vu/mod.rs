//! Virtual users: sequential executors of workload iterations.

use std::fmt;

mod draining;
mod pool;
mod worker;

pub(crate) use self::{
    draining::{DrainingVus, VuHandle, VuTally},
    pool::VuPool,
    worker::{VuContext, VuExit, dispatched_vu, looping_vu},
};

/// Identity of a VU, unique within its scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VuId(u64);

impl VuId {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// 0-based index, used to select work items.
    pub fn index(self) -> u64 {
        self.0
    }

    /// 1-based number, as shown to humans.
    pub fn number(self) -> u64 {
        self.0 + 1
    }
}

impl fmt::Display for VuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vu#{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    Idle,
    Running,
    Draining,
}

/// Control signal a VU task observes between (and during) iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VuSignal {
    Run,
    /// Finish the current iteration, then exit.
    Drain,
    /// Abort the current iteration and exit.
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vu_id_index_and_number() {
        let id = VuId::new(0);
        assert_eq!(id.index(), 0);
        assert_eq!(id.number(), 1);
        assert_eq!(VuId::new(4).to_string(), "vu#5");
        assert!(VuId::new(1) < VuId::new(2));
    }
}
