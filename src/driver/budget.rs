//! Restart budget of the watchdog driver: unlimited, or a fixed number of relaunches.

/// How many more times the driver may relaunch its child.
#[derive(Clone, Debug)]
pub struct RestartBudget {
    max: Option<u32>,
    used: u32,
}

impl RestartBudget {
    /// `None` never runs out.
    pub fn new(max: Option<u32>) -> Self {
        Self { max, used: 0 }
    }

    /// Take one restart if any is left.
    pub fn try_consume(&mut self) -> bool {
        if self.max.is_some_and(|max| self.used >= max) {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> Option<u32> {
        self.max.map(|max| max.saturating_sub(self.used))
    }
}
