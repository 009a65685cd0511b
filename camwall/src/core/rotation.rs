//! Round-robin rotation of excess sources through the last grid slots

/// One slot changing occupant on a rotation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSwap {
    pub slot: usize,
    pub outgoing: String,
    pub incoming: String,
}

/// Deterministic rotation over a fixed pool.
///
/// With `R` rotating slots and a pool of `P` sources, rotating slot `j` shows
/// `pool[(t * R + j) mod P]` at step `t`. Every pool member is shown exactly
/// `R` times over `P` steps and never in two slots at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSchedule {
    slots: Vec<usize>,
    pool: Vec<String>,
    step: u64,
}

impl RotationSchedule {
    /// `slots` must be non-empty and shorter than `pool`
    pub fn new(slots: Vec<usize>, pool: Vec<String>) -> Self {
        debug_assert!(!slots.is_empty() && slots.len() < pool.len());
        Self { slots, pool, step: 0 }
    }

    pub fn rotating_slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Slot occupants at step `step`, in rotating-slot order
    pub fn assignment_at(&self, step: u64) -> Vec<(usize, String)> {
        let r = self.slots.len() as u64;
        let p = self.pool.len() as u64;
        self.slots
            .iter()
            .enumerate()
            .map(|(j, slot)| {
                let index = ((step % p) * r + j as u64) % p;
                (*slot, self.pool[index as usize].clone())
            })
            .collect()
    }

    pub fn current(&self) -> Vec<(usize, String)> {
        self.assignment_at(self.step)
    }

    /// Pool members not shown at the current step
    pub fn waiting(&self) -> Vec<String> {
        let shown: Vec<String> = self.current().into_iter().map(|(_, name)| name).collect();
        self.pool.iter().filter(|name| !shown.contains(name)).cloned().collect()
    }

    /// Move to the next step and report the slots whose occupant changed
    pub fn advance(&mut self) -> Vec<SlotSwap> {
        let before = self.current();
        self.step = self.step.wrapping_add(1);
        let after = self.current();

        before
            .into_iter()
            .zip(after)
            .filter(|((_, old), (_, new))| old != new)
            .map(|((slot, outgoing), (_, incoming))| SlotSwap {
                slot,
                outgoing,
                incoming,
            })
            .collect()
    }
}
