use crate::array::req::{Address, Cycle, MemReq};

/// Coherence-controller hooks the cache invokes around every access. The
/// cache does not interpret these beyond propagating the response cycle;
/// protocol state, upstream traffic and invalidation all live behind this
/// trait.
pub trait CoherenceController {
    /// Returns true when the whole access should be skipped (e.g. the
    /// request was already satisfied by a racing transaction).
    fn start_access(&mut self, req: &MemReq) -> bool;

    fn end_access(&mut self, req: &MemReq);

    /// Whether a missing line should be allocated at this level.
    fn should_allocate(&mut self, req: &MemReq) -> bool;

    /// Whether the coherence state of `line_id` permits serving a hit.
    fn is_valid(&self, line_id: u32) -> bool;

    /// Run the protocol for the access; `line_id` is `None` on a miss.
    /// Returns the (possibly delayed) response cycle.
    fn process_access(&mut self, req: &MemReq, line_id: Option<u32>, resp_cycle: Cycle) -> Cycle;

    /// An eviction decided by replacement; `wb_addr` is 0 for clean/empty
    /// victims.
    fn process_eviction(&mut self, req: &MemReq, wb_addr: Address, line_id: u32, resp_cycle: Cycle);
}

/// Minimal controller: every miss fills from a flat backing store after a
/// fixed latency, every line is always valid, evictions are only counted.
#[derive(Debug, Default)]
pub struct DirectFill {
    pub fill_latency: u32,
    pub accesses: u64,
    pub fills: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

impl DirectFill {
    pub fn new(fill_latency: u32) -> Self {
        Self {
            fill_latency,
            ..Self::default()
        }
    }
}

impl CoherenceController for DirectFill {
    fn start_access(&mut self, _req: &MemReq) -> bool {
        self.accesses += 1;
        false
    }

    fn end_access(&mut self, _req: &MemReq) {}

    fn should_allocate(&mut self, _req: &MemReq) -> bool {
        true
    }

    fn is_valid(&self, _line_id: u32) -> bool {
        true
    }

    fn process_access(&mut self, _req: &MemReq, line_id: Option<u32>, resp_cycle: Cycle) -> Cycle {
        match line_id {
            Some(_) => resp_cycle,
            None => {
                self.fills += 1;
                resp_cycle + self.fill_latency as Cycle
            }
        }
    }

    fn process_eviction(
        &mut self,
        _req: &MemReq,
        wb_addr: Address,
        _line_id: u32,
        _resp_cycle: Cycle,
    ) {
        self.evictions += 1;
        if wb_addr != 0 {
            self.writebacks += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_fill_adds_latency_on_miss_only() {
        let mut cc = DirectFill::new(100);
        let req = MemReq::load(0x10, 5);
        assert_eq!(cc.process_access(&req, Some(3), 7), 7);
        assert_eq!(cc.process_access(&req, None, 7), 107);
        assert_eq!(cc.fills, 1);
    }

    #[test]
    fn writebacks_counted_for_nonzero_victims() {
        let mut cc = DirectFill::new(0);
        let req = MemReq::load(0x10, 0);
        cc.process_eviction(&req, 0, 0, 0);
        cc.process_eviction(&req, 0x20, 1, 0);
        assert_eq!(cc.evictions, 2);
        assert_eq!(cc.writebacks, 1);
    }
}
