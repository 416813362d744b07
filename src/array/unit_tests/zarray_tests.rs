use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::array::hash::{HashFamily, MixHash};
use crate::array::repl::{LruPolicy, ReplPolicy};
use crate::array::req::{Address, MemReq};
use crate::array::set_assoc::{CacheArray, Lookup};
use crate::array::zarray::ZArray;

/// Hash family scripted from a table; panics loudly on an unmapped pair so
/// a test exercises exactly the walk it scripted.
struct TableHash {
    map: HashMap<(u32, Address), u64>,
}

impl TableHash {
    fn new(entries: &[(Address, [u64; 4])]) -> Self {
        let mut map = HashMap::new();
        for &(addr, sets) in entries {
            for (way, &set) in sets.iter().enumerate() {
                map.insert((way as u32, addr), set);
            }
        }
        Self { map }
    }
}

impl HashFamily for TableHash {
    fn hash(&self, way: u32, line_addr: Address) -> u64 {
        *self
            .map
            .get(&(way, line_addr))
            .unwrap_or_else(|| panic!("unmapped hash pair (way {way}, {line_addr:#x})"))
    }
}

/// LRU wrapper that counts `replaced` notifications.
struct CountingLru {
    inner: LruPolicy,
    replaced: Rc<Cell<u64>>,
}

impl ReplPolicy for CountingLru {
    fn update(&mut self, line_id: u32, req: &MemReq) {
        self.inner.update(line_id, req);
    }

    fn replaced(&mut self, line_id: u32) {
        self.replaced.set(self.replaced.get() + 1);
        self.inner.replaced(line_id);
    }

    fn rank(&mut self, req: &MemReq, cands: &mut dyn Iterator<Item = u32>) -> u32 {
        self.inner.rank(req, cands)
    }
}

fn insert(array: &mut ZArray, line_addr: Address, cycle: u64) -> u32 {
    let req = MemReq::load(line_addr, cycle);
    let eviction = array.preinsert(line_addr, &req);
    array.postinsert(line_addr, &req, eviction.line_id, cycle);
    eviction.line_id
}

#[test]
fn relocation_chain_shifts_positions_toward_the_seed() {
    // 8 sets x 4 ways. The incoming address seeds to four occupied slots;
    // the walk reaches an empty slot two steps below a seed, so installing
    // the line drags two residents along their hash positions.
    let a = 0xA00u64;
    let hf = TableHash::new(&[
        (a, [0, 0, 0, 0]),
        (0xB00, [0, 1, 1, 1]), // -> pos 0
        (0xB08, [0, 0, 2, 2]), // -> pos 8
        (0xB09, [0, 1, 5, 5]), // -> pos 9
        (0xB10, [0, 0, 0, 3]), // -> pos 16
        (0xB11, [0, 0, 1, 3]), // -> pos 17
        (0xB12, [0, 0, 2, 3]), // -> pos 18
        (0xB18, [0, 0, 0, 0]), // -> pos 24
        (0xB19, [0, 0, 0, 1]), // -> pos 25
        (0xB1A, [0, 0, 0, 2]), // -> pos 26
        (0xB1B, [0, 0, 0, 3]), // -> pos 27
        (0xB1D, [0, 0, 0, 5]), // -> pos 29
    ]);
    let replaced = Rc::new(Cell::new(0));
    let rp = CountingLru {
        inner: LruPolicy::new(32),
        replaced: replaced.clone(),
    };
    let mut array = ZArray::new(32, 4, 20, Box::new(rp), Box::new(hf));

    // Fill positions so every slot the walk visits is occupied except 21.
    for &(addr, pos) in &[
        (0xB00u64, 0u32),
        (0xB08, 8),
        (0xB09, 9),
        (0xB10, 16),
        (0xB11, 17),
        (0xB12, 18),
        (0xB18, 24),
        (0xB19, 25),
        (0xB1A, 26),
        (0xB1B, 27),
        (0xB1D, 29),
    ] {
        let id = insert(&mut array, addr, pos as u64);
        assert_eq!(id, pos, "fill for {addr:#x} landed on the wrong slot");
    }

    let req = MemReq::load(a, 100);
    assert_eq!(array.lookup(a, Some(&req), true), Lookup::FullMiss);

    let before = replaced.get();
    let eviction = array.preinsert(a, &req);
    assert_eq!(eviction.line_id, 21, "empty slot should win the ranking");
    assert_eq!(eviction.wb_addr, 0);
    assert_eq!(array.swap_chain_len(), 3);

    array.postinsert(a, &req, eviction.line_id, 100);
    assert_eq!(replaced.get() - before, 1);
    assert_eq!(array.stats().swaps, 2);

    // The chain ends at the seed position, which now maps to the new line.
    assert_eq!(array.position_map()[0], 21);
    // Both displaced residents are still reachable through their own ways.
    assert!(array.lookup(a, Some(&req), false).is_hit());
    assert!(array.lookup(0xB00, None, false).is_hit());
    assert!(array.lookup(0xB09, None, false).is_hit());
}

#[test]
fn empty_seed_needs_no_relocation() {
    let mut array = ZArray::new(
        64,
        4,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 1)),
    );
    let req = MemReq::load(0x77, 0);
    let eviction = array.preinsert(0x77, &req);
    array.postinsert(0x77, &req, eviction.line_id, 0);
    assert_eq!(array.swap_chain_len(), 1);
    assert_eq!(array.stats().swaps, 0);
    assert!(array.lookup(0x77, None, false).is_hit());
}

#[test]
fn position_map_stays_a_permutation() {
    let mut array = ZArray::new(
        64,
        4,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 3)),
    );
    for i in 0..300u64 {
        let addr = 0x1000 + i * 3 + 1;
        if !array.lookup(addr, None, false).is_hit() {
            insert(&mut array, addr, i);
        }
    }
    let mut ids: Vec<u32> = array.position_map().to_vec();
    ids.sort_unstable();
    let expected: Vec<u32> = (0..64).collect();
    assert_eq!(ids, expected, "a line id was lost or duplicated");
}

#[test]
fn inserted_lines_are_found_until_replaced() {
    let mut array = ZArray::new(
        64,
        4,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 3)),
    );
    let addr = 0xCAFE;
    let id = insert(&mut array, addr, 5);
    match array.lookup(addr, Some(&MemReq::load(addr, 10)), true) {
        Lookup::Hit { line_id, .. } => assert_eq!(line_id, id),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[test]
fn out_of_order_compensation_persists() {
    let mut array = ZArray::new(
        64,
        4,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 9)),
    );
    let req = MemReq::load(0xBEEF, 90);
    let eviction = array.preinsert(0xBEEF, &req);
    array.postinsert(0xBEEF, &req, eviction.line_id, 100);

    match array.lookup(0xBEEF, Some(&MemReq::load(0xBEEF, 80)), true) {
        Lookup::Hit { avail_cycle, .. } => assert_eq!(avail_cycle, 90),
        other => panic!("expected hit, got {other:?}"),
    }
    let entry = array.entry(eviction.line_id);
    assert_eq!(entry.start_cycle, 80);
    assert_eq!(entry.avail_cycle, 90);
}

#[test]
#[should_panic(expected = "line address 0")]
fn zero_line_address_is_fatal() {
    let mut array = ZArray::new(
        64,
        4,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 0)),
    );
    array.lookup(0, None, false);
}

#[test]
#[should_panic(expected = "at least 2 ways")]
fn single_way_skew_array_is_rejected() {
    ZArray::new(
        64,
        1,
        16,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(1, 0)),
    );
}

#[test]
#[should_panic(expected = "candidates")]
fn candidate_budget_below_ways_is_rejected() {
    ZArray::new(
        64,
        4,
        2,
        Box::new(LruPolicy::new(64)),
        Box::new(MixHash::new(4, 0)),
    );
}
