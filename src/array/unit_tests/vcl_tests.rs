use crate::array::hash::IdentityHash;
use crate::array::repl::VclLruPolicy;
use crate::array::req::{MemReq, LINE_BITS, OUTOFRANGEMISS};
use crate::array::set_assoc::{CacheArray, Lookup};
use crate::array::vcl::VclArray;

fn vcl(way_sizes: Vec<u8>, buffer_ways: Vec<u8>) -> VclArray {
    let num_lines = 4 * way_sizes.len() as u32;
    let policy = VclLruPolicy::new(num_lines, way_sizes.clone());
    VclArray::new(
        num_lines,
        way_sizes,
        buffer_ways,
        Box::new(policy),
        Box::new(IdentityHash),
    )
}

fn base(line_addr: u64) -> u64 {
    line_addr << LINE_BITS as u64
}

/// Full miss path: buffer victim, demotion of its footprint, then the two
/// postinserts, the way the cache level drives the array.
fn fill(array: &mut VclArray, req: &MemReq, resp_cycle: u64) {
    let buffer = array.preinsert_buffer(req.line_addr, req);
    let demotions = array.preinsert_demote(req, buffer.array_idx);
    array.postinsert_demote(buffer.write_back, req, &demotions, resp_cycle);
    array.postinsert_full(req.line_addr, req, buffer.array_idx, &[], resp_cycle);
}

/// Park line 0x3000 in a sub-line way covering bytes [8, 24).
fn demoted_line(array: &mut VclArray) {
    // Lines 0x3000/0x3004/0x3008 all home to set 0 under the identity hash.
    fill(array, &MemReq::load(0x3000, 0), 0);
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 10).with_bytes(base(0x3000) + 8, 16)),
        true,
    );
    fill(array, &MemReq::load(0x3004, 100), 100);
    fill(array, &MemReq::load(0x3008, 200), 200);
}

#[test]
fn buffer_victims_rotate_fifo() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    let mut victims = Vec::new();
    for (i, addr) in [0x3000u64, 0x3004, 0x3008, 0x300C].iter().enumerate() {
        let req = MemReq::load(*addr, i as u64);
        let buffer = array.preinsert_buffer(*addr, &req);
        victims.push(buffer.array_idx);
        array.postinsert_full(*addr, &req, buffer.array_idx, &[], i as u64);
    }
    assert_eq!(victims, vec![2, 3, 2, 3]);
}

#[test]
fn preinsert_is_stable_until_the_placement() {
    let array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    let req = MemReq::load(0x3000, 0);
    let first = array.preinsert_buffer(0x3000, &req);
    let second = array.preinsert_buffer(0x3000, &req);
    assert_eq!(first.array_idx, second.array_idx);
}

#[test]
fn demotion_places_the_footprint_in_a_fitting_way() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    demoted_line(&mut array);
    assert_eq!(array.entry(0).addr, 0x3000);
    assert_eq!(array.sub_line(0), (8, 16));
}

#[test]
fn narrow_hit_and_out_of_range_miss() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    demoted_line(&mut array);

    // Inside the stored extent: a plain hit.
    let inside = array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 300).with_bytes(base(0x3000) + 12, 4)),
        true,
    );
    assert!(inside.is_hit());

    // Bytes 40..44 are resident nowhere: the line id comes back through the
    // secondary channel and the primary channel signals a miss.
    let outside = array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 310).with_bytes(base(0x3000) + 40, 4)),
        true,
    );
    assert_eq!(outside, Lookup::OutOfRange { prev_id: 0 });
    assert_eq!(outside.code(), OUTOFRANGEMISS);
}

#[test]
fn out_of_range_prefetch_is_counted() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    demoted_line(&mut array);
    let outcome = array.lookup(
        0x3000,
        Some(&MemReq::hw_prefetch(0x3000, 300).with_bytes(base(0x3000) + 40, 4)),
        true,
    );
    assert!(matches!(outcome, Lookup::OutOfRange { .. }));
    assert_eq!(array.stats().pref_out_of_bounds_miss, 1);
}

#[test]
fn inflight_lines_skip_the_range_check() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    let req = MemReq::load(0x3000, 0);
    let buffer = array.preinsert_buffer(0x3000, &req);
    array.postinsert_full(0x3000, &req, buffer.array_idx, &[], 500);
    // Cycle 100 is before the fill completes at 500; the line is filling a
    // full-width buffer way, so any byte range hits.
    let outcome = array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 100).with_bytes(base(0x3000) + 60, 4)),
        true,
    );
    match outcome {
        Lookup::Hit { avail_cycle, .. } => assert_eq!(avail_cycle, 500),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[test]
fn demotion_orders_runs_large_to_small_with_stable_ties() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    fill(&mut array, &MemReq::load(0x3000, 0), 0);
    // Two runs of equal length 8: bytes 0..=7 and 48..=55.
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 10).with_bytes(base(0x3000), 8)),
        true,
    );
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 20).with_bytes(base(0x3000) + 48, 8)),
        true,
    );
    assert_eq!(array.entry(2).access_mask, 0x00FF_0000_0000_00FF);

    let req = MemReq::load(0x3004, 30);
    let demotions = array.preinsert_demote(&req, 2);
    assert_eq!(demotions.len(), 2);
    // Equal lengths keep ascending-offset order, and each run gets its own
    // way.
    assert!(demotions[0].start_offset < demotions[1].start_offset);
    assert_ne!(demotions[0].array_idx, demotions[1].array_idx);
    assert_eq!(demotions[1].end_offset, 63);
}

#[test]
fn large_runs_claim_large_ways_first() {
    let mut array = vcl(vec![8, 16, 64, 64], vec![2, 3]);
    fill(&mut array, &MemReq::load(0x3000, 0), 0);
    // A 4-byte run at 0 and a 12-byte run at 16.
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 10).with_bytes(base(0x3000), 4)),
        true,
    );
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 20).with_bytes(base(0x3000) + 16, 12)),
        true,
    );
    let req = MemReq::load(0x3004, 30);
    let demotions = array.preinsert_demote(&req, 2);
    assert_eq!(demotions.len(), 2);
    // The 12-byte run is ranked first and only way 1 can hold it.
    assert_eq!(demotions[0].array_idx, 1);
    assert_eq!(demotions[0].start_offset, 16);
    assert_eq!(demotions[1].array_idx, 0);
}

#[test]
fn empty_footprint_demotes_nothing() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    fill(&mut array, &MemReq::load(0x3000, 0), 0);
    let req = MemReq::load(0x3004, 10);
    assert!(array.preinsert_demote(&req, 2).is_empty());
}

#[test]
fn sub_lines_always_sit_inside_the_line() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    // Footprints chosen to stress the clamping at both line edges.
    let masks: [(u64, u16, u64); 3] = [
        (0, 8, 0x3000),      // run at byte 0
        (56, 8, 0x3004),     // run ending at byte 63
        (0, 64, 0x3008),     // whole line
    ];
    for (i, &(offset, size, addr)) in masks.iter().enumerate() {
        let cycle = i as u64 * 100;
        fill(&mut array, &MemReq::load(addr, cycle), cycle);
        array.lookup(
            addr,
            Some(&MemReq::load(addr, cycle + 10).with_bytes(base(addr) + offset, size)),
            true,
        );
        // Two further fills push the line out of the buffer ways.
        fill(&mut array, &MemReq::load(addr + 0x100, cycle + 20), cycle + 20);
        fill(&mut array, &MemReq::load(addr + 0x200, cycle + 30), cycle + 30);
    }
    for id in 0..8u32 {
        let way = id % 4;
        if way >= 2 {
            continue;
        }
        let (start, size) = array.sub_line(id);
        if array.entry(id).addr == 0 {
            continue;
        }
        assert!(start >= 1, "sub-line {id} starts at 0");
        assert!(start as u32 + size as u32 <= 64, "sub-line {id} spills over");
        assert!(size >= 2);
    }
}

#[test]
fn migrated_entries_carry_their_masks_back() {
    let mut array = vcl(vec![16, 16, 64, 64], vec![2, 3]);
    demoted_line(&mut array);
    // Touch the sub-line so it has a footprint to migrate.
    array.lookup(
        0x3000,
        Some(&MemReq::load(0x3000, 300).with_bytes(base(0x3000) + 8, 8)),
        true,
    );
    let req = MemReq::load(0x3000, 310).with_bytes(base(0x3000) + 40, 4);
    let moved = array.get_all_entries(0x3000, &req, true);
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].array_idx, 0);
    assert_eq!(moved[0].access_mask, 0xFF00);
    // The slot is gone until someone reinstalls the line.
    assert_eq!(array.lookup(0x3000, None, false), Lookup::FullMiss);

    // Reinstalling into a buffer way revives the footprint.
    let buffer = array.preinsert_buffer(0x3000, &req);
    array.postinsert_full(0x3000, &req, buffer.array_idx, &moved, 400);
    let id = buffer.array_idx;
    assert_eq!(array.entry(id).access_mask, 0xFF00);
    assert_eq!(array.sub_line(id), (0, 64));
}

#[test]
#[should_panic(expected = "highest way indexes")]
fn buffer_ways_must_be_trailing() {
    vcl(vec![64, 16, 16, 64], vec![0, 3]);
}

#[test]
#[should_panic(expected = "out of range")]
fn buffer_way_index_must_be_in_range() {
    vcl(vec![16, 16, 64, 64], vec![3, 4]);
}

#[test]
#[should_panic(expected = "sorted and unique")]
fn buffer_ways_must_be_sorted() {
    vcl(vec![16, 16, 64, 64], vec![3, 2]);
}

#[test]
#[should_panic(expected = "at least one buffer way")]
fn all_buffer_ways_is_rejected() {
    vcl(vec![64, 64], vec![0, 1]);
}
