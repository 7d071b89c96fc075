//! End-to-end tests: the literal driver scenarios plus the ordering,
//! idempotence, and restructuring invariants.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use hat_kv::{Hat, HatConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_key(rng: &mut StdRng, min: usize, max: usize, ascii: bool) -> Vec<u8> {
    let len = rng.random_range(min..=max);
    (0..len)
        .map(|_| {
            if ascii {
                rng.random_range(b'a'..=b'z')
            } else {
                rng.random_range(1..=255u8)
            }
        })
        .collect()
}

fn distinct_keys(seed: u64, n: usize, min: usize, max: usize, ascii: bool) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let k = random_key(&mut rng, min, max, ascii);
        if seen.insert(k.clone()) {
            out.push(k);
        }
    }
    out
}

fn collect_forward(hat: &Hat) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut cur = hat.cursor();
    if !cur.start(b"") {
        return out;
    }
    loop {
        out.push((cur.key_bytes(), cur.slot().to_vec()));
        if !cur.nxt() {
            break;
        }
    }
    out
}

fn collect_backward(hat: &Hat) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut cur = hat.cursor();
    if !cur.last() {
        return out;
    }
    loop {
        out.push((cur.key_bytes(), cur.slot().to_vec()));
        if !cur.prv() {
            break;
        }
    }
    out
}

// ============================================================================
// DRIVER SCENARIOS
// ============================================================================

#[test]
fn scenario_string_records_with_addresses() {
    // 260-byte records: a 256-byte string area plus a 4-byte address
    let mut hat = Hat::open(3, 260).unwrap();

    let strs: [&str; 5] = [
        "Hello World",
        "Fuck This World",
        "I've seen it all",
        "You've always been daydremer",
        "shit!!",
    ];
    let addrs: [u32; 5] = [0x11111111, 0x22222222, 0x33333333, 0x44444444, 0x55555555];

    for (s, a) in strs.iter().zip(addrs.iter()) {
        let cell = hat.cell(s.as_bytes()).unwrap();
        cell[..s.len()].copy_from_slice(s.as_bytes());
        cell[256..260].copy_from_slice(&a.to_le_bytes());
    }

    let rec = hat.find(b"shit!!").expect("inserted key must be found");
    assert_eq!(&rec[..6], b"shit!!");
    assert_eq!(rec[256..260], 0x55555555u32.to_le_bytes());

    for (s, a) in strs.iter().zip(addrs.iter()) {
        let rec = hat.find(s.as_bytes()).unwrap();
        assert_eq!(&rec[..s.len()], s.as_bytes());
        assert_eq!(rec[256..260], a.to_le_bytes());
    }
}

#[test]
fn scenario_prefix_chain_enumeration() {
    let mut hat = Hat::open(0, 8).unwrap();
    let keys: [&[u8]; 6] = [b"a", b"ab", b"abc", b"b", b"", b"ba"];
    for (i, k) in keys.iter().enumerate() {
        hat.cell(k)
            .unwrap()
            .copy_from_slice(&(i as u64).to_le_bytes());
    }

    let got = collect_forward(&hat);
    let want: [&[u8]; 6] = [b"", b"a", b"ab", b"abc", b"b", b"ba"];
    assert_eq!(got.len(), 6);
    for (i, (key, slot)) in got.iter().enumerate() {
        assert_eq!(key.as_slice(), want[i]);
        let src = keys.iter().position(|k| k == &key.as_slice()).unwrap();
        assert_eq!(slot.as_slice(), (src as u64).to_le_bytes());
    }
}

#[test]
fn scenario_burst_coverage_70k() {
    // one shared 2-byte prefix drives everything into a single subtree, so
    // the bucket tier has to burst; pails disabled so arrays burst too
    let mut hat = HatConfig::new()
        .boot_levels(2)
        .aux_bytes(0)
        .pail_slots(0)
        .open()
        .unwrap();

    let tails = distinct_keys(11, 70_000, 10, 10, false);
    for t in &tails {
        let mut k = b"zz".to_vec();
        k.extend_from_slice(t);
        hat.cell(&k).unwrap();
    }
    assert_eq!(hat.len(), 70_000);

    let stats = hat.stats();
    assert!(stats.array_bursts >= 1, "no array burst: {:?}", stats);
    assert!(stats.bucket_bursts >= 1, "no bucket burst: {:?}", stats);

    for t in &tails {
        let mut k = b"zz".to_vec();
        k.extend_from_slice(t);
        assert!(hat.find(&k).is_some());
    }
    // unrelated keys of a different length can never be present
    let misses = distinct_keys(13, 10_000, 11, 11, false);
    for t in &misses {
        let mut k = b"zz".to_vec();
        k.extend_from_slice(t);
        assert!(hat.find(&k).is_none());
    }
}

#[test]
fn scenario_pail_tier_engages() {
    let mut hat = HatConfig::new().boot_levels(2).aux_bytes(0).open().unwrap();
    let tails = distinct_keys(17, 70_000, 10, 10, false);
    for t in &tails {
        let mut k = b"qq".to_vec();
        k.extend_from_slice(t);
        hat.cell(&k).unwrap();
    }
    let stats = hat.stats();
    assert!(stats.pail_bursts >= 1, "no pail burst: {:?}", stats);
    assert!(stats.bucket_bursts >= 1, "no bucket burst: {:?}", stats);
    for t in tails.iter().step_by(97) {
        let mut k = b"qq".to_vec();
        k.extend_from_slice(t);
        assert!(hat.find(&k).is_some());
    }
}

#[test]
fn cursor_walks_radix_levels_after_bucket_burst() {
    // ASCII keys keep ordering exact through the radix levels a bucket
    // burst creates; the cursor has to reconstruct consumed bytes from its
    // scan path
    let mut hat = HatConfig::new().boot_levels(2).aux_bytes(0).open().unwrap();
    let tails = distinct_keys(19, 70_000, 10, 10, true);
    let mut model = BTreeSet::new();
    for t in &tails {
        let mut k = b"rr".to_vec();
        k.extend_from_slice(t);
        hat.cell(&k).unwrap();
        model.insert(k);
    }
    assert!(hat.stats().bucket_bursts >= 1);

    let got: Vec<Vec<u8>> = collect_forward(&hat).into_iter().map(|(k, _)| k).collect();
    let want: Vec<Vec<u8>> = model.iter().cloned().collect();
    assert_eq!(got.len(), want.len());
    assert_eq!(got, want);

    // spot-check the reverse walk across the same radix levels
    let mut cur = hat.cursor();
    assert!(cur.last());
    for expect in model.iter().rev().take(200) {
        assert_eq!(&cur.key_bytes(), expect);
        cur.prv();
    }
}

#[test]
fn scenario_aux_survives_restructuring() {
    let mut hat = Hat::open(0, 4).unwrap();
    hat.cell(b"k")
        .unwrap()
        .copy_from_slice(&0xDEADBEEFu32.to_le_bytes());

    for i in 0..10_000u32 {
        hat.cell(format!("key{:05}", i).as_bytes())
            .unwrap()
            .copy_from_slice(&i.to_le_bytes());
    }

    let v = hat.find(b"k").expect("key must survive restructuring");
    assert_eq!(v, 0xDEADBEEFu32.to_le_bytes());
    for i in (0..10_000u32).step_by(371) {
        assert_eq!(
            hat.find(format!("key{:05}", i).as_bytes()).unwrap(),
            i.to_le_bytes()
        );
    }
}

#[test]
fn scenario_seek_positions() {
    for boot in [0u32, 1, 3] {
        let mut hat = Hat::open(boot, 0).unwrap();
        for k in [&b"a"[..], b"c", b"m", b"mm", b"z"] {
            hat.cell(k).unwrap();
        }

        let mut cur = hat.cursor();
        assert!(cur.start(b"m"), "boot={}", boot);
        assert_eq!(cur.key_bytes(), b"m", "boot={}", boot);

        assert!(cur.start(b"ml"), "boot={}", boot);
        assert_eq!(cur.key_bytes(), b"mm", "boot={}", boot);

        assert!(cur.start(b"ma"), "boot={}", boot);
        assert_eq!(cur.key_bytes(), b"mm", "boot={}", boot);

        assert!(cur.start(b"c"), "boot={}", boot);
        assert_eq!(cur.key_bytes(), b"c", "boot={}", boot);

        assert!(cur.start(b""), "boot={}", boot);
        assert_eq!(cur.key_bytes(), b"a", "boot={}", boot);

        assert!(!cur.start(b"zz"), "boot={}", boot);
    }
}

#[test]
fn scenario_reverse_walk() {
    let mut hat = Hat::open(3, 0).unwrap();
    for k in [&b"alpha"[..], b"beta", b"gamma"] {
        hat.cell(k).unwrap();
    }

    let mut cur = hat.cursor();
    assert!(cur.last());
    assert_eq!(cur.key_bytes(), b"gamma");
    assert!(cur.prv());
    assert_eq!(cur.key_bytes(), b"beta");
    assert!(cur.prv());
    assert_eq!(cur.key_bytes(), b"alpha");
    assert!(!cur.prv());
}

// ============================================================================
// INVARIANTS
// ============================================================================

#[test]
fn insert_then_find_agrees_on_addresses() {
    let mut hat = Hat::open(1, 8).unwrap();
    let keys = distinct_keys(23, 20_000, 4, 20, true);
    for (i, k) in keys.iter().enumerate() {
        hat.cell(k)
            .unwrap()
            .copy_from_slice(&(i as u64).to_le_bytes());
    }
    assert_eq!(hat.len(), keys.len());

    let mut addrs = HashSet::new();
    for (i, k) in keys.iter().enumerate() {
        let found = hat.find(k).expect("inserted key must be found");
        assert_eq!(found, (i as u64).to_le_bytes());
        let found_at = found.as_ptr() as usize;

        // a repeated cell lands on the very same record
        let cell = hat.cell(k).unwrap();
        assert_eq!(cell.as_ptr() as usize, found_at);
        assert!(addrs.insert(found_at), "aux areas must be distinct");
    }
    // idempotence: none of those cells grew the index
    assert_eq!(hat.len(), keys.len());
}

#[test]
fn cursor_enumerates_everything_in_order() {
    for boot in [0u32, 1, 2] {
        let mut hat = Hat::open(boot, 8).unwrap();
        let keys = distinct_keys(29 + boot as u64, 3_000, 1, 12, true);
        let mut model = BTreeMap::new();
        for (i, k) in keys.iter().enumerate() {
            let v = (i as u64).to_le_bytes();
            hat.cell(k).unwrap().copy_from_slice(&v);
            model.insert(k.clone(), v.to_vec());
        }

        let forward = collect_forward(&hat);
        assert_eq!(forward.len(), model.len(), "boot={}", boot);
        for ((gk, gv), (mk, mv)) in forward.iter().zip(model.iter()) {
            assert_eq!(gk, mk, "boot={}", boot);
            assert_eq!(gv, mv, "boot={}", boot);
        }

        let mut backward = collect_backward(&hat);
        backward.reverse();
        assert_eq!(forward, backward, "boot={}", boot);
    }
}

#[test]
fn binary_leaf_suffixes_stay_ordered() {
    // with no boot levels and no bursts every byte lives in leaf suffixes,
    // where ordering is exact even for bytes >= 128
    let mut hat = Hat::open(0, 0).unwrap();
    let keys = distinct_keys(31, 500, 1, 10, false);
    let model: BTreeSet<Vec<u8>> = keys.iter().cloned().collect();
    for k in &keys {
        hat.cell(k).unwrap();
    }

    let got: Vec<Vec<u8>> = collect_forward(&hat).into_iter().map(|(k, _)| k).collect();
    let want: Vec<Vec<u8>> = model.into_iter().collect();
    assert_eq!(got, want);
}

#[test]
fn two_byte_length_keys_round_trip() {
    let mut hat = Hat::open(1, 0).unwrap();
    let keys = distinct_keys(37, 400, 120, 200, true);
    let model: BTreeSet<Vec<u8>> = keys.iter().cloned().collect();
    for k in &keys {
        hat.cell(k).unwrap();
    }
    let got: Vec<Vec<u8>> = collect_forward(&hat).into_iter().map(|(k, _)| k).collect();
    let want: Vec<Vec<u8>> = model.into_iter().collect();
    assert_eq!(got, want);
}

#[test]
fn capacity_grid_stays_healthy() {
    for (boot, aux) in [(0u32, 0usize), (1, 8), (2, 32), (3, 8)] {
        let mut hat = Hat::open(boot, aux).unwrap();
        let keys = distinct_keys(41 + boot as u64, 50_000, 8, 64, false);
        for (i, k) in keys.iter().enumerate() {
            let cell = hat.cell(k).unwrap();
            if aux >= 8 {
                cell[..8].copy_from_slice(&(i as u64).to_le_bytes());
            }
        }
        assert_eq!(hat.len(), keys.len(), "boot={} aux={}", boot, aux);
        for (i, k) in keys.iter().enumerate().step_by(61) {
            let v = hat.find(k).expect("inserted key must be found");
            if aux >= 8 {
                assert_eq!(v[..8], (i as u64).to_le_bytes(), "boot={} aux={}", boot, aux);
            }
        }
    }
}

#[test]
fn stats_observe_descent() {
    let mut hat = Hat::open(0, 0).unwrap();
    hat.cell(b"watched").unwrap();
    let before = hat.stats();
    hat.find(b"watched");
    hat.find(b"missing");
    let after = hat.stats();
    assert!(after.searches > before.searches);
    assert!(after.bucket_steps > before.bucket_steps);
    assert_eq!(after.keys, 1);
    assert!(after.max_mem > 0);
}

#[test]
#[ignore = "million-key soak, run on demand"]
fn million_keys_soak() {
    let mut hat = Hat::open(3, 8).unwrap();
    let keys = distinct_keys(53, 1_000_000, 8, 64, false);
    for (i, k) in keys.iter().enumerate() {
        hat.cell(k)
            .unwrap()
            .copy_from_slice(&(i as u64).to_le_bytes());
    }
    assert_eq!(hat.len(), keys.len());
    for (i, k) in keys.iter().enumerate().step_by(997) {
        assert_eq!(hat.find(k).unwrap(), (i as u64).to_le_bytes());
    }
}
