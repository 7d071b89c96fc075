//! Ordering cursor: a stack walk over the radix levels that materializes
//! each hashed leaf (array, pail, or bucket) into a flat array and sorts it
//! with a bytewise ternary quicksort, recovering lexicographic order from
//! unordered hash nodes.

use std::cmp::Ordering;

use rand::Rng;

use crate::hat::Hat;
use crate::node::{decode_len, SlotKind, Slot, BUCKET_SLOTS, HDR, KEY_MAX, RADIX_SLOTS, SLOT_BYTES};

/// Radix path stack depth.
const CURSOR_DEPTH: usize = 256;

/// Partition size at which the sorter switches to insertion sort.
const INSERTION_MAX: usize = 10;

/// One materialized record: the arena address of its length prefix and of
/// its aux area (0 when the index carries no aux bytes).
#[derive(Clone, Copy)]
struct SortEntry {
    key: u64,
    slot: u64,
}

/// Bi-directional lexicographic cursor over a [`Hat`].
///
/// The cursor borrows the index shared, so it cannot outlive a mutation:
/// position with [`start`](HatCursor::start) or [`last`](HatCursor::last),
/// then step with [`nxt`](HatCursor::nxt) / [`prv`](HatCursor::prv).
pub struct HatCursor<'a> {
    hat: &'a Hat,
    /// Stack top; level 0 is the triple root, the leaf sits at `next[top]`.
    /// Negative means unpositioned or exhausted.
    top: i32,
    next: [Slot; CURSOR_DEPTH],
    scan: [u8; CURSOR_DEPTH],
    rootscan: u64,
    maxroot: u64,
    idx: usize,
    cnt: usize,
    entries: Vec<SortEntry>,
}

impl<'a> HatCursor<'a> {
    pub(crate) fn new(hat: &'a Hat) -> HatCursor<'a> {
        HatCursor {
            hat,
            top: -1,
            next: [Slot::EMPTY; CURSOR_DEPTH],
            scan: [0; CURSOR_DEPTH],
            rootscan: 0,
            maxroot: hat.root_slots,
            idx: 0,
            cnt: 0,
            entries: Vec::new(),
        }
    }

    /// Position on the least key >= `key`. False when no such key exists.
    pub fn start(&mut self, key: &[u8]) -> bool {
        self.top = -1;
        self.idx = 0;
        self.cnt = 0;
        self.rootscan = 0;
        let mut off = 0usize;
        for _ in 0..self.hat.boot {
            self.rootscan *= 128;
            if off < key.len() {
                let b = key[off];
                off += 1;
                if b < 128 {
                    self.rootscan += b as u64;
                }
            }
        }

        let s = self.root_slot(self.rootscan);
        if s.is_empty() {
            // scan to the next occupied root
            self.top = 1;
            return self.nxt();
        }
        self.top = 1;
        self.next[1] = s;

        // once the descent steps past an empty slot the remaining query
        // bytes stop binding: everything below is already greater
        let mut exhausted = false;
        loop {
            match self.next[self.top as usize].decode() {
                Some(SlotKind::Radix(radix)) => {
                    let mut ch: usize = if !exhausted && off < key.len() {
                        let b = key[off];
                        off += 1;
                        if b < 128 {
                            b as usize
                        } else {
                            0
                        }
                    } else {
                        0
                    };
                    let mut found = false;
                    while ch < RADIX_SLOTS {
                        let s = self.hat.arena.slot(radix + (ch * SLOT_BYTES) as u64);
                        if !s.is_empty() {
                            self.scan[self.top as usize] = ch as u8;
                            self.top += 1;
                            self.next[self.top as usize] = s;
                            found = true;
                            break;
                        }
                        exhausted = true;
                        ch += 1;
                    }
                    if !found {
                        // the key is greater than everything under this radix
                        return self.nxt();
                    }
                }
                _ => {
                    self.materialize();
                    if self.cnt == 0 {
                        self.idx = 0;
                        return self.nxt();
                    }
                    let q: &[u8] = if exhausted { &[] } else { &key[off..] };
                    return self.greater(q);
                }
            }
        }
    }

    /// Position on the last key. False when the index is empty.
    pub fn last(&mut self) -> bool {
        self.top = -1;
        self.idx = 0;
        self.cnt = 0;
        let mut idx = self.maxroot;
        while idx > 0 {
            idx -= 1;
            let s = self.root_slot(idx);
            if s.is_empty() {
                continue;
            }
            self.rootscan = idx;
            self.top = 1;
            self.next[1] = s;
            self.descend_last();
            self.materialize();
            if self.cnt > 0 {
                self.idx = self.cnt - 1;
                return true;
            }
            self.top = -1;
        }
        false
    }

    /// Advance to the next key. False at end of traversal.
    pub fn nxt(&mut self) -> bool {
        if self.top < 0 {
            return false;
        }
        self.idx += 1;
        if self.idx < self.cnt {
            return true;
        }
        loop {
            self.top -= 1;
            if self.top < 0 {
                return false;
            }
            let lvl = self.top as usize;
            let max = if lvl == 0 {
                self.maxroot
            } else {
                RADIX_SLOTS as u64
            };
            let mut idx = if lvl == 0 {
                self.rootscan
            } else {
                self.scan[lvl] as u64
            };
            loop {
                idx += 1;
                if idx >= max {
                    break;
                }
                let s = self.level_slot(lvl, idx);
                if s.is_empty() {
                    continue;
                }
                if lvl == 0 {
                    self.rootscan = idx;
                } else {
                    self.scan[lvl] = idx as u8;
                }
                self.top = lvl as i32 + 1;
                self.next[self.top as usize] = s;
                self.descend_first();
                self.materialize();
                if self.cnt > 0 {
                    self.idx = 0;
                    return true;
                }
                // unseeded leaf (the empty boot bucket): keep scanning
                self.top = lvl as i32;
            }
        }
    }

    /// Step back to the previous key. False at beginning of traversal.
    pub fn prv(&mut self) -> bool {
        if self.top < 0 {
            return false;
        }
        if self.idx > 0 {
            self.idx -= 1;
            return true;
        }
        loop {
            self.top -= 1;
            if self.top < 0 {
                return false;
            }
            let lvl = self.top as usize;
            let mut idx = if lvl == 0 {
                self.rootscan
            } else {
                self.scan[lvl] as u64
            };
            while idx > 0 {
                idx -= 1;
                let s = self.level_slot(lvl, idx);
                if s.is_empty() {
                    continue;
                }
                if lvl == 0 {
                    self.rootscan = idx;
                } else {
                    self.scan[lvl] = idx as u8;
                }
                self.top = lvl as i32 + 1;
                self.next[self.top as usize] = s;
                self.descend_last();
                self.materialize();
                if self.cnt > 0 {
                    self.idx = self.cnt - 1;
                    return true;
                }
                self.top = lvl as i32;
            }
        }
    }

    /// Reconstruct the key at the cursor: triple-root digits, then the radix
    /// scan bytes down the stack (zero digits are path padding and are
    /// skipped), then the record's stored suffix. Writes at most `buf.len()`
    /// bytes and returns the written count; 0 at end of traversal.
    pub fn key(&self, buf: &mut [u8]) -> usize {
        if self.top < 0 || self.idx >= self.cnt {
            return 0;
        }
        let mut off = 0usize;
        for digit in (0..self.hat.boot).rev() {
            let ch = ((self.rootscan >> (7 * digit)) & 0x7f) as u8;
            if ch != 0 && off < buf.len() {
                buf[off] = ch;
                off += 1;
            }
        }
        for lvl in 1..self.top as usize {
            let ch = self.scan[lvl];
            if ch != 0 && off < buf.len() {
                buf[off] = ch;
                off += 1;
            }
        }
        for &b in key_of(self.hat, self.entries[self.idx]) {
            if off >= buf.len() {
                break;
            }
            buf[off] = b;
            off += 1;
        }
        off
    }

    /// The current key as an owned vector; empty at end of traversal.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 4 + CURSOR_DEPTH + KEY_MAX];
        let n = self.key(&mut buf);
        buf.truncate(n);
        buf
    }

    /// The aux area at the cursor. Empty when `aux == 0` or unpositioned.
    pub fn slot(&self) -> &'a [u8] {
        if self.top < 0 || self.idx >= self.cnt || self.hat.aux == 0 {
            return &[];
        }
        self.hat.arena.bytes(self.entries[self.idx].slot, self.hat.aux)
    }

    fn root_slot(&self, idx: u64) -> Slot {
        self.hat
            .arena
            .slot(self.hat.root + (idx as usize * SLOT_BYTES) as u64)
    }

    fn level_slot(&self, lvl: usize, idx: u64) -> Slot {
        if lvl == 0 {
            return self.root_slot(idx);
        }
        let radix = match self.next[lvl].decode() {
            Some(SlotKind::Radix(radix)) => radix,
            _ => unreachable!("interior cursor level is not a radix"),
        };
        self.hat
            .arena
            .slot(radix + (idx as usize * SLOT_BYTES) as u64)
    }

    /// Push down through radix nodes taking the first non-empty child until
    /// a leaf is reached.
    fn descend_first(&mut self) {
        while let Some(SlotKind::Radix(radix)) = self.next[self.top as usize].decode() {
            let mut advanced = false;
            for ch in 0..RADIX_SLOTS {
                let s = self.hat.arena.slot(radix + (ch * SLOT_BYTES) as u64);
                if !s.is_empty() {
                    self.scan[self.top as usize] = ch as u8;
                    self.top += 1;
                    self.next[self.top as usize] = s;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
        }
    }

    fn descend_last(&mut self) {
        while let Some(SlotKind::Radix(radix)) = self.next[self.top as usize].decode() {
            let mut advanced = false;
            for ch in (0..RADIX_SLOTS).rev() {
                let s = self.hat.arena.slot(radix + (ch * SLOT_BYTES) as u64);
                if !s.is_empty() {
                    self.scan[self.top as usize] = ch as u8;
                    self.top += 1;
                    self.next[self.top as usize] = s;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
        }
    }

    /// Strip the leaf at the stack top into the flat array and sort it.
    fn materialize(&mut self) {
        self.entries.clear();
        match self.next[self.top as usize].decode() {
            Some(SlotKind::Array(base)) => self.strip_array(base),
            Some(SlotKind::Pail(pail)) => self.strip_pail(pail),
            Some(SlotKind::Bucket(bucket)) => self.strip_bucket(bucket),
            _ => {}
        }
        self.cnt = self.entries.len();
        let mut rng = rand::rng();
        qsort(self.hat, &mut self.entries, 0, &mut rng);
    }

    fn strip_array(&mut self, base: u64) {
        let hat = self.hat;
        let (nxt, _cls, _cnt, size) = hat.array_meta(base);
        let data = hat.arena.bytes(base, size);
        let mut tst = HDR;
        let mut rec = 0usize;
        while tst < HDR + nxt {
            let (len, skip) = decode_len(data, tst);
            let slot = if hat.aux == 0 {
                0
            } else {
                base + (size - (rec + 1) * hat.aux) as u64
            };
            self.entries.push(SortEntry {
                key: base + tst as u64,
                slot,
            });
            tst += skip + len;
            rec += 1;
        }
    }

    fn strip_pail(&mut self, pail: u64) {
        for idx in 0..self.hat.pail_slots {
            let s = self.hat.arena.slot(pail + (idx * SLOT_BYTES) as u64);
            if let Some(SlotKind::Array(base)) = s.decode() {
                self.strip_array(base);
            }
        }
    }

    fn strip_bucket(&mut self, bucket: u64) {
        for idx in 0..BUCKET_SLOTS {
            let s = self.hat.arena.slot(bucket + ((1 + idx) * SLOT_BYTES) as u64);
            match s.decode() {
                Some(SlotKind::Array(base)) => self.strip_array(base),
                Some(SlotKind::Pail(pail)) => self.strip_pail(pail),
                _ => {}
            }
        }
    }

    /// Seek within the sorted leaf: position on the first record whose
    /// suffix is >= the query suffix, falling through to the next leaf when
    /// every record here is smaller.
    fn greater(&mut self, q: &[u8]) -> bool {
        for i in 0..self.cnt {
            if key_of(self.hat, self.entries[i]).cmp(&q) != Ordering::Less {
                self.idx = i;
                return true;
            }
        }
        self.idx = self.cnt;
        self.nxt()
    }
}

/// The record's key bytes, past the length prefix. Read in two steps so a
/// 1-byte prefix at the very end of a node never reads past it.
fn key_of<'a>(hat: &'a Hat, e: SortEntry) -> &'a [u8] {
    let low = hat.arena.bytes(e.key, 1)[0] as usize;
    if low & 0x80 != 0 {
        let high = hat.arena.bytes(e.key + 1, 1)[0] as usize;
        hat.arena.bytes(e.key + 2, (low & 0x7f) | high << 7)
    } else {
        hat.arena.bytes(e.key + 1, low)
    }
}

/// Sort byte at depth `o`; records ending at `o` sort as byte 0.
fn sort_byte(hat: &Hat, e: SortEntry, o: usize) -> u8 {
    let k = key_of(hat, e);
    if o < k.len() {
        k[o]
    } else {
        0
    }
}

/// Full suffix comparison from depth `o`; a shorter record that is a prefix
/// of a longer one sorts first.
fn cmp_suffix(hat: &Hat, a: SortEntry, b: SortEntry, o: usize) -> Ordering {
    let ka = key_of(hat, a);
    let kb = key_of(hat, b);
    let sa = ka.get(o..).unwrap_or(&[]);
    let sb = kb.get(o..).unwrap_or(&[]);
    sa.cmp(sb)
}

fn insertion_sort(hat: &Hat, x: &mut [SortEntry], o: usize) {
    for i in 1..x.len() {
        let mut j = i;
        while j > 0 && cmp_suffix(hat, x[j], x[j - 1], o) == Ordering::Less {
            x.swap(j, j - 1);
            j -= 1;
        }
    }
}

fn vecswap(x: &mut [SortEntry], mut i: usize, mut j: usize, mut n: usize) {
    while n > 0 {
        x.swap(i, j);
        i += 1;
        j += 1;
        n -= 1;
    }
}

/// Ternary quicksort keyed by the byte at depth `o`, after Sedgewick's
/// three-way partitioning. The equal partition recurses one byte deeper;
/// small partitions fall to insertion sort on full suffixes.
fn qsort(hat: &Hat, x: &mut [SortEntry], o: usize, rng: &mut impl Rng) {
    let n = x.len();
    if n <= INSERTION_MAX {
        insertion_sort(hat, x, o);
        return;
    }

    let p = rng.random_range(0..n);
    x.swap(0, p);
    let pivot = sort_byte(hat, x[0], o);

    let mut a: isize = 1;
    let mut b: isize = 1;
    let mut c: isize = n as isize - 1;
    let mut d: isize = n as isize - 1;
    loop {
        while b <= c {
            let ch = sort_byte(hat, x[b as usize], o);
            if ch > pivot {
                break;
            }
            if ch == pivot {
                x.swap(a as usize, b as usize);
                a += 1;
            }
            b += 1;
        }
        while b <= c {
            let ch = sort_byte(hat, x[c as usize], o);
            if ch < pivot {
                break;
            }
            if ch == pivot {
                x.swap(c as usize, d as usize);
                d -= 1;
            }
            c -= 1;
        }
        if b > c {
            break;
        }
        x.swap(b as usize, c as usize);
        b += 1;
        c -= 1;
    }

    let less = (b - a) as usize;
    let greater = (d - c) as usize;
    let eq_left = a as usize;
    let eq_right = n - 1 - d as usize;

    let r = eq_left.min(less);
    vecswap(x, 0, b as usize - r, r);
    let r = greater.min(eq_right);
    vecswap(x, b as usize, n - r, r);

    let (rest, gt) = x.split_at_mut(n - greater);
    let (lt, mid) = rest.split_at_mut(less);
    if !gt.is_empty() {
        qsort(hat, gt, o, rng);
    }
    if !lt.is_empty() {
        qsort(hat, lt, o, rng);
    }
    if !mid.is_empty() {
        // a record exhausted at this depth cannot be partitioned further
        if key_of(hat, mid[0]).len() <= o {
            insertion_sort(hat, mid, o);
        } else {
            qsort(hat, mid, o + 1, rng);
        }
    }
}
