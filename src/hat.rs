//! The `Hat` object: open/configure, the shared radix descent driver behind
//! `find` and `cell`, caller data blocks, and per-instance statistics.

use std::cell::Cell;

use crate::arena::Arena;
use crate::cursor::HatCursor;
use crate::error::HatError;
use crate::node::{
    decode_len, key_hash, Slot, SlotKind, ALLOC_BUCKET, ARRAY_TOP, BOOT_MAX, BUCKET_MAX,
    BUCKET_SLOTS, HDR, KEY_MAX, PAIL_SLOTS, SLOT_BYTES,
};

/// Aux address stand-in when `aux == 0`: presence with no payload bytes.
pub(crate) const AUX_SENTINEL: u64 = 1;

/// Ordered index over variable-length byte keys, each carrying a fixed-size
/// caller-owned payload ("aux area").
///
/// Inserts and lookups run at hash-table cost through the hybrid node graph
/// (radix levels over hashed buckets and pails over linear arrays), while
/// [`HatCursor`] recovers full lexicographic order.
///
/// Single-threaded: one `Hat` must not be shared across threads, but
/// independent instances may run in parallel.
pub struct Hat {
    pub(crate) arena: Arena,
    pub(crate) root: u64,
    pub(crate) boot: u32,
    pub(crate) aux: usize,
    pub(crate) pail_slots: usize,
    pub(crate) root_slots: u64,
    pub(crate) keys: u64,
    pub(crate) stats: Counters,
}

/// Configuration builder for [`Hat`].
///
/// ```
/// use hat_kv::HatConfig;
///
/// let hat = HatConfig::new().boot_levels(2).aux_bytes(8).open().unwrap();
/// assert!(hat.is_empty());
/// ```
pub struct HatConfig {
    boot: u32,
    aux: usize,
    pail_slots: usize,
}

impl HatConfig {
    pub fn new() -> Self {
        HatConfig {
            boot: 0,
            aux: 0,
            pail_slots: PAIL_SLOTS,
        }
    }

    /// Radix levels flattened into the triple root: the root table has
    /// `128^n` slots indexed by the first `n` key bytes.
    pub fn boot_levels(mut self, n: u32) -> Self {
        self.boot = n;
        self
    }

    /// Caller-owned payload bytes attached to each key.
    pub fn aux_bytes(mut self, n: usize) -> Self {
        self.aux = n;
        self
    }

    /// Hash slots per pail node. Zero disables the pail tier: full arrays
    /// burst straight into buckets.
    pub fn pail_slots(mut self, n: usize) -> Self {
        self.pail_slots = n;
        self
    }

    pub fn open(self) -> Result<Hat, HatError> {
        if self.boot > BOOT_MAX {
            return Err(HatError::BootTooDeep { boot: self.boot });
        }
        // an empty-suffix record must fit the top array class, which also
        // guarantees the burst cascade for long keys terminates
        if HDR + 1 + self.aux > ARRAY_TOP {
            return Err(HatError::AuxTooLarge { aux: self.aux });
        }
        let mut arena = Arena::new(self.pail_slots);
        let root_slots = 128u64.pow(self.boot);
        let root = arena.alloc_data(root_slots as usize * SLOT_BYTES);
        let mut hat = Hat {
            arena,
            root,
            boot: self.boot,
            aux: self.aux,
            pail_slots: self.pail_slots,
            root_slots,
            keys: 0,
            stats: Counters::default(),
        };
        if self.boot == 0 {
            let bucket = hat.arena.alloc(ALLOC_BUCKET);
            hat.arena.set_slot(hat.root, Slot::bucket(bucket));
        }
        Ok(hat)
    }
}

impl Default for HatConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a caller data block allocated with [`Hat::data`].
#[derive(Clone, Copy, Debug)]
pub struct DataRef {
    addr: u64,
    len: usize,
}

/// Snapshot of a `Hat`'s counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HatStats {
    pub keys: u64,
    pub max_mem: u64,
    pub searches: u64,
    pub probes: u64,
    pub radix_steps: u64,
    pub bucket_steps: u64,
    pub pail_steps: u64,
    pub promotes: u64,
    pub array_bursts: u64,
    pub pail_bursts: u64,
    pub bucket_bursts: u64,
    pub small_bursts: u64,
}

/// Instance counters. `Cell` because `find` is a shared-reference operation;
/// the single-threaded contract makes unsynchronised mutation fine.
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) searches: Cell<u64>,
    pub(crate) probes: Cell<u64>,
    pub(crate) radix_steps: Cell<u64>,
    pub(crate) bucket_steps: Cell<u64>,
    pub(crate) pail_steps: Cell<u64>,
    pub(crate) promotes: Cell<u64>,
    pub(crate) array_bursts: Cell<u64>,
    pub(crate) pail_bursts: Cell<u64>,
    pub(crate) bucket_bursts: Cell<u64>,
    pub(crate) small_bursts: Cell<u64>,
}

pub(crate) fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

impl Hat {
    /// Open a fresh index with `boot` root radix levels and `aux` payload
    /// bytes per key.
    pub fn open(boot: u32, aux: usize) -> Result<Hat, HatError> {
        HatConfig::new().boot_levels(boot).aux_bytes(aux).open()
    }

    /// Number of distinct keys inserted.
    pub fn len(&self) -> usize {
        self.keys as usize
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    pub fn stats(&self) -> HatStats {
        HatStats {
            keys: self.keys,
            max_mem: self.arena.max_mem(),
            searches: self.stats.searches.get(),
            probes: self.stats.probes.get(),
            radix_steps: self.stats.radix_steps.get(),
            bucket_steps: self.stats.bucket_steps.get(),
            pail_steps: self.stats.pail_steps.get(),
            promotes: self.stats.promotes.get(),
            array_bursts: self.stats.array_bursts.get(),
            pail_bursts: self.stats.pail_bursts.get(),
            bucket_bursts: self.stats.bucket_bursts.get(),
            small_bursts: self.stats.small_bursts.get(),
        }
    }

    /// Allocate `amt` bytes of zeroed, 8-aligned caller data inside the
    /// arena. The block lives until the `Hat` is dropped.
    pub fn data(&mut self, amt: usize) -> DataRef {
        DataRef {
            addr: self.arena.alloc_data(amt),
            len: amt,
        }
    }

    pub fn data_bytes(&self, r: DataRef) -> &[u8] {
        self.arena.bytes(r.addr, r.len)
    }

    pub fn data_bytes_mut(&mut self, r: DataRef) -> &mut [u8] {
        self.arena.bytes_mut(r.addr, r.len)
    }

    /// Insert-or-get: returns the key's aux area, inserting the key first if
    /// it is not present. With `aux == 0` the returned slice is empty.
    ///
    /// The returned borrow is only valid until the next mutation; a later
    /// insert may promote or burst the containing node.
    pub fn cell(&mut self, key: &[u8]) -> Result<&mut [u8], HatError> {
        if key.len() > KEY_MAX {
            return Err(HatError::KeyTooLong { len: key.len() });
        }
        let addr = self.cell_addr(key);
        Ok(self.aux_mut(addr))
    }

    /// Look the key up, returning its aux area on a hit. With `aux == 0` a
    /// hit returns an empty slice.
    pub fn find(&self, key: &[u8]) -> Option<&[u8]> {
        let addr = self.find_addr(key)?;
        Some(self.aux_ref(addr))
    }

    /// `find` with a mutable aux view.
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut [u8]> {
        let addr = self.find_addr(key)?;
        Some(self.aux_mut(addr))
    }

    /// Open an ordering cursor. The cursor borrows the `Hat` shared, so no
    /// insert can run while it is live.
    pub fn cursor(&self) -> HatCursor<'_> {
        HatCursor::new(self)
    }

    pub(crate) fn aux_ref(&self, addr: u64) -> &[u8] {
        if self.aux == 0 {
            &[]
        } else {
            self.arena.bytes(addr, self.aux)
        }
    }

    pub(crate) fn aux_mut(&mut self, addr: u64) -> &mut [u8] {
        if self.aux == 0 {
            &mut []
        } else {
            self.arena.bytes_mut(addr, self.aux)
        }
    }

    /// Triple-root index of the key's first `boot` bytes read as a base-128
    /// integer. Exhausted positions and bytes >= 128 contribute digit 0, the
    /// same folding the radix levels apply.
    fn triple_index(&self, key: &[u8]) -> (u64, usize) {
        let mut triple = 0u64;
        let mut off = 0usize;
        for _ in 0..self.boot {
            triple *= 128;
            if off < key.len() {
                let b = key[off];
                off += 1;
                if b < 128 {
                    triple += b as u64;
                }
            }
        }
        (triple, off)
    }

    fn fold(b: u8) -> u64 {
        if b < 128 {
            b as u64
        } else {
            0
        }
    }

    /// Read-only descent. Misses and bucket overflows are plain `None`.
    fn find_addr(&self, key: &[u8]) -> Option<u64> {
        if key.len() > KEY_MAX {
            return None;
        }
        let (triple, mut off) = self.triple_index(key);
        let mut slot = self.arena.slot(self.root + (triple as usize * SLOT_BYTES) as u64);
        loop {
            match slot.decode()? {
                SlotKind::Array(base) => {
                    bump(&self.stats.searches);
                    return self.scan_array(base, &key[off..]);
                }
                SlotKind::Pail(pail) => {
                    bump(&self.stats.pail_steps);
                    let code = key_hash(&key[off..]) as usize % self.pail_slots;
                    slot = self.arena.slot(pail + (code * SLOT_BYTES) as u64);
                }
                SlotKind::Bucket(bucket) => {
                    bump(&self.stats.bucket_steps);
                    let code = key_hash(&key[off..]) as usize % BUCKET_SLOTS;
                    slot = self
                        .arena
                        .slot(bucket + ((1 + code) * SLOT_BYTES) as u64);
                }
                SlotKind::Radix(radix) => {
                    bump(&self.stats.radix_steps);
                    let ch = if off < key.len() {
                        let b = key[off];
                        off += 1;
                        Self::fold(b)
                    } else {
                        0
                    };
                    slot = self.arena.slot(radix + (ch as usize * SLOT_BYTES) as u64);
                }
            }
        }
    }

    /// Scan an array node's length-prefixed records for an exact match,
    /// returning the record's aux address.
    pub(crate) fn scan_array(&self, base: u64, suffix: &[u8]) -> Option<u64> {
        let (nxt, _cls, _cnt, size) = self.array_meta(base);
        let data = self.arena.bytes(base, size);
        let mut tst = HDR;
        let mut cnt = 0usize;
        while tst < HDR + nxt {
            bump(&self.stats.probes);
            let (len, skip) = decode_len(data, tst);
            tst += skip;
            if len == suffix.len() && &data[tst..tst + len] == suffix {
                return Some(self.aux_addr(base, size, cnt));
            }
            tst += len;
            cnt += 1;
        }
        None
    }

    pub(crate) fn aux_addr(&self, base: u64, size: usize, rec: usize) -> u64 {
        if self.aux == 0 {
            AUX_SENTINEL
        } else {
            base + (size - (rec + 1) * self.aux) as u64
        }
    }

    /// Mutating descent shared with `find`: identical routing, but empty
    /// slots take new records and structural pressure is resolved in place by
    /// promote and burst, then the descent retries. This is the only path by
    /// which keys enter the structure.
    fn cell_addr(&mut self, key: &[u8]) -> u64 {
        let (triple, mut off) = self.triple_index(key);
        let mut next = self.root + (triple as usize * SLOT_BYTES) as u64;
        let mut parent: Option<u64> = None;
        loop {
            match self.arena.slot(next).decode() {
                None => {
                    if let Some(par) = parent {
                        if self.bucket_admit(par) {
                            if let Some(cell) = self.new_array(next, &key[off..]) {
                                self.keys += 1;
                                return cell;
                            }
                        }
                        self.burst_bucket(par);
                        next = par;
                        parent = None;
                        continue;
                    }
                    if let Some(cell) = self.new_array(next, &key[off..]) {
                        self.keys += 1;
                        return cell;
                    }
                    // suffix too long for the top array class: seed a bucket
                    // here and let the overflow machinery shorten it
                    let bucket = self.arena.alloc(ALLOC_BUCKET);
                    self.arena.set_slot(next, Slot::bucket(bucket));
                }
                Some(SlotKind::Array(base)) => {
                    if let Some(hit) = self.scan_array(base, &key[off..]) {
                        return hit;
                    }
                    if let Some(par) = parent {
                        if self.bucket_admit(par) {
                            if let Some(cell) = self.add_array(next, &key[off..], true) {
                                self.keys += 1;
                                return cell;
                            }
                        }
                        self.burst_bucket(par);
                        next = par;
                        parent = None;
                        continue;
                    }
                    if let Some(cell) = self.add_array(next, &key[off..], true) {
                        self.keys += 1;
                        return cell;
                    }
                    self.burst_leaf(next);
                }
                Some(SlotKind::Pail(pail)) => {
                    let code = key_hash(&key[off..]) as usize % self.pail_slots;
                    let child = self.arena.slot(pail + (code * SLOT_BYTES) as u64);
                    if let Some(SlotKind::Array(base)) = child.decode() {
                        if let Some(hit) = self.scan_array(base, &key[off..]) {
                            return hit;
                        }
                    }
                    if let Some(par) = parent {
                        if self.bucket_admit(par) {
                            if let Some(cell) = self.add_pail(next, &key[off..]) {
                                self.keys += 1;
                                return cell;
                            }
                        }
                        self.burst_bucket(par);
                        next = par;
                        parent = None;
                        continue;
                    }
                    if let Some(cell) = self.add_pail(next, &key[off..]) {
                        self.keys += 1;
                        return cell;
                    }
                    self.burst_pail(next);
                }
                Some(SlotKind::Bucket(bucket)) => {
                    let code = key_hash(&key[off..]) as usize % BUCKET_SLOTS;
                    parent = Some(next);
                    next = bucket + ((1 + code) * SLOT_BYTES) as u64;
                }
                Some(SlotKind::Radix(radix)) => {
                    let ch = if off < key.len() {
                        let b = key[off];
                        off += 1;
                        Self::fold(b)
                    } else {
                        0
                    };
                    next = radix + (ch as usize * SLOT_BYTES) as u64;
                }
            }
        }
    }

    /// Pre-increment the bucket's record count, admitting the insert when the
    /// old count was still under the burst bound.
    fn bucket_admit(&mut self, bucket_loc: u64) -> bool {
        let bucket = match self.arena.slot(bucket_loc).decode() {
            Some(SlotKind::Bucket(b)) => b,
            _ => unreachable!("parent slot is not a bucket"),
        };
        let count = self.arena.word(bucket);
        self.arena.set_word(bucket, count + 1);
        count < BUCKET_MAX
    }
}
