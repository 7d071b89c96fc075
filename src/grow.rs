//! Node growth engine: array append and promotion, pail and bucket
//! dispatch, and the burst conversions that re-home every record when a node
//! outgrows its tier (array -> pail -> bucket -> radix).
//!
//! Record moves go through small stack buffers; a record never exceeds the
//! top array class, and two arena blocks cannot be borrowed mutably at once.

use crate::hat::{bump, Hat};
use crate::node::{
    class_bytes, decode_len, encode_len, key_hash, len_skip, Slot, SlotKind, ALLOC_ARRAY0,
    ALLOC_BUCKET, ALLOC_PAIL, ALLOC_RADIX, ARRAY_CLASSES, ARRAY_TOP, BUCKET_MAX, BUCKET_SLOTS,
    HDR, SLOT_BYTES,
};

impl Hat {
    /// Header and size of the array node at `base`: `(nxt, class, cnt, size)`.
    pub(crate) fn array_meta(&self, base: u64) -> (usize, usize, usize, usize) {
        let hdr = self.arena.bytes(base, HDR);
        let nxt = u16::from_le_bytes([hdr[0], hdr[1]]) as usize;
        let cls = hdr[2] as usize;
        let cnt = hdr[3] as usize;
        (nxt, cls, cnt, class_bytes(cls))
    }

    fn set_array_meta(&mut self, base: u64, nxt: usize, cls: usize, cnt: usize) {
        let hdr = self.arena.bytes_mut(base, HDR);
        hdr[..2].copy_from_slice(&(nxt as u16).to_le_bytes());
        hdr[2] = cls as u8;
        hdr[3] = cnt as u8;
    }

    /// Byte spans of every record in an array node:
    /// `(key offset within node, key length, record index)`.
    pub(crate) fn record_spans(&self, base: u64) -> Vec<(usize, usize, usize)> {
        let (nxt, _cls, _cnt, size) = self.array_meta(base);
        let data = self.arena.bytes(base, size);
        let mut spans = Vec::new();
        let mut tst = HDR;
        let mut idx = 0usize;
        while tst < HDR + nxt {
            let (len, skip) = decode_len(data, tst);
            spans.push((tst + skip, len, idx));
            tst += skip + len;
            idx += 1;
        }
        spans
    }

    /// Make a fresh array node for one record in the smallest class that
    /// fits, writing its tag into the empty parent slot. `None` when the
    /// suffix is too long for the top class.
    pub(crate) fn new_array(&mut self, slot_loc: u64, key: &[u8]) -> Option<u64> {
        let skip = len_skip(key.len());
        let need = HDR + skip + key.len() + self.aux;
        let cls = (0..ARRAY_CLASSES).find(|&c| class_bytes(c) >= need)?;
        let base = self.arena.alloc(ALLOC_ARRAY0 + cls);
        self.arena.set_slot(slot_loc, Slot::array(base));
        let size = class_bytes(cls);
        let data = self.arena.bytes_mut(base, size);
        encode_len(data, HDR, key.len());
        data[HDR + skip..HDR + skip + key.len()].copy_from_slice(key);
        self.set_array_meta(base, skip + key.len(), cls, 1);
        Some(self.aux_addr(base, size, 0))
    }

    /// Append a record to an existing array node, promoting when it no
    /// longer fits. `None` means the caller must burst.
    pub(crate) fn add_array(&mut self, slot_loc: u64, key: &[u8], pail_ok: bool) -> Option<u64> {
        let base = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Array(base)) => base,
            _ => unreachable!("add_array on a non-array slot"),
        };
        let (nxt, cls, cnt, size) = self.array_meta(base);
        let skip = len_skip(key.len());
        if (self.aux == 0 || cnt < 255)
            && HDR + nxt + skip + key.len() + (cnt + 1) * self.aux <= size
        {
            let data = self.arena.bytes_mut(base, size);
            encode_len(data, HDR + nxt, key.len());
            data[HDR + nxt + skip..HDR + nxt + skip + key.len()].copy_from_slice(key);
            self.set_array_meta(base, nxt + skip + key.len(), cls, cnt + 1);
            return Some(self.aux_addr(base, size, cnt));
        }
        self.promote(slot_loc, key, pail_ok)
    }

    /// Grow a full array node to the smallest class that takes one more
    /// record: two block copies, then the append. Overflowing the top class
    /// converts to a pail when allowed, otherwise reports failure so the
    /// caller bursts.
    fn promote(&mut self, slot_loc: u64, key: &[u8], pail_ok: bool) -> Option<u64> {
        let base = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Array(base)) => base,
            _ => unreachable!("promote on a non-array slot"),
        };
        let (nxt, cls, cnt, size) = self.array_meta(base);
        let skip = len_skip(key.len());
        let need = HDR + nxt + skip + key.len() + (cnt + 1) * self.aux;
        let new_cls = if self.aux == 0 || cnt < 255 {
            (cls..ARRAY_CLASSES).find(|&c| class_bytes(c) >= need)
        } else {
            None
        };
        let new_cls = match new_cls {
            Some(c) => c,
            None => {
                if pail_ok && self.pail_slots > 0 {
                    return self.new_pail(slot_loc, key);
                }
                return None;
            }
        };
        bump(&self.stats.promotes);

        let mut old = [0u8; ARRAY_TOP];
        old[..size].copy_from_slice(self.arena.bytes(base, size));

        let nb = self.arena.alloc(ALLOC_ARRAY0 + new_cls);
        self.arena.set_slot(slot_loc, Slot::array(nb));
        let nsize = class_bytes(new_cls);
        let data = self.arena.bytes_mut(nb, nsize);
        data[HDR..HDR + nxt].copy_from_slice(&old[HDR..HDR + nxt]);
        if self.aux > 0 {
            data[nsize - cnt * self.aux..]
                .copy_from_slice(&old[size - cnt * self.aux..size]);
        }
        encode_len(data, HDR + nxt, key.len());
        data[HDR + nxt + skip..HDR + nxt + skip + key.len()].copy_from_slice(key);
        self.set_array_meta(nb, nxt + skip + key.len(), new_cls, cnt + 1);

        self.arena.free(base, ALLOC_ARRAY0 + cls);
        Some(self.aux_addr(nb, nsize, cnt))
    }

    /// Materialize a pail from a full array node: redistribute every record
    /// by hash, free the array, then insert the triggering key.
    fn new_pail(&mut self, slot_loc: u64, key: &[u8]) -> Option<u64> {
        let base = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Array(base)) => base,
            _ => unreachable!("new_pail on a non-array slot"),
        };
        let (_nxt, cls, _cnt, size) = self.array_meta(base);
        let pail = self.arena.alloc(ALLOC_PAIL);
        self.arena.set_slot(slot_loc, Slot::pail(pail));

        for (koff, klen, rec) in self.record_spans(base) {
            let (kbuf, abuf) = self.copy_record(base, size, koff, klen, rec);
            let code = key_hash(&kbuf[..klen]) as usize % self.pail_slots;
            let child = pail + (code * SLOT_BYTES) as u64;
            let cell = match self.arena.slot(child).decode() {
                None => self.new_array(child, &kbuf[..klen]),
                Some(SlotKind::Array(_)) => self.add_array(child, &kbuf[..klen], false),
                _ => unreachable!("pail child is not an array"),
            };
            // every record fit the source array, so it fits a child
            let cell = cell.unwrap_or_else(|| panic!("pail redistribution overflow"));
            self.write_aux(cell, &abuf[..self.aux]);
        }

        self.arena.free(base, ALLOC_ARRAY0 + cls);
        self.add_pail(slot_loc, key)
    }

    /// Add a key to a pail node. `None` when the hashed child array is at
    /// the top class; pails do not nest, so the caller bursts.
    pub(crate) fn add_pail(&mut self, slot_loc: u64, key: &[u8]) -> Option<u64> {
        let pail = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Pail(pail)) => pail,
            _ => unreachable!("add_pail on a non-pail slot"),
        };
        let code = key_hash(key) as usize % self.pail_slots;
        let child = pail + (code * SLOT_BYTES) as u64;
        match self.arena.slot(child).decode() {
            None => self.new_array(child, key),
            Some(SlotKind::Array(_)) => self.add_array(child, key, false),
            _ => unreachable!("pail child is not an array"),
        }
    }

    /// Add a key plus payload under a bucket node, pre-incrementing its
    /// count. `false` when the bucket is past its bound or the hashed child
    /// cannot take the record; the caller bursts the bucket.
    pub(crate) fn add_bucket(&mut self, slot_loc: u64, key: &[u8], value: &[u8]) -> bool {
        let bucket = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Bucket(bucket)) => bucket,
            _ => unreachable!("add_bucket on a non-bucket slot"),
        };
        let count = self.arena.word(bucket);
        self.arena.set_word(bucket, count + 1);
        if count >= BUCKET_MAX {
            return false;
        }
        let code = key_hash(key) as usize % BUCKET_SLOTS;
        let child = bucket + ((1 + code) * SLOT_BYTES) as u64;
        let cell = match self.arena.slot(child).decode() {
            None => self.new_array(child, key),
            Some(SlotKind::Array(_)) => self.add_array(child, key, true),
            Some(SlotKind::Pail(_)) => self.add_pail(child, key),
            _ => unreachable!("bucket child is not an array or pail"),
        };
        match cell {
            Some(cell) => {
                self.write_aux(cell, value);
                true
            }
            None => false,
        }
    }

    /// Burst whatever leaf sits in the slot. An array append can leave a
    /// pail behind (promote overflow), so dispatch on the current tag.
    pub(crate) fn burst_leaf(&mut self, slot_loc: u64) {
        match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Array(_)) => self.burst_array(slot_loc),
            Some(SlotKind::Pail(_)) => self.burst_pail(slot_loc),
            _ => unreachable!("burst_leaf on a non-leaf slot"),
        }
    }

    /// Burst a full array node into a bucket, redistributing every record by
    /// hash over the bucket slots.
    pub(crate) fn burst_array(&mut self, slot_loc: u64) {
        bump(&self.stats.array_bursts);
        let base = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Array(base)) => base,
            _ => unreachable!("burst_array on a non-array slot"),
        };
        let (_nxt, cls, _cnt, size) = self.array_meta(base);
        let bucket = self.arena.alloc(ALLOC_BUCKET);
        self.arena.set_slot(slot_loc, Slot::bucket(bucket));

        for (koff, klen, rec) in self.record_spans(base) {
            let (kbuf, abuf) = self.copy_record(base, size, koff, klen, rec);
            self.bucket_take(bucket, &kbuf[..klen], &abuf[..self.aux]);
        }
        self.arena.free(base, ALLOC_ARRAY0 + cls);
    }

    /// Burst an overflowing pail into a bucket: every child array's records
    /// are redistributed over the bucket slots, then the children and the
    /// pail itself are freed.
    pub(crate) fn burst_pail(&mut self, slot_loc: u64) {
        bump(&self.stats.pail_bursts);
        let pail = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Pail(pail)) => pail,
            _ => unreachable!("burst_pail on a non-pail slot"),
        };
        let bucket = self.arena.alloc(ALLOC_BUCKET);
        self.arena.set_slot(slot_loc, Slot::bucket(bucket));

        for idx in 0..self.pail_slots {
            let child = self.arena.slot(pail + (idx * SLOT_BYTES) as u64);
            let base = match child.decode() {
                None => continue,
                Some(SlotKind::Array(base)) => base,
                _ => unreachable!("pail child is not an array"),
            };
            let (_nxt, cls, _cnt, size) = self.array_meta(base);
            for (koff, klen, rec) in self.record_spans(base) {
                let (kbuf, abuf) = self.copy_record(base, size, koff, klen, rec);
                self.bucket_take(bucket, &kbuf[..klen], &abuf[..self.aux]);
            }
            self.arena.free(base, ALLOC_ARRAY0 + cls);
        }
        self.arena.free(pail, ALLOC_PAIL);
    }

    /// Decompose a full bucket into a radix node, re-inserting every record
    /// one key byte further down the trie.
    pub(crate) fn burst_bucket(&mut self, slot_loc: u64) {
        bump(&self.stats.bucket_bursts);
        let bucket = match self.arena.slot(slot_loc).decode() {
            Some(SlotKind::Bucket(bucket)) => bucket,
            _ => unreachable!("burst_bucket on a non-bucket slot"),
        };
        if self.arena.word(bucket) < BUCKET_MAX {
            bump(&self.stats.small_bursts);
        }
        let radix = self.arena.alloc(ALLOC_RADIX);
        self.arena.set_slot(slot_loc, Slot::radix(radix));

        for hash in 0..BUCKET_SLOTS {
            let child = self.arena.slot(bucket + ((1 + hash) * SLOT_BYTES) as u64);
            match child.decode() {
                None => {}
                Some(SlotKind::Array(base)) => self.radix_spill_array(radix, base),
                Some(SlotKind::Pail(pail)) => {
                    for idx in 0..self.pail_slots {
                        let grand = self.arena.slot(pail + (idx * SLOT_BYTES) as u64);
                        if let Some(SlotKind::Array(base)) = grand.decode() {
                            self.radix_spill_array(radix, base);
                        }
                    }
                    self.arena.free(pail, ALLOC_PAIL);
                }
                _ => unreachable!("bucket child is not an array or pail"),
            }
        }
        self.arena.free(bucket, ALLOC_BUCKET);
    }

    /// Move every record of an array node down through a radix node, then
    /// free it.
    fn radix_spill_array(&mut self, radix: u64, base: u64) {
        let (_nxt, cls, _cnt, size) = self.array_meta(base);
        for (koff, klen, rec) in self.record_spans(base) {
            let (kbuf, abuf) = self.copy_record(base, size, koff, klen, rec);
            self.add_radix(radix, &kbuf[..klen], &abuf[..self.aux]);
        }
        self.arena.free(base, ALLOC_ARRAY0 + cls);
    }

    /// Re-insert one record below a radix node, consuming a key byte per
    /// radix level and resolving overflow by the same burst machinery as the
    /// public descent.
    fn add_radix(&mut self, radix: u64, key: &[u8], value: &[u8]) {
        let mut radix = radix;
        let mut key = key;
        loop {
            let ch = if key.is_empty() {
                0usize
            } else if key[0] < 128 {
                key[0] as usize
            } else {
                0
            };
            let suffix: &[u8] = if key.is_empty() { &[] } else { &key[1..] };
            let loc = radix + (ch * SLOT_BYTES) as u64;
            match self.arena.slot(loc).decode() {
                None => match self.new_array(loc, suffix) {
                    Some(cell) => {
                        self.write_aux(cell, value);
                        return;
                    }
                    None => {
                        let bucket = self.arena.alloc(ALLOC_BUCKET);
                        self.arena.set_slot(loc, Slot::bucket(bucket));
                    }
                },
                Some(SlotKind::Radix(deeper)) => {
                    radix = deeper;
                    key = suffix;
                }
                Some(SlotKind::Bucket(_)) => {
                    if self.add_bucket(loc, suffix, value) {
                        return;
                    }
                    self.burst_bucket(loc);
                }
                Some(SlotKind::Array(_)) => match self.add_array(loc, suffix, true) {
                    Some(cell) => {
                        self.write_aux(cell, value);
                        return;
                    }
                    None => self.burst_leaf(loc),
                },
                Some(SlotKind::Pail(_)) => match self.add_pail(loc, suffix) {
                    Some(cell) => {
                        self.write_aux(cell, value);
                        return;
                    }
                    None => self.burst_pail(loc),
                },
            }
        }
    }

    /// Redistribution step shared by the array and pail bursts: route one
    /// record into a bucket slot and bump the bucket count.
    fn bucket_take(&mut self, bucket: u64, key: &[u8], value: &[u8]) {
        let code = key_hash(key) as usize % BUCKET_SLOTS;
        let child = bucket + ((1 + code) * SLOT_BYTES) as u64;
        let cell = match self.arena.slot(child).decode() {
            None => self.new_array(child, key),
            Some(SlotKind::Array(_)) => self.add_array(child, key, true),
            Some(SlotKind::Pail(_)) => self.add_pail(child, key),
            _ => unreachable!("bucket child is not an array or pail"),
        };
        let cell = cell.unwrap_or_else(|| panic!("bucket redistribution overflow"));
        self.write_aux(cell, value);
        let count = self.arena.word(bucket);
        self.arena.set_word(bucket, count + 1);
    }

    /// Copy one record's key and aux bytes out to stack buffers so the
    /// source node can be read while the destination mutates.
    fn copy_record(
        &self,
        base: u64,
        size: usize,
        koff: usize,
        klen: usize,
        rec: usize,
    ) -> ([u8; ARRAY_TOP], [u8; ARRAY_TOP]) {
        let mut kbuf = [0u8; ARRAY_TOP];
        kbuf[..klen].copy_from_slice(self.arena.bytes(base + koff as u64, klen));
        let mut abuf = [0u8; ARRAY_TOP];
        if self.aux > 0 {
            let aoff = size - (rec + 1) * self.aux;
            abuf[..self.aux].copy_from_slice(self.arena.bytes(base + aoff as u64, self.aux));
        }
        (kbuf, abuf)
    }

    fn write_aux(&mut self, cell: u64, value: &[u8]) {
        if self.aux > 0 {
            self.arena.bytes_mut(cell, self.aux).copy_from_slice(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HatConfig;

    // enough same-first-byte keys to walk one root array through every
    // promotion and into the pail tier
    #[test]
    fn promote_chain_preserves_payloads() {
        let mut hat = HatConfig::new().boot_levels(1).aux_bytes(8).open().unwrap();
        let keys: Vec<Vec<u8>> = (0..60u64)
            .map(|i| format!("pfx{:04}", i).into_bytes())
            .collect();
        for (i, k) in keys.iter().enumerate() {
            hat.cell(k)
                .unwrap()
                .copy_from_slice(&(i as u64).to_le_bytes());
        }
        assert!(hat.stats().promotes > 0);
        for (i, k) in keys.iter().enumerate() {
            let v = hat.find(k).expect("inserted key must be found");
            assert_eq!(v, (i as u64).to_le_bytes());
        }
    }

    #[test]
    fn disabled_pails_burst_arrays_into_buckets() {
        let mut hat = HatConfig::new()
            .boot_levels(1)
            .aux_bytes(0)
            .pail_slots(0)
            .open()
            .unwrap();
        for i in 0..4000u32 {
            hat.cell(format!("k{:06}", i).as_bytes()).unwrap();
        }
        let stats = hat.stats();
        assert!(stats.array_bursts > 0);
        assert_eq!(stats.pail_bursts, 0);
        for i in 0..4000u32 {
            assert!(hat.find(format!("k{:06}", i).as_bytes()).is_some());
        }
    }

    #[test]
    fn two_byte_length_records_survive_growth() {
        let mut hat = HatConfig::new().boot_levels(0).aux_bytes(4).open().unwrap();
        let keys: Vec<Vec<u8>> = (0..40u8)
            .map(|i| {
                let mut k = vec![b'x'; 150];
                k.push(i);
                k
            })
            .collect();
        for (i, k) in keys.iter().enumerate() {
            hat.cell(k)
                .unwrap()
                .copy_from_slice(&(i as u32).to_le_bytes());
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(hat.find(k).unwrap(), (i as u32).to_le_bytes());
        }
        assert_eq!(hat.find(&vec![b'x'; 150]), None);
    }
}
