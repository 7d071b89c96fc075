//! # hat-kv
//!
//! An in-memory ordered index over variable-length byte keys, built on a
//! simplified HAT-trie: radix levels over hashed buckets and pails over
//! linear key arrays, restructured on the fly as the key set grows.
//!
//! ## Characteristics
//!
//! - **Near hash-table inserts and lookups**: keys route through at most a
//!   few radix levels and one or two hashed tiers before a short linear scan.
//! - **Ordered traversal**: a cursor walks the trie in lexicographic byte
//!   order, sorting each hashed leaf on the fly with a ternary quicksort.
//! - **Caller-owned payloads**: every key carries a fixed-size "aux" area
//!   whose size is set at `open`; the index never interprets those bytes.
//! - **Arena storage**: all nodes live in a segmented bump arena with
//!   per-class free lists; dropping the [`Hat`] releases everything at once.
//!
//! Keys are opaque byte strings up to 16383 bytes. The radix fan-out is 128:
//! bytes >= 128 fold into slot 0, so cursor ordering is exact for ASCII-range
//! keys while `cell`/`find` remain exact for arbitrary bytes.
//!
//! ## Example
//!
//! ```rust
//! use hat_kv::Hat;
//!
//! let mut hat = Hat::open(0, 8).unwrap();
//! hat.cell(b"bravo").unwrap().copy_from_slice(&2u64.to_le_bytes());
//! hat.cell(b"alpha").unwrap().copy_from_slice(&1u64.to_le_bytes());
//!
//! assert_eq!(hat.find(b"alpha").unwrap(), 1u64.to_le_bytes());
//! assert!(hat.find(b"charlie").is_none());
//!
//! // in-order traversal
//! let mut cur = hat.cursor();
//! assert!(cur.start(b""));
//! assert_eq!(cur.key_bytes(), b"alpha");
//! assert!(cur.nxt());
//! assert_eq!(cur.key_bytes(), b"bravo");
//! assert!(!cur.nxt());
//! ```
//!
//! A `Hat` is single-threaded; independent instances may run on separate
//! threads. Aux borrows returned by `cell`/`find` are valid until the next
//! insert, and cursors hold a shared borrow for their whole life, so the
//! borrow checker enforces both epochs.

pub mod cursor;
pub mod error;
pub mod hat;

// node layout, arena, and the growth engine are implementation detail
mod arena;
mod grow;
mod node;

pub use cursor::HatCursor;
pub use error::HatError;
pub use hat::{DataRef, Hat, HatConfig, HatStats};
