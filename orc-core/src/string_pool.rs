//! Process-lifetime string interning.
//!
//! A handle needs to be a stable, `'static`, pointer-identity-comparable value with precomputed
//! length and hash, recoverable without a side table. A hand-rolled bump arena that writes a
//! `(length, hash)` prefix immediately before each string's bytes gets there via `unsafe` pointer
//! arithmetic; `Box::leak` gets the same observable contract from the allocator instead, for no
//! loss of behavior.
//!
//! Interning is per-thread: each thread keeps its own hash-to-handle multimap, so two threads that
//! intern the same bytes get two (still pointer-equal-to-themselves, not to each other) `'static`
//! entries. That's fine: `PoolString`
//! equality is pointer identity, and the two call sites doing the comparison are the conflict
//! detector (which always compares handles produced by the single DWARF-parsing task that owns
//! them) and the symbol_ignore/ancestry ordering paths (which compare by `.as_str()`, not identity).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::hash::fnv1a;

struct Entry {
    hash: u64,
    bytes: Box<[u8]>,
}

/// An interned string handle: one word, `Copy`, compares by pointer identity.
#[derive(Clone, Copy)]
pub struct PoolString(Option<&'static Entry>);

impl PoolString {
    /// The handle representing the empty string.
    pub const NIL: PoolString = PoolString(None);

    /// True for the nil handle (the empty string).
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// The interned bytes as a UTF-8 string slice.
    ///
    /// DWARF string data is not guaranteed valid UTF-8; invalid sequences are replaced rather than
    /// panicking, since a qualified-name mismatch on invalid input is still useful diagnostic
    /// information and should not crash the analysis of an otherwise-fine file.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            None => "",
            Some(entry) => std::str::from_utf8(&entry.bytes).unwrap_or("\u{FFFD}"),
        }
    }

    /// The precomputed hash of the interned bytes. `0` for the nil handle.
    pub fn hash(&self) -> u64 {
        match self.0 {
            None => 0,
            Some(entry) => entry.hash,
        }
    }

    /// `true` if `self`'s path contains `needle` as a substring (used by the skip filters).
    pub fn contains(&self, needle: &str) -> bool {
        self.as_str().contains(needle)
    }
}

impl PartialEq for PoolString {
    fn eq(&self, other: &Self) -> bool {
        match (self.0, other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            _ => false,
        }
    }
}

impl Eq for PoolString {}

impl Default for PoolString {
    /// The nil handle. Lets [`crate::registry::Ancestry`] derive `Default` for its fixed-size
    /// component array.
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Debug for PoolString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolString({:?})", self.as_str())
    }
}

impl fmt::Display for PoolString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

thread_local! {
    static INTERNED: RefCell<HashMap<u64, Vec<&'static Entry>>> = RefCell::new(HashMap::new());
}

/// Interns `bytes`, returning a handle stable for the rest of the process's life.
///
/// Equal byte sequences always return handles that compare equal, by scanning the hash bucket for
/// an exact byte match before allocating a new entry.
pub fn empool(bytes: &[u8]) -> PoolString {
    if bytes.is_empty() {
        return PoolString::NIL;
    }

    let hash = fnv1a(bytes);

    INTERNED.with(|map| {
        let mut map = map.borrow_mut();
        let bucket = map.entry(hash).or_default();
        for &entry in bucket.iter() {
            if &*entry.bytes == bytes {
                return PoolString(Some(entry));
            }
        }
        let entry: &'static Entry = Box::leak(Box::new(Entry {
            hash,
            bytes: bytes.into(),
        }));
        bucket.push(entry);
        PoolString(Some(entry))
    })
}

/// Interns a UTF-8 string; convenience wrapper over [`empool`].
pub fn empool_str(s: &str) -> PoolString {
    empool(s.as_bytes())
}

/// Marker type for the process-lifetime string pool. Holds no state of its own (interning is a
/// thread-local free function), but gives `Engine` something to own and gives call sites a place to
/// hang doc comments and, eventually, pool-wide statistics.
#[derive(Default)]
pub struct StringPool;

impl StringPool {
    pub fn new() -> Self {
        Self
    }

    pub fn intern(&self, bytes: &[u8]) -> PoolString {
        empool(bytes)
    }

    pub fn intern_str(&self, s: &str) -> PoolString {
        empool_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_byte_equality() {
        let a = empool_str("hello");
        let b = empool_str("hello");
        let c = empool_str("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nil_handle_is_empty() {
        let nil = empool_str("");
        assert!(nil.is_empty());
        assert_eq!(nil.as_str(), "");
        assert_eq!(nil.hash(), 0);
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let a = empool_str("qualified::symbol::path");
        let b = empool_str("qualified::symbol::path");
        assert_eq!(a.hash(), b.hash());
    }
}
