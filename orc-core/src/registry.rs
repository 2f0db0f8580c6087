//! Object-file provenance: where did a DIE ultimately come from, down through nested archives and
//! fat slices.

use parking_lot::Mutex;

use crate::arch::{Arch, Format};
use crate::string_pool::PoolString;

/// Maximum container nesting depth: an archive of fat binaries of archives, five deep, is already a
/// pathological input and a reasonable hard bound for ancestry tracking.
pub const MAX_ANCESTRY: usize = 5;

/// The nested container path leading to one object file, outermost first.
///
/// Backed by a fixed-size array rather than a `Vec` since the bound is small and known at compile
/// time. `smallvec` would also fit here, but a plain array avoids a dependency for a five-element
/// sequence that never reallocates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ancestry {
    components: [PoolString; MAX_ANCESTRY],
    count: usize,
}

impl Ancestry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of `self` with `component` appended.
    ///
    /// # Panics
    /// Panics if the ancestry is already at [`MAX_ANCESTRY`] depth; callers are expected to check
    /// depth before recursing into a nested container (see [`crate::container::process_file`]).
    pub fn pushed(&self, component: PoolString) -> Self {
        assert!(self.count < MAX_ANCESTRY, "container nesting exceeds {MAX_ANCESTRY}");
        let mut next = *self;
        next.components[next.count] = component;
        next.count += 1;
        next
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_slice(&self) -> &[PoolString] {
        &self.components[..self.count]
    }
}

impl PartialOrd for Ancestry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ancestry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_slice()
            .iter()
            .map(PoolString::as_str)
            .cmp(other.as_slice().iter().map(PoolString::as_str))
    }
}

/// Per-file metadata recorded alongside [`Ancestry`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FileDetails {
    pub offset: usize,
    pub format: Format,
    pub arch: Arch,
    pub is_64_bit: bool,
    pub needs_byteswap: bool,
}

/// `(ancestry, file_details)` for one registered object file.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectFileDescriptor {
    pub ancestry: Ancestry,
    pub details: FileDetails,
}

/// Strong-typed index into the [`ObjectFileRegistry`].
///
/// A bare `usize` would silently accept a `debug_info_offset` or a string-pool length in its place;
/// the newtype makes that a compile error instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OfdIndex(usize);

impl OfdIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

const CHUNK_SIZE: usize = 4096;

/// Concurrent append-only store of [`ObjectFileDescriptor`]s.
///
/// Backed by chunks of fixed-size boxed slices behind one mutex for the append path; once a chunk's
/// slot is written it is never touched again, so `fetch` only needs to read, never lock, once the
/// index's chunk exists. A `Vec<Box<[Slot; CHUNK_SIZE]>>` growing under the mutex does not invalidate
/// earlier chunks' addresses (the `Vec` stores `Box` pointers, not inline storage), so growth never
/// invalidates an outstanding [`OfdIndex`].
pub struct ObjectFileRegistry {
    chunks: Mutex<Vec<Box<[ObjectFileDescriptor; CHUNK_SIZE]>>>,
    len: std::sync::atomic::AtomicUsize,
}

impl ObjectFileRegistry {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            len: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Registers a new descriptor, returning its monotonically increasing index.
    pub fn register(&self, ancestry: Ancestry, details: FileDetails) -> OfdIndex {
        use std::sync::atomic::Ordering;

        let index = self.len.fetch_add(1, Ordering::SeqCst);
        let (chunk_index, slot_index) = (index / CHUNK_SIZE, index % CHUNK_SIZE);

        let mut chunks = self.chunks.lock();
        while chunks.len() <= chunk_index {
            chunks.push(Box::new(
                [ObjectFileDescriptor::default(); CHUNK_SIZE],
            ));
        }
        chunks[chunk_index][slot_index] = ObjectFileDescriptor { ancestry, details };

        OfdIndex::new(index)
    }

    /// Fetches the descriptor registered at `index`.
    ///
    /// # Panics
    /// Panics if `index` was never returned by [`Self::register`] on this registry. An
    /// `OfdIndex` is only ever constructed by this type, so this indicates a cross-engine index
    /// leaked into the wrong registry, a programming error rather than a recoverable input failure.
    pub fn fetch(&self, index: OfdIndex) -> ObjectFileDescriptor {
        let (chunk_index, slot_index) = (index.get() / CHUNK_SIZE, index.get() % CHUNK_SIZE);
        let chunks = self.chunks.lock();
        chunks[chunk_index][slot_index]
    }

    pub fn len(&self) -> usize {
        self.len.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectFileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool::empool_str;

    #[test]
    fn register_then_fetch_round_trips() {
        let registry = ObjectFileRegistry::new();
        let ancestry = Ancestry::new().pushed(empool_str("libfoo.a"));
        let details = FileDetails {
            offset: 128,
            format: Format::MachO,
            arch: Arch::Arm64,
            is_64_bit: true,
            needs_byteswap: false,
        };
        let index = registry.register(ancestry, details);
        let fetched = registry.fetch(index);
        assert_eq!(fetched.ancestry, ancestry);
        assert_eq!(fetched.details.offset, 128);
        assert_eq!(fetched.details.arch, Arch::Arm64);
    }

    #[test]
    fn indices_are_monotonic() {
        let registry = ObjectFileRegistry::new();
        let a = registry.register(Ancestry::new(), FileDetails::default());
        let b = registry.register(Ancestry::new(), FileDetails::default());
        assert!(a.get() < b.get());
    }

    #[test]
    fn ancestry_orders_lexicographically() {
        let a = Ancestry::new().pushed(empool_str("a.a"));
        let b = Ancestry::new().pushed(empool_str("b.a"));
        assert!(a < b);
    }
}
