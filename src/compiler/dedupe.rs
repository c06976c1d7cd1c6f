//! Content-addressable storage for generated artifacts.
//!
//! Many methods compile to byte-identical code or tables (accessors, trivial constructors,
//! bridge stubs), and every one of them would otherwise take space in the final image. The
//! [`BlobStore`] interns each blob once per [`BlobCategory`] and hands out a [`BlobHandle`] that
//! compiled method records keep instead of the bytes.
//!
//! # Structure
//!
//! Each category is an independent [`DedupeSet`]:
//!
//! - canonical blobs live in an append-only `boxcar::Vec`, so a handle is a stable index and
//!   lookups never take a lock
//! - a `DashMap` from [`hash_blob`] value to the indices sharing that hash serializes concurrent
//!   inserts per shard; a hash match is only a candidate until the bytes compare equal
//!
//! # Thread Safety
//!
//! [`BlobStore::intern`] takes `&self` and can be called from every worker at once. Two threads
//! interning equal bytes always receive the same handle.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    },
};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::{utils::hash_blob, Error, Result};

/// The kinds of artifacts the backend produces for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, EnumIter)]
pub enum BlobCategory {
    /// Machine code
    Code,
    /// Native pc to bytecode pc mapping table
    MappingTable,
    /// Register / stack slot to bytecode variable map
    VmapTable,
    /// GC root map
    GcMap,
    /// Call frame information for unwinding
    CallFrameInfo,
}

impl BlobCategory {
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BlobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Code => "code",
            Self::MappingTable => "mapping",
            Self::VmapTable => "vmap",
            Self::GcMap => "gc-map",
            Self::CallFrameInfo => "cfi",
        };
        f.write_str(name)
    }
}

/// Reference to a canonical blob inside a [`BlobStore`].
///
/// Two handles are equal exactly when they were returned for byte-identical content of the same
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHandle {
    category: BlobCategory,
    index: usize,
}

impl BlobHandle {
    /// The category the blob was interned under.
    #[must_use]
    pub fn category(&self) -> BlobCategory {
        self.category
    }

    /// Position of the blob within its category, in first-interned order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.category, self.index)
    }
}

/// A canonical, immutable blob.
#[derive(Debug)]
pub struct DeduplicatedBlob {
    bytes: Box<[u8]>,
    hash: u64,
    offset: OnceLock<u32>,
}

impl DeduplicatedBlob {
    fn new(bytes: &[u8], hash: u64) -> Self {
        Self {
            bytes: bytes.into(),
            hash,
            offset: OnceLock::new(),
        }
    }

    /// The canonical bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The deduplication hash of the bytes.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The offset the writer laid this blob out at, once known.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset.get().copied()
    }
}

/// One category's worth of interned blobs.
#[derive(Debug)]
pub struct DedupeSet {
    buckets: DashMap<u64, Vec<usize>, FxBuildHasher>,
    blobs: boxcar::Vec<DeduplicatedBlob>,
    interned: AtomicUsize,
}

impl Default for DedupeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::with_hasher(FxBuildHasher),
            blobs: boxcar::Vec::new(),
            interned: AtomicUsize::new(0),
        }
    }

    /// Interns `bytes` and returns the index of the canonical copy.
    pub fn intern(&self, bytes: &[u8]) -> usize {
        self.interned.fetch_add(1, Ordering::Relaxed);

        let hash = hash_blob(bytes);
        // The entry guard keeps the shard locked until the new index is in the bucket
        let mut bucket = self.buckets.entry(hash).or_default();
        for &index in bucket.iter() {
            if let Some(blob) = self.blobs.get(index) {
                if *blob.bytes == *bytes {
                    return index;
                }
            }
        }

        let index = self.blobs.push(DeduplicatedBlob::new(bytes, hash));
        bucket.push(index);
        index
    }

    /// Returns the canonical blob at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DeduplicatedBlob> {
        self.blobs.get(index)
    }

    /// Number of distinct blobs stored.
    #[must_use]
    pub fn unique_count(&self) -> usize {
        self.blobs.count()
    }

    /// Number of intern calls, duplicates included.
    #[must_use]
    pub fn intern_count(&self) -> usize {
        self.interned.load(Ordering::Relaxed)
    }

    /// Total size of the distinct blobs in bytes.
    #[must_use]
    pub fn unique_bytes(&self) -> usize {
        self.blobs.iter().map(|(_, blob)| blob.bytes.len()).sum()
    }
}

/// Per-category deduplication counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeStats {
    /// The category these numbers describe
    pub category: BlobCategory,
    /// Number of intern calls
    pub interned: usize,
    /// Number of distinct blobs kept
    pub unique: usize,
    /// Size of the distinct blobs in bytes
    pub unique_bytes: usize,
}

/// Interned artifacts of a compilation run, one [`DedupeSet`] per [`BlobCategory`].
#[derive(Debug)]
pub struct BlobStore {
    sets: [DedupeSet; BlobCategory::COUNT],
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: std::array::from_fn(|_| DedupeSet::new()),
        }
    }

    /// Interns `bytes` under `category`.
    ///
    /// Returns the handle of the canonical copy; equal bytes always yield equal handles.
    pub fn intern(&self, category: BlobCategory, bytes: &[u8]) -> BlobHandle {
        let index = self.sets[category.index()].intern(bytes);
        BlobHandle { category, index }
    }

    /// Returns the canonical blob behind `handle`.
    #[must_use]
    pub fn get(&self, handle: BlobHandle) -> Option<&DeduplicatedBlob> {
        self.sets[handle.category.index()].get(handle.index)
    }

    /// Returns the canonical bytes behind `handle`.
    #[must_use]
    pub fn bytes(&self, handle: BlobHandle) -> Option<&[u8]> {
        self.get(handle).map(DeduplicatedBlob::bytes)
    }

    /// Records the offset the writer placed the blob at.
    ///
    /// Assigning the same offset again is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlobNotFound`] for a handle from another store and
    /// [`Error::OffsetAlreadyAssigned`] if the blob was already placed elsewhere.
    pub fn assign_offset(&self, handle: BlobHandle, offset: u32) -> Result<()> {
        let blob = self.get(handle).ok_or(Error::BlobNotFound(handle))?;
        let assigned = *blob.offset.get_or_init(|| offset);
        if assigned == offset {
            Ok(())
        } else {
            Err(Error::OffsetAlreadyAssigned {
                handle,
                offset: assigned,
            })
        }
    }

    /// Returns the writer-assigned offset of a blob.
    #[must_use]
    pub fn offset(&self, handle: BlobHandle) -> Option<u32> {
        self.get(handle).and_then(DeduplicatedBlob::offset)
    }

    /// Iterates the canonical blobs of a category in first-interned order.
    pub fn iter(
        &self,
        category: BlobCategory,
    ) -> impl Iterator<Item = (BlobHandle, &DeduplicatedBlob)> + '_ {
        self.sets[category.index()]
            .blobs
            .iter()
            .map(move |(index, blob)| (BlobHandle { category, index }, blob))
    }

    /// Number of distinct blobs in a category.
    #[must_use]
    pub fn unique_count(&self, category: BlobCategory) -> usize {
        self.sets[category.index()].unique_count()
    }

    /// Deduplication counters for every category.
    #[must_use]
    pub fn stats(&self) -> Vec<DedupeStats> {
        BlobCategory::iter()
            .map(|category| {
                let set = &self.sets[category.index()];
                DedupeStats {
                    category,
                    interned: set.intern_count(),
                    unique: set.unique_count(),
                    unique_bytes: set.unique_bytes(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_equal_bytes_share_a_handle() {
        let store = BlobStore::new();
        let a = store.intern(BlobCategory::Code, &[1, 2, 3, 4]);
        let b = store.intern(BlobCategory::Code, &[1, 2, 3, 4]);
        let c = store.intern(BlobCategory::Code, &[1, 2, 3, 5]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.unique_count(BlobCategory::Code), 2);
        assert_eq!(store.bytes(a), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_categories_are_independent() {
        let store = BlobStore::new();
        let code = store.intern(BlobCategory::Code, &[9; 8]);
        let gc_map = store.intern(BlobCategory::GcMap, &[9; 8]);

        assert_ne!(code, gc_map);
        assert_eq!(code.index(), 0);
        assert_eq!(gc_map.index(), 0);
        assert_eq!(store.unique_count(BlobCategory::Code), 1);
        assert_eq!(store.unique_count(BlobCategory::GcMap), 1);
        assert_eq!(store.unique_count(BlobCategory::VmapTable), 0);
    }

    #[test]
    fn test_hash_collision_keeps_both_blobs() {
        // Byte 1 of a 100 byte blob is not sampled, both blobs share a hash
        let a = vec![0x11u8; 100];
        let mut b = a.clone();
        b[1] = 0x22;
        assert_eq!(hash_blob(&a), hash_blob(&b));

        let store = BlobStore::new();
        let ha = store.intern(BlobCategory::Code, &a);
        let hb = store.intern(BlobCategory::Code, &b);

        assert_ne!(ha, hb);
        assert_eq!(store.bytes(ha), Some(a.as_slice()));
        assert_eq!(store.bytes(hb), Some(b.as_slice()));
        assert_eq!(store.intern(BlobCategory::Code, &b), hb);
    }

    #[test]
    fn test_empty_blob() {
        let store = BlobStore::new();
        let a = store.intern(BlobCategory::CallFrameInfo, &[]);
        let b = store.intern(BlobCategory::CallFrameInfo, &[]);
        assert_eq!(a, b);
        assert_eq!(store.bytes(a), Some(&[][..]));
    }

    #[test]
    fn test_concurrent_intern_dedupes() {
        let store = Arc::new(BlobStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..64u8)
                        .map(|i| store.intern(BlobCategory::Code, &[i; 32]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<BlobHandle>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
        assert_eq!(store.unique_count(BlobCategory::Code), 64);

        let stats = store.stats();
        let code = stats
            .iter()
            .find(|s| s.category == BlobCategory::Code)
            .unwrap();
        assert_eq!(code.interned, 8 * 64);
        assert_eq!(code.unique, 64);
        assert_eq!(code.unique_bytes, 64 * 32);
    }

    #[test]
    fn test_assign_offset_once() {
        let store = BlobStore::new();
        let handle = store.intern(BlobCategory::MappingTable, &[7, 7, 7]);
        assert_eq!(store.offset(handle), None);

        store.assign_offset(handle, 0x100).unwrap();
        store.assign_offset(handle, 0x100).unwrap();
        assert_eq!(store.offset(handle), Some(0x100));

        let err = store.assign_offset(handle, 0x200).unwrap_err();
        assert!(matches!(
            err,
            Error::OffsetAlreadyAssigned { offset: 0x100, .. }
        ));
    }

    #[test]
    fn test_iter_in_intern_order() {
        let store = BlobStore::new();
        store.intern(BlobCategory::VmapTable, &[3]);
        store.intern(BlobCategory::VmapTable, &[1]);
        store.intern(BlobCategory::VmapTable, &[3]);

        let bytes: Vec<&[u8]> = store
            .iter(BlobCategory::VmapTable)
            .map(|(_, blob)| blob.bytes())
            .collect();
        assert_eq!(bytes, vec![&[3u8][..], &[1u8][..]]);
    }
}
