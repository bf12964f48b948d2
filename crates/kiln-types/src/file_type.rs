//! The sector-file bit-flag algebra.
//!
//! Every sector is materialized as up to five artifact kinds (unsealed
//! data, sealed replica, seal cache, update replica, update cache). Masks
//! over these kinds drive both "files that must already exist" and "files
//! to be produced" throughout the pipeline, as well as the per-file-type
//! read/write lock granularity.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::proof::SectorSize;
use crate::storage::PathType;

/// A set of sector file types, combinable via union/intersection.
///
/// The empty set is a valid mask (`SectorFileType::NONE`); public APIs
/// never traffic in the raw integer representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SectorFileType(u32);

impl SectorFileType {
    /// The empty mask.
    pub const NONE: Self = Self(0);
    /// Raw (unsealed) sector data.
    pub const UNSEALED: Self = Self(1 << 0);
    /// The sealed replica.
    pub const SEALED: Self = Self(1 << 1);
    /// The seal cache directory (merkle tree layers, aux files).
    pub const CACHE: Self = Self(1 << 2);
    /// The updated replica (snap deal).
    pub const UPDATE: Self = Self(1 << 3);
    /// The update cache directory.
    pub const UPDATE_CACHE: Self = Self(1 << 4);

    /// All primitive (single-bit) file types, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::UNSEALED,
        Self::SEALED,
        Self::CACHE,
        Self::UPDATE,
        Self::UPDATE_CACHE,
    ];

    /// Union of two masks.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection of two masks.
    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// The types in `self` that are not in `other`.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether every type in `other` is present in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the two masks share any type.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the mask is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the mask names exactly one file type.
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    /// Number of file types in the mask.
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the single-bit types present in this mask.
    pub fn iter(self) -> impl Iterator<Item = SectorFileType> {
        Self::ALL.into_iter().filter(move |t| self.contains(*t))
    }

    /// Directory name for a single-bit file type.
    ///
    /// Artifacts live under a subdirectory with this name inside each
    /// storage path.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UNSEALED => "unsealed",
            Self::SEALED => "sealed",
            Self::CACHE => "cache",
            Self::UPDATE => "update",
            Self::UPDATE_CACHE => "update-cache",
            _ => "<invalid>",
        }
    }

    /// Whether this single-bit type is materialized as a directory
    /// rather than a flat file.
    pub fn is_directory(self) -> bool {
        matches!(self, Self::CACHE | Self::UPDATE_CACHE)
    }
}

impl BitOr for SectorFileType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for SectorFileType {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl fmt::Display for SectorFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for t in self.iter() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{}", t.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for SectorFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectorFileType({self})")
    }
}

impl FromStr for SectorFileType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsealed" => Ok(Self::UNSEALED),
            "sealed" => Ok(Self::SEALED),
            "cache" => Ok(Self::CACHE),
            "update" => Ok(Self::UPDATE),
            "update-cache" => Ok(Self::UPDATE_CACHE),
            other => Err(TypesError::InvalidFileType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Space overheads
// ---------------------------------------------------------------------------

/// Denominator for the overhead tables below.
pub const OVERHEAD_DENOMINATOR: u64 = 10;

/// Numerator of the on-disk overhead per file type while sealing,
/// relative to the sector size (over [`OVERHEAD_DENOMINATOR`]).
///
/// The cache is by far the largest: the merkle tree layers written during
/// pre-commit dominate. These ratios are tunable; they bound reservations,
/// not actual usage.
fn seal_overhead(t: SectorFileType) -> Option<u64> {
    match t {
        SectorFileType::UNSEALED => Some(10),
        SectorFileType::SEALED => Some(10),
        SectorFileType::CACHE => Some(141),
        SectorFileType::UPDATE => Some(20),
        SectorFileType::UPDATE_CACHE => Some(141),
        _ => None,
    }
}

/// Numerator of the on-disk overhead per file type once finalized
/// (tree layers pruned).
fn finalized_overhead(t: SectorFileType) -> Option<u64> {
    match t {
        SectorFileType::UNSEALED => Some(10),
        SectorFileType::SEALED => Some(10),
        SectorFileType::CACHE => Some(2),
        SectorFileType::UPDATE => Some(20),
        SectorFileType::UPDATE_CACHE => Some(2),
        _ => None,
    }
}

/// Disk space needed to hold the given file types for a sector of the
/// given size, in the given path role.
pub fn space_use(
    file_type: SectorFileType,
    sector_size: SectorSize,
    path_type: PathType,
) -> Result<u64, TypesError> {
    let mut total = 0u64;
    for t in file_type.iter() {
        let numerator = match path_type {
            PathType::Sealing => seal_overhead(t),
            PathType::Storage => finalized_overhead(t),
        }
        .ok_or(TypesError::UnknownOverhead(t))?;
        total += numerator * sector_size / OVERHEAD_DENOMINATOR;
    }
    Ok(total)
}

/// Disk space needed while sealing — the sizing used by allocation scoring.
pub fn seal_space_use(file_type: SectorFileType, sector_size: SectorSize) -> Result<u64, TypesError> {
    space_use(file_type, sector_size, PathType::Sealing)
}

// ---------------------------------------------------------------------------
// Per-file-type value map
// ---------------------------------------------------------------------------

/// A small map from single-bit [`SectorFileType`] to a value, used for
/// acquired paths and their backing storage ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileTypeMap<T> {
    unsealed: Option<T>,
    sealed: Option<T>,
    cache: Option<T>,
    update: Option<T>,
    update_cache: Option<T>,
}

impl<T> FileTypeMap<T> {
    /// An empty map.
    pub fn new() -> Self {
        Self {
            unsealed: None,
            sealed: None,
            cache: None,
            update: None,
            update_cache: None,
        }
    }

    fn slot(&self, t: SectorFileType) -> &Option<T> {
        match t {
            SectorFileType::UNSEALED => &self.unsealed,
            SectorFileType::SEALED => &self.sealed,
            SectorFileType::CACHE => &self.cache,
            SectorFileType::UPDATE => &self.update,
            SectorFileType::UPDATE_CACHE => &self.update_cache,
            _ => &None,
        }
    }

    /// Set the value for a single-bit file type. Masks with zero or
    /// multiple bits are ignored.
    pub fn set(&mut self, t: SectorFileType, value: T) {
        let slot = match t {
            SectorFileType::UNSEALED => &mut self.unsealed,
            SectorFileType::SEALED => &mut self.sealed,
            SectorFileType::CACHE => &mut self.cache,
            SectorFileType::UPDATE => &mut self.update,
            SectorFileType::UPDATE_CACHE => &mut self.update_cache,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Get the value for a single-bit file type.
    pub fn get(&self, t: SectorFileType) -> Option<&T> {
        self.slot(t).as_ref()
    }

    /// Whether a value is present for the given file type.
    pub fn has(&self, t: SectorFileType) -> bool {
        self.slot(t).is_some()
    }

    /// Iterate over `(file_type, value)` pairs that are present.
    pub fn iter(&self) -> impl Iterator<Item = (SectorFileType, &T)> {
        SectorFileType::ALL
            .into_iter()
            .filter_map(move |t| self.slot(t).as_ref().map(|v| (t, v)))
    }

    /// The mask of file types that have a value.
    pub fn types(&self) -> SectorFileType {
        SectorFileType::ALL
            .into_iter()
            .filter(|t| self.has(*t))
            .fold(SectorFileType::NONE, SectorFileType::union)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_contains() {
        let mask = SectorFileType::SEALED | SectorFileType::CACHE;
        assert!(mask.contains(SectorFileType::SEALED));
        assert!(mask.contains(SectorFileType::CACHE));
        assert!(!mask.contains(SectorFileType::UNSEALED));
        assert!(mask.contains(SectorFileType::SEALED | SectorFileType::CACHE));
        assert!(!mask.contains(SectorFileType::SEALED | SectorFileType::UNSEALED));
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = SectorFileType::UNSEALED;
        let b = SectorFileType::SEALED | SectorFileType::CACHE;
        assert!(a.intersect(b).is_empty());
        assert!(!a.intersects(b));
    }

    #[test]
    fn test_without() {
        let mask = SectorFileType::SEALED | SectorFileType::CACHE;
        assert_eq!(mask.without(SectorFileType::CACHE), SectorFileType::SEALED);
    }

    #[test]
    fn test_is_single() {
        assert!(SectorFileType::SEALED.is_single());
        assert!(!SectorFileType::NONE.is_single());
        assert!(!(SectorFileType::SEALED | SectorFileType::CACHE).is_single());
    }

    #[test]
    fn test_iter_yields_each_type_once() {
        let mask = SectorFileType::UNSEALED | SectorFileType::UPDATE_CACHE;
        let types: Vec<_> = mask.iter().collect();
        assert_eq!(
            types,
            vec![SectorFileType::UNSEALED, SectorFileType::UPDATE_CACHE]
        );
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(SectorFileType::CACHE.to_string(), "cache");
        assert_eq!(SectorFileType::UPDATE_CACHE.to_string(), "update-cache");
        for t in SectorFileType::ALL {
            let parsed: SectorFileType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("bogus".parse::<SectorFileType>().is_err());
    }

    #[test]
    fn test_seal_space_use_sums_types() {
        let size: SectorSize = 2048;
        let sealed = seal_space_use(SectorFileType::SEALED, size).unwrap();
        let cache = seal_space_use(SectorFileType::CACHE, size).unwrap();
        let both =
            seal_space_use(SectorFileType::SEALED | SectorFileType::CACHE, size).unwrap();
        assert_eq!(both, sealed + cache);
        // Cache dominates while sealing.
        assert!(cache > sealed);
    }

    #[test]
    fn test_finalized_cache_is_smaller() {
        let size: SectorSize = 2048;
        let sealing = space_use(SectorFileType::CACHE, size, PathType::Sealing).unwrap();
        let stored = space_use(SectorFileType::CACHE, size, PathType::Storage).unwrap();
        assert!(stored < sealing);
    }

    #[test]
    fn test_file_type_map() {
        let mut map = FileTypeMap::new();
        map.set(SectorFileType::SEALED, "a");
        map.set(SectorFileType::CACHE, "b");
        assert_eq!(map.get(SectorFileType::SEALED), Some(&"a"));
        assert_eq!(map.get(SectorFileType::UNSEALED), None);
        assert_eq!(map.types(), SectorFileType::SEALED | SectorFileType::CACHE);
        assert_eq!(map.iter().count(), 2);
    }
}
