//! Piece sizes and commitments.
//!
//! Sector payloads are built from pieces. Piece sizes come in two spaces:
//! the unpadded size of the raw bytes and the padded size after bit-padding
//! (127 bytes of data expand to 128 bytes on disk).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Size of a piece before padding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UnpaddedPieceSize(pub u64);

impl UnpaddedPieceSize {
    /// The padded on-disk size: one extra byte per 127 bytes of payload.
    pub fn padded(self) -> PaddedPieceSize {
        PaddedPieceSize(self.0 + self.0 / 127)
    }

    /// A valid unpadded size pads to a power of two of at least 128.
    pub fn validate(self) -> Result<(), TypesError> {
        self.padded().validate()
    }
}

/// Size of a piece after padding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PaddedPieceSize(pub u64);

impl PaddedPieceSize {
    /// The unpadded payload size.
    pub fn unpadded(self) -> UnpaddedPieceSize {
        UnpaddedPieceSize(self.0 - self.0 / 128)
    }

    /// A valid padded size is a power of two of at least 128.
    pub fn validate(self) -> Result<(), TypesError> {
        if self.0 < 128 || !self.0.is_power_of_two() {
            return Err(TypesError::InvalidPieceSize(self.0));
        }
        Ok(())
    }
}

/// Commitment to a piece of data or a replica: `blake3(data)` in this
/// implementation's commitment scheme.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment([u8; 32]);

impl Commitment {
    /// Commit to arbitrary data.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Commitment {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({self})")
    }
}

/// A piece written into a sector: its padded size and commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    /// Padded size of the piece.
    pub size: PaddedPieceSize,
    /// Commitment to the piece data.
    pub cid: Commitment,
}

/// Byte offset into a sector's unpadded payload space.
pub type UnpaddedByteIndex = u64;

/// A byte range within a sector's unpadded payload, e.g. the deal ranges
/// to keep unsealed when finalizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Start offset of the range.
    pub offset: UnpaddedByteIndex,
    /// Length of the range.
    pub size: UnpaddedPieceSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_roundtrip() {
        let unpadded = UnpaddedPieceSize(127);
        let padded = unpadded.padded();
        assert_eq!(padded, PaddedPieceSize(128));
        assert_eq!(padded.unpadded(), unpadded);
    }

    #[test]
    fn test_padded_validation() {
        assert!(PaddedPieceSize(128).validate().is_ok());
        assert!(PaddedPieceSize(2048).validate().is_ok());
        assert!(PaddedPieceSize(127).validate().is_err());
        assert!(PaddedPieceSize(129).validate().is_err());
        assert!(PaddedPieceSize(0).validate().is_err());
    }

    #[test]
    fn test_unpadded_validation() {
        assert!(UnpaddedPieceSize(127).validate().is_ok());
        assert!(UnpaddedPieceSize(254).validate().is_ok());
        assert!(UnpaddedPieceSize(100).validate().is_err());
    }

    #[test]
    fn test_commitment_deterministic() {
        let a = Commitment::from_data(b"piece data");
        let b = Commitment::from_data(b"piece data");
        assert_eq!(a, b);
        assert_ne!(a, Commitment::from_data(b"other data"));
    }

    #[test]
    fn test_commitment_display_is_hex() {
        let c = Commitment::from([0xabu8; 32]);
        assert_eq!(c.to_string(), "ab".repeat(32));
    }
}
