//! ID types for the wire protocol

use core::fmt;

/// Identifier of one processing core on the chip fabric
///
/// Command packets carry core ids as 16-bit words, so ids above
/// `u16::MAX` cannot appear on the wire; the stream layer rejects them
/// at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreId(pub u32);

impl CoreId {
    /// Create a new core ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Invalid core ID constant
    pub const INVALID: Self = Self(u32::MAX);

    /// Check if this is a valid core ID
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    /// True when the id fits the 16-bit wire representation
    pub const fn fits_wire(&self) -> bool {
        self.0 <= u16::MAX as u32
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Identifier of an SDRAM region on a core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionId(pub u8);

impl RegionId {
    /// Create a new region ID
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_id() {
        let id = CoreId::new(7);
        assert_eq!(id.raw(), 7);
        assert!(id.is_valid());
        assert!(id.fits_wire());
        assert_eq!(format!("{}", id), "C7");
    }

    #[test]
    fn test_core_id_wire_bounds() {
        assert!(CoreId::new(u16::MAX as u32).fits_wire());
        assert!(!CoreId::new(u16::MAX as u32 + 1).fits_wire());
        assert!(!CoreId::INVALID.is_valid());
    }

    #[test]
    fn test_region_id_display() {
        assert_eq!(format!("{}", RegionId::new(3)), "R3");
    }
}
