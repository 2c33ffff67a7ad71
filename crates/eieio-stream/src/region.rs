//! Per-core on-chip buffer region descriptor
//!
//! A region tracks the bounded memory window a core reserves for
//! in-flight event data. `used_bytes` moves only through [`reserve`]
//! and [`release`], both called exclusively by the buffer manager, so
//! the `0 <= used_bytes <= capacity_bytes` invariant can only be
//! broken by a logic error, never by wire traffic.
//!
//! [`reserve`]: BufferRegion::reserve
//! [`release`]: BufferRegion::release

use eieio_wire::RegionId;

use crate::error::{Result, StreamError};

/// On-chip buffer metadata for one registered core
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferRegion {
    /// SDRAM region id on the core
    pub region_id: RegionId,
    /// Base address of the region in the core's SDRAM
    pub base_address: u32,
    /// Total region capacity in bytes
    capacity_bytes: u32,
    /// Bytes currently occupied by in-flight data
    used_bytes: u32,
    /// Free-space level below which the host pauses sending
    low_watermark: u32,
}

impl BufferRegion {
    /// Create a new, empty region
    pub fn new(region_id: RegionId, base_address: u32, capacity_bytes: u32, low_watermark: u32) -> Self {
        Self {
            region_id,
            base_address,
            capacity_bytes,
            used_bytes: 0,
            low_watermark,
        }
    }

    /// Region capacity in bytes
    pub fn capacity_bytes(&self) -> u32 {
        self.capacity_bytes
    }

    /// Bytes currently in use
    pub fn used_bytes(&self) -> u32 {
        self.used_bytes
    }

    /// Bytes currently free
    pub fn free_bytes(&self) -> u32 {
        self.capacity_bytes - self.used_bytes
    }

    /// Low watermark on free space
    pub fn low_watermark(&self) -> u32 {
        self.low_watermark
    }

    /// True when free space has fallen under the low watermark
    pub fn below_low_watermark(&self) -> bool {
        self.free_bytes() < self.low_watermark
    }

    /// Account for `n_bytes` of data sent to the core
    pub fn reserve(&mut self, n_bytes: u32) -> Result<()> {
        if n_bytes > self.free_bytes() {
            return Err(StreamError::InsufficientSpace {
                requested: n_bytes,
                free: self.free_bytes(),
                capacity: self.capacity_bytes,
            });
        }
        self.used_bytes += n_bytes;
        Ok(())
    }

    /// Account for `n_bytes` the core has consumed
    pub fn release(&mut self, n_bytes: u32) -> Result<()> {
        if n_bytes > self.used_bytes {
            return Err(StreamError::OverRelease {
                released: n_bytes,
                used: self.used_bytes,
            });
        }
        self.used_bytes -= n_bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(capacity: u32) -> BufferRegion {
        BufferRegion::new(RegionId::new(1), 0x6000_0000, capacity, 0)
    }

    #[test]
    fn test_reserve_release() {
        let mut r = region(256);
        assert_eq!(r.free_bytes(), 256);

        r.reserve(100).unwrap();
        assert_eq!(r.used_bytes(), 100);
        assert_eq!(r.free_bytes(), 156);

        r.release(40).unwrap();
        assert_eq!(r.used_bytes(), 60);
    }

    #[test]
    fn test_insufficient_space() {
        let mut r = region(256);
        r.reserve(200).unwrap();
        let err = r.reserve(57).unwrap_err();
        assert!(matches!(err, StreamError::InsufficientSpace { .. }));
        assert!(err.is_invariant_violation());
        // Accounting untouched by the failed reservation
        assert_eq!(r.used_bytes(), 200);
    }

    #[test]
    fn test_over_release() {
        let mut r = region(256);
        r.reserve(10).unwrap();
        let err = r.release(11).unwrap_err();
        assert!(matches!(err, StreamError::OverRelease { .. }));
        assert_eq!(r.used_bytes(), 10);
    }

    #[test]
    fn test_full_capacity_reservation() {
        let mut r = region(64);
        r.reserve(64).unwrap();
        assert_eq!(r.free_bytes(), 0);
        r.release(64).unwrap();
        assert_eq!(r.used_bytes(), 0);
    }

    #[test]
    fn test_low_watermark() {
        let mut r = BufferRegion::new(RegionId::new(0), 0, 256, 64);
        assert!(!r.below_low_watermark());
        r.reserve(200).unwrap();
        assert!(r.below_low_watermark());
        r.release(100).unwrap();
        assert!(!r.below_low_watermark());
    }
}
