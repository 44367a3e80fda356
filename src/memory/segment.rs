//! Contiguous byte-addressed memory segment
//!
//! A [`Segment`] owns a range of virtual addresses starting at `base` and
//! hands out storage by bumping a high-water mark. The global segment never
//! releases storage; the stack segment releases back to a mark when a frame
//! is popped.
//!
//! Each byte carries an initialization bit so that scalar reads of storage
//! that was never written can be reported instead of returning garbage.

use super::value::Address;
use super::MemoryError;

/// Allocation granularity for every object in a segment
const ALIGN: usize = 8;

#[derive(Debug, Clone)]
pub struct Segment {
    name: &'static str,
    base: Address,
    capacity: usize,
    data: Vec<u8>,
    init_map: Vec<bool>, // Per-byte initialization tracking
}

impl Segment {
    pub fn new(name: &'static str, base: Address, capacity: usize) -> Self {
        Segment {
            name,
            base,
            capacity,
            data: Vec::new(),
            init_map: Vec::new(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    /// Bytes currently in use
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// Allocate `size` zeroed bytes. `initialized` controls whether reads
    /// before the first write are allowed.
    pub fn allocate(&mut self, size: usize, initialized: bool) -> Result<Address, MemoryError> {
        let start = self.data.len().div_ceil(ALIGN) * ALIGN;
        let end = start + size.max(1);
        if end > self.capacity {
            return Err(MemoryError::OutOfMemory {
                segment: self.name,
                requested: size,
                capacity: self.capacity,
            });
        }
        self.data.resize(end, 0);
        self.init_map.resize(start, false);
        self.init_map.resize(end, initialized);
        Ok(self.base + start as Address)
    }

    /// Release everything allocated after `mark` (a previous [`Segment::used`]).
    pub fn release_to(&mut self, mark: usize) {
        self.data.truncate(mark);
        self.init_map.truncate(mark);
    }

    pub fn contains(&self, address: Address, size: usize) -> bool {
        address >= self.base
            && (address - self.base) as usize + size <= self.data.len()
    }

    fn offset(&self, address: Address, size: usize) -> Result<usize, MemoryError> {
        if self.contains(address, size) {
            Ok((address - self.base) as usize)
        } else {
            Err(MemoryError::OutOfBounds { address, size })
        }
    }

    pub fn is_initialized(&self, address: Address, size: usize) -> bool {
        match self.offset(address, size) {
            Ok(offset) => self.init_map[offset..offset + size].iter().all(|&b| b),
            Err(_) => false,
        }
    }

    pub fn read_bytes(&self, address: Address, size: usize) -> Result<&[u8], MemoryError> {
        let offset = self.offset(address, size)?;
        Ok(&self.data[offset..offset + size])
    }

    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<(), MemoryError> {
        let offset = self.offset(address, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        for flag in &mut self.init_map[offset..offset + bytes.len()] {
            *flag = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_aligned_and_distinct() {
        let mut segment = Segment::new("globals", 0x1000, 64);
        let a = segment.allocate(1, true).unwrap();
        let b = segment.allocate(4, true).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x1008);
        assert!(segment.contains(b, 4));
        assert!(!segment.contains(b, 9));
    }

    #[test]
    fn test_out_of_memory() {
        let mut segment = Segment::new("stack", 0x2000, 16);
        segment.allocate(8, false).unwrap();
        assert!(matches!(
            segment.allocate(16, false),
            Err(MemoryError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_release_and_init_tracking() {
        let mut segment = Segment::new("stack", 0x2000, 64);
        let mark = segment.used();
        let addr = segment.allocate(4, false).unwrap();
        assert!(!segment.is_initialized(addr, 4));
        segment.write_bytes(addr, &[1, 0, 0, 0]).unwrap();
        assert!(segment.is_initialized(addr, 4));
        segment.release_to(mark);
        assert!(segment.read_bytes(addr, 4).is_err());
    }
}
