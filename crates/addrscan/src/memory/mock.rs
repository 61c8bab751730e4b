//! Mock process memory for tests.
//!
//! Unlike [`ByteBuffer`](super::ByteBuffer) this can hold several disjoint
//! regions, so reads that cross into unmapped memory fail the way a real
//! process read would.

use std::collections::BTreeMap;

use super::ReadMemory;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct MockMemoryReader {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl ReadMemory for MockMemoryReader {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let region = self
            .regions
            .range(..=address)
            .next_back()
            .filter(|(base, data)| address < **base + data.len() as u64);

        if let Some((base, data)) = region {
            let start = (address - base) as usize;
            if let Some(bytes) = data.get(start..start + size) {
                return Ok(bytes.to_vec());
            }
        }

        Err(Error::MemoryReadFailed {
            address,
            message: format!("{} bytes not mapped", size),
        })
    }
}

#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `len` zero bytes at `address`.
    pub fn zeroed(mut self, address: u64, len: usize) -> Self {
        self.regions.insert(address, vec![0; len]);
        self
    }

    /// Overwrite bytes inside an already mapped region.
    pub fn write(mut self, address: u64, bytes: &[u8]) -> Self {
        if let Some((base, data)) = self.regions.range_mut(..=address).next_back() {
            let start = (address - *base) as usize;
            let end = start + bytes.len();
            if end <= data.len() {
                data[start..end].copy_from_slice(bytes);
                return self;
            }
        }
        panic!("write at {:#x} is outside mapped regions", address);
    }

    pub fn build(self) -> MockMemoryReader {
        MockMemoryReader {
            regions: self.regions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_fail_across_holes() {
        let reader = MockMemoryBuilder::new()
            .zeroed(0x1000, 0x100)
            .zeroed(0x2000, 0x100)
            .write(0x1010, &[0xAA, 0xBB])
            .build();

        assert_eq!(reader.read_bytes(0x1010, 2).unwrap(), vec![0xAA, 0xBB]);
        assert!(reader.read_bytes(0x10F0, 0x20).is_err());
        assert!(reader.read_bytes(0x1800, 1).is_err());
        assert!(reader.read_bytes(0x2000, 0x100).is_ok());
    }
}
