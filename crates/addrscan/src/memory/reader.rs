//! Memory access abstraction.
//!
//! Addresses are plain `u64` values in the target's address space. Nothing here
//! ever turns them into Rust pointers.

use crate::error::{Error, Result};

/// Read access to the address space a module is mapped in.
///
/// Implementations must be shareable across threads since resolvers may run in
/// parallel against the same reader.
pub trait ReadMemory: Send + Sync {
    /// Read exactly `size` bytes starting at `address`.
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u16(&self, address: u64) -> Result<u16> {
        let bytes = self.read_bytes(address, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(raw))
    }
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

/// A contiguous byte snapshot mapped at `base`.
///
/// Used for module dumps taken from disk and for building synthetic images.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    base: u64,
    bytes: Vec<u8>,
}

impl ByteBuffer {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ReadMemory for ByteBuffer {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let out_of_range = || Error::MemoryReadFailed {
            address,
            message: format!(
                "range of {} bytes is outside snapshot {:#x}..{:#x}",
                size,
                self.base,
                self.base.wrapping_add(self.bytes.len() as u64)
            ),
        };

        let start = address
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(out_of_range)?;
        let end = start.checked_add(size).ok_or_else(out_of_range)?;

        self.bytes
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(out_of_range)
    }
}
