//! Signature scanning.
//!
//! The free functions work on byte slices and return indices. [`Scanner`] runs
//! them over a module's address range through a [`ReadMemory`], reading in
//! chunks and returning absolute addresses.

use std::ops::ControlFlow;

use memchr::memchr;
use tracing::debug;

use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::image::{ModuleImage, SearchExtent};
use crate::memory::ReadMemory;
use crate::signature::CompiledSignature;

/// Lowest index `>= from` where `sig` matches.
pub fn find(haystack: &[u8], sig: &CompiledSignature, from: usize) -> Option<usize> {
    let last_start = haystack.len().checked_sub(sig.len())?;
    if from > last_start {
        return None;
    }

    let Some((lead, byte)) = sig.first_literal() else {
        // All wildcards: the first window that fits.
        return Some(from);
    };

    let mut cursor = from + lead;
    while cursor <= last_start + lead {
        let hit = cursor + memchr(byte, &haystack[cursor..=last_start + lead])?;
        let start = hit - lead;
        if sig.matches_at(haystack, start) {
            return Some(start);
        }
        cursor = hit + 1;
    }
    None
}

/// Every match start, in increasing order. Overlapping matches are all reported.
pub fn find_all(haystack: &[u8], sig: &CompiledSignature) -> Vec<usize> {
    let mut results = Vec::new();
    let mut from = 0;
    while let Some(index) = find(haystack, sig, from) {
        results.push(index);
        from = index + 1;
    }
    results
}

/// The `n`th match (zero based) in increasing order.
pub fn find_nth(haystack: &[u8], sig: &CompiledSignature, n: usize) -> Option<usize> {
    let mut from = 0;
    let mut seen = 0;
    while let Some(index) = find(haystack, sig, from) {
        if seen == n {
            return Some(index);
        }
        seen += 1;
        from = index + 1;
    }
    None
}

/// Closest match before `anchor` whose last byte lies in `[anchor - window, anchor)`.
///
/// Candidates are checked from the anchor backwards. Returns the match start.
pub fn rfind_within(
    haystack: &[u8],
    anchor: usize,
    window: usize,
    sig: &CompiledSignature,
) -> Option<usize> {
    let len = sig.len();
    let lowest_end = anchor.saturating_sub(window).max(len - 1);
    let highest_end = anchor.min(haystack.len()).checked_sub(1)?;

    (lowest_end..=highest_end)
        .rev()
        .map(|end| end + 1 - len)
        .find(|&start| sig.matches_at(haystack, start))
}

/// Scans one module through a memory reader.
pub struct Scanner<'a, R: ReadMemory + ?Sized> {
    image: &'a ModuleImage,
    reader: &'a R,
    config: ScanConfig,
}

impl<'a, R: ReadMemory + ?Sized> Scanner<'a, R> {
    pub fn new(image: &'a ModuleImage, reader: &'a R) -> Self {
        Self::with_config(image, reader, ScanConfig::default())
    }

    pub fn with_config(image: &'a ModuleImage, reader: &'a R, config: ScanConfig) -> Self {
        Self {
            image,
            reader,
            config,
        }
    }

    pub fn image(&self) -> &ModuleImage {
        self.image
    }

    pub fn reader(&self) -> &R {
        self.reader
    }

    /// Absolute address of the first match in `extent`.
    pub fn scan(&self, extent: &SearchExtent, sig: &CompiledSignature) -> Result<u64> {
        self.scan_nth(extent, sig, 0)
    }

    /// Absolute address of the `n`th match (zero based) in `extent`.
    pub fn scan_nth(
        &self,
        extent: &SearchExtent,
        sig: &CompiledSignature,
        n: usize,
    ) -> Result<u64> {
        let (start, end) = self.image.extent_range(extent)?;
        let mut seen = 0;
        let mut found = None;

        self.for_each_match(start, end, sig, |address| {
            if seen == n {
                found = Some(address);
                return ControlFlow::Break(());
            }
            seen += 1;
            ControlFlow::Continue(())
        })?;

        match found {
            Some(address) => {
                debug!(
                    "Matched '{}' at {:#x} (+{:#x}) in {}",
                    sig,
                    address,
                    address - self.image.base_address(),
                    extent
                );
                Ok(address)
            }
            None => Err(self.not_found(sig, &self.describe(extent, start, end))),
        }
    }

    /// Absolute addresses of every match in `extent`.
    pub fn scan_all(&self, extent: &SearchExtent, sig: &CompiledSignature) -> Result<Vec<u64>> {
        let (start, end) = self.image.extent_range(extent)?;
        let mut results = Vec::new();
        self.for_each_match(start, end, sig, |address| {
            results.push(address);
            ControlFlow::Continue(())
        })?;
        Ok(results)
    }

    /// Search backwards from `anchor` for a match ending within `window` bytes
    /// before it. Used to find a function entry from a call site inside it.
    pub fn scan_reversed(&self, anchor: u64, window: u64, sig: &CompiledSignature) -> Result<u64> {
        let base = self.image.base_address();
        let extent = format!(
            "{} [{:#x} - {:#x}, {:#x})",
            self.image.name(),
            anchor,
            window,
            anchor
        );

        if anchor < base || anchor > self.image.end_address() {
            return Err(self.not_found(sig, &format!("{} (anchor outside module)", extent)));
        }

        let reach = window.saturating_add(sig.len() as u64 - 1);
        let low = anchor.saturating_sub(reach).max(base);
        let buffer = self.reader.read_bytes(low, (anchor - low) as usize)?;

        let local_anchor = buffer.len();
        let window = usize::try_from(window).unwrap_or(usize::MAX);
        rfind_within(&buffer, local_anchor, window, sig)
            .map(|index| low + index as u64)
            .ok_or_else(|| self.not_found(sig, &extent))
    }

    /// Feed every match in `[start, end)` to `visit` in increasing order.
    ///
    /// The range is read in chunks, carrying `len - 1` bytes between chunks so
    /// matches straddling a boundary are still seen. Any failed read aborts.
    fn for_each_match<F>(
        &self,
        start: u64,
        end: u64,
        sig: &CompiledSignature,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        let chunk_size = self.config.chunk_size.max(sig.len());
        let keep = sig.len() - 1;
        let mut tail: Vec<u8> = Vec::new();
        let mut address = start;

        while address < end {
            let read_size = ((end - address) as usize).min(chunk_size);
            let chunk = self.reader.read_bytes(address, read_size)?;

            let mut data = Vec::with_capacity(tail.len() + chunk.len());
            data.extend_from_slice(&tail);
            data.extend_from_slice(&chunk);
            let data_base = address - tail.len() as u64;

            let mut from = 0;
            while let Some(index) = find(&data, sig, from) {
                if visit(data_base + index as u64).is_break() {
                    return Ok(());
                }
                from = index + 1;
            }

            tail = data[data.len().saturating_sub(keep)..].to_vec();
            address += read_size as u64;
        }

        Ok(())
    }

    fn describe(&self, extent: &SearchExtent, start: u64, end: u64) -> String {
        format!("{} {} [{:#x}..{:#x})", self.image.name(), extent, start, end)
    }

    fn not_found(&self, sig: &CompiledSignature, extent: &str) -> Error {
        Error::SignatureNotFound {
            pattern: sig.to_string(),
            extent: extent.to_string(),
        }
    }
}
