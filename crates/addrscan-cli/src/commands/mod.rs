//! CLI command implementations.
//!
//! Every command works on a raw module dump: file offset 0 is the module base.

pub mod builtin;
pub mod compile;
pub mod hex_utils;
pub mod resolve;
pub mod scan;

use std::path::Path;

use addrscan::{ByteBuffer, ModuleImage};
use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Load a module dump so reads at `base + offset` hit file byte `offset`.
pub fn load_image(path: &Path, base: u64) -> Result<ByteBuffer> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    debug!("Loaded {} bytes from {}", bytes.len(), path.display());
    Ok(ByteBuffer::new(base, bytes))
}

/// Module name for a dump: explicit, or the file name.
pub fn module_name(path: &Path, explicit: Option<&str>) -> String {
    explicit.map(str::to_string).unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    })
}

/// Module description for a dump, from its PE headers when it has them.
///
/// Raw dumps without headers are treated as one section-less module spanning
/// the whole file, so only whole-module scans work on them.
pub fn describe_image(buffer: &ByteBuffer, name: &str) -> Result<ModuleImage> {
    match ModuleImage::from_pe_headers(buffer, name, buffer.base()) {
        Ok(image) => Ok(image),
        Err(e) => {
            warn!("{}: {}; treating dump as a raw module", name, e);
            Ok(ModuleImage::new(
                name,
                buffer.base(),
                buffer.len() as u64,
                Vec::new(),
            )?)
        }
    }
}
