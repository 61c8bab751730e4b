//! Section table recovery from a mapped PE image.

use tracing::debug;

use super::{ModuleImage, Section};
use crate::error::{Error, Result};
use crate::memory::ReadMemory;

const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const E_LFANEW: u64 = 0x3C;
const COFF_HEADER_SIZE: u64 = 20;
const SIZE_OF_IMAGE: u64 = 56;
const SECTION_HEADER_SIZE: usize = 40;
const MAX_SECTIONS: u16 = 96;

impl ModuleImage {
    /// Read the PE headers of a module mapped at `base` and build its image.
    pub fn from_pe_headers<R: ReadMemory + ?Sized>(
        reader: &R,
        name: impl Into<String>,
        base: u64,
    ) -> Result<Self> {
        let name = name.into();

        if reader.read_u16(base)? != DOS_MAGIC {
            return Err(Error::InvalidImage(format!("{} has no MZ header", name)));
        }

        let at = |from: u64, by: u64| {
            from.checked_add(by).ok_or_else(|| {
                Error::InvalidImage(format!(
                    "{} header offset {:#x}+{:#x} overflows the address space",
                    name, from, by
                ))
            })
        };

        let nt = at(base, reader.read_u32(at(base, E_LFANEW)?)? as u64)?;
        if reader.read_u32(nt)? != NT_SIGNATURE {
            return Err(Error::InvalidImage(format!("{} has no PE signature", name)));
        }

        let coff = at(nt, 4)?;
        let section_count = reader.read_u16(at(coff, 2)?)?;
        let optional_size = reader.read_u16(at(coff, 16)?)? as u64;
        if section_count > MAX_SECTIONS {
            return Err(Error::InvalidImage(format!(
                "{} declares {} sections",
                name, section_count
            )));
        }

        let optional = at(coff, COFF_HEADER_SIZE)?;
        let size_of_image = reader.read_u32(at(optional, SIZE_OF_IMAGE)?)? as u64;

        let table = reader.read_bytes(
            at(optional, optional_size)?,
            section_count as usize * SECTION_HEADER_SIZE,
        )?;
        let sections = table
            .chunks_exact(SECTION_HEADER_SIZE)
            .map(parse_section_header)
            .collect::<Vec<_>>();

        debug!(
            "Parsed {} sections for {} (size of image {:#x})",
            sections.len(),
            name,
            size_of_image
        );

        ModuleImage::new(name, base, size_of_image, sections)
    }
}

fn parse_section_header(raw: &[u8]) -> Section {
    let name_len = raw[..8].iter().position(|&b| b == 0).unwrap_or(8);
    let name = String::from_utf8_lossy(&raw[..name_len]).into_owned();

    let field = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
    let virtual_size = field(8);
    let virtual_address = field(12);
    let raw_size = field(16);

    let length = if virtual_size == 0 { raw_size } else { virtual_size };
    Section::new(name, virtual_address as u64, length as u64)
}
