//! Scan command implementation.

use std::path::Path;

use addrscan::{CompiledSignature, ScanConfig, Scanner, SearchExtent, SectionKind};
use anyhow::Result;

use super::hex_utils::format_with_offset;
use super::{describe_image, load_image, module_name};

/// Find matches of `pattern` in a dump. With `nth`, only that match.
pub fn find_matches(
    image_path: &Path,
    base: u64,
    pattern: &str,
    section: Option<SectionKind>,
    nth: Option<usize>,
    config: ScanConfig,
) -> Result<Vec<u64>> {
    let sig = CompiledSignature::parse(pattern)?;
    let buffer = load_image(image_path, base)?;
    let image = describe_image(&buffer, &module_name(image_path, None))?;
    let scanner = Scanner::with_config(&image, &buffer, config);

    let extent = section.map_or(SearchExtent::Module, SearchExtent::Section);
    let matches = match nth {
        Some(n) => vec![scanner.scan_nth(&extent, &sig, n)?],
        None => scanner.scan_all(&extent, &sig)?,
    };
    Ok(matches)
}

/// Run the scan command
pub fn run(
    image_path: &Path,
    base: u64,
    pattern: &str,
    section: Option<SectionKind>,
    nth: Option<usize>,
    config: ScanConfig,
) -> Result<()> {
    let matches = find_matches(image_path, base, pattern, section, nth, config)?;

    if matches.is_empty() {
        println!("No matches");
        return Ok(());
    }

    println!("Found {} match(es):", matches.len());
    for (i, address) in matches.iter().enumerate() {
        let index = nth.unwrap_or(i);
        println!("  [{}] {}", index, format_with_offset(*address, base));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dump() -> NamedTempFile {
        let mut bytes = vec![0u8; 0x300];
        bytes[0x20..0x24].copy_from_slice(&[0xE8, 0x11, 0x22, 0x90]);
        bytes[0x1F0..0x1F4].copy_from_slice(&[0xE8, 0x33, 0x44, 0x90]);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file
    }

    #[test]
    fn test_find_all_in_raw_dump() {
        let file = dump();
        let matches = find_matches(
            file.path(),
            0x1000,
            "E8 ?? ?? 90",
            None,
            None,
            ScanConfig { chunk_size: 0x40 },
        )
        .unwrap();
        assert_eq!(matches, vec![0x1020, 0x11F0]);
    }

    #[test]
    fn test_find_nth() {
        let file = dump();
        let matches = find_matches(
            file.path(),
            0x1000,
            "E8 ?? ?? 90",
            None,
            Some(1),
            ScanConfig::default(),
        )
        .unwrap();
        assert_eq!(matches, vec![0x11F0]);

        assert!(
            find_matches(file.path(), 0x1000, "E8 ?? ?? 90", None, Some(2), ScanConfig::default())
                .is_err()
        );
    }

    #[test]
    fn test_section_scan_needs_section_table() {
        let file = dump();
        let err = find_matches(
            file.path(),
            0x1000,
            "E8",
            Some(SectionKind::Code),
            None,
            ScanConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
