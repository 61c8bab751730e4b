//! Loaded module descriptions.
//!
//! A [`ModuleImage`] is a snapshot of where a module sits in the target's
//! address space and how its sections are laid out. It never holds the module's
//! bytes; scans go through a [`ReadMemory`](crate::memory::ReadMemory).

mod pe;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{Error, Result};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SectionKind {
    Code,
    Data,
    ReadOnlyData,
    Other,
}

impl SectionKind {
    /// Classify a section by its conventional name.
    pub fn from_section_name(name: &str) -> Self {
        match name {
            ".text" => Self::Code,
            ".data" => Self::Data,
            ".rdata" => Self::ReadOnlyData,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    /// Offset from the module base.
    pub start: u64,
    pub length: u64,
    pub kind: SectionKind,
}

impl Section {
    pub fn new(name: impl Into<String>, start: u64, length: u64) -> Self {
        let name = name.into();
        let kind = SectionKind::from_section_name(&name);
        Self {
            name,
            start,
            length,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleImage {
    name: String,
    base_address: u64,
    size: u64,
    sections: Vec<Section>,
}

impl ModuleImage {
    /// Build an image from a host-supplied descriptor.
    ///
    /// Every section must lie inside `[0, size)`.
    pub fn new(
        name: impl Into<String>,
        base_address: u64,
        size: u64,
        sections: Vec<Section>,
    ) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(Error::InvalidImage(format!("module {} has zero size", name)));
        }
        if base_address.checked_add(size).is_none() {
            return Err(Error::InvalidImage(format!(
                "module {} at {:#x} with size {:#x} overflows the address space",
                name, base_address, size
            )));
        }
        for section in &sections {
            let end = section.start.checked_add(section.length);
            if end.is_none_or(|end| end > size) {
                return Err(Error::InvalidImage(format!(
                    "section {} ({:#x}+{:#x}) exceeds module {} size {:#x}",
                    section.name, section.start, section.length, name, size
                )));
            }
        }

        Ok(Self {
            name,
            base_address,
            size,
            sections,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end_address(&self) -> u64 {
        self.base_address + self.size
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section of the given kind.
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// Absolute address range `[start, end)` of a search extent.
    pub fn extent_range(&self, extent: &SearchExtent) -> Result<(u64, u64)> {
        let section = match extent {
            SearchExtent::Module => return Ok((self.base_address, self.end_address())),
            SearchExtent::Section(kind) => self.section(*kind),
            SearchExtent::NamedSection(name) => self.section_by_name(name),
        };

        let section = section.ok_or_else(|| Error::SectionNotFound {
            module: self.name.clone(),
            section: extent.to_string(),
        })?;
        let start = self.base_address + section.start;
        Ok((start, start + section.length))
    }
}

/// Where in a module a signature is searched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchExtent {
    #[default]
    Module,
    Section(SectionKind),
    NamedSection(String),
}

impl fmt::Display for SearchExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => f.write_str("whole module"),
            Self::Section(kind) => write!(f, "{} section", kind),
            Self::NamedSection(name) => write!(f, "section '{}'", name),
        }
    }
}

/// Host facility that knows which modules are loaded.
pub trait ModuleProvider {
    fn find_module(&self, name: &str) -> Result<ModuleImage>;
}

/// The modules available to a resolution pass.
///
/// The first module is the primary one: resolvers that don't name a module
/// scan it.
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    modules: Vec<ModuleImage>,
}

impl ModuleTable {
    pub fn new(modules: Vec<ModuleImage>) -> Self {
        Self { modules }
    }

    pub fn single(image: ModuleImage) -> Self {
        Self {
            modules: vec![image],
        }
    }

    /// Capture the primary module and any secondary modules from a provider.
    ///
    /// The primary module is required. Secondary modules the provider can't
    /// find are skipped; resolvers depending on them fail with
    /// `ModuleNotFound` during resolution.
    pub fn capture<P: ModuleProvider>(
        provider: &P,
        primary: &str,
        secondary: &[&str],
    ) -> Result<Self> {
        let mut modules = vec![provider.find_module(primary)?];
        for name in secondary {
            match provider.find_module(name) {
                Ok(image) => modules.push(image),
                Err(e) => tracing::warn!("Module {} unavailable: {}", name, e),
            }
        }
        Ok(Self { modules })
    }

    pub fn primary(&self) -> Option<&ModuleImage> {
        self.modules.first()
    }

    /// Look up a module by case-insensitive name, or the primary module for `None`.
    pub fn get(&self, name: Option<&str>) -> Result<&ModuleImage> {
        match name {
            Some(name) => self
                .modules
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::ModuleNotFound(name.to_string())),
            None => self
                .primary()
                .ok_or_else(|| Error::ModuleNotFound("<primary>".to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleImage> {
        self.modules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> ModuleImage {
        ModuleImage::new(
            "game.exe",
            0x1_4000_0000,
            0x5000,
            vec![
                Section::new(".text", 0x1000, 0x2000),
                Section::new(".rdata", 0x3000, 0x1000),
                Section::new(".data", 0x4000, 0x800),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_section_kind_from_name() {
        assert_eq!(SectionKind::from_section_name(".text"), SectionKind::Code);
        assert_eq!(SectionKind::from_section_name(".data"), SectionKind::Data);
        assert_eq!(
            SectionKind::from_section_name(".rdata"),
            SectionKind::ReadOnlyData
        );
        assert_eq!(SectionKind::from_section_name(".reloc"), SectionKind::Other);
        assert_eq!(
            "read_only_data".parse::<SectionKind>().unwrap(),
            SectionKind::ReadOnlyData
        );
    }

    #[test]
    fn test_extent_ranges() {
        let image = sample_image();
        assert_eq!(
            image.extent_range(&SearchExtent::Module).unwrap(),
            (0x1_4000_0000, 0x1_4000_5000)
        );
        assert_eq!(
            image
                .extent_range(&SearchExtent::Section(SectionKind::Code))
                .unwrap(),
            (0x1_4000_1000, 0x1_4000_3000)
        );
        assert_eq!(
            image
                .extent_range(&SearchExtent::NamedSection(".data".into()))
                .unwrap(),
            (0x1_4000_4000, 0x1_4000_4800)
        );
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let image = sample_image();
        let err = image
            .extent_range(&SearchExtent::Section(SectionKind::Other))
            .unwrap_err();
        assert!(matches!(err, Error::SectionNotFound { .. }));
    }

    #[test]
    fn test_rejects_sections_outside_module() {
        let result = ModuleImage::new(
            "bad.dll",
            0x1000,
            0x100,
            vec![Section::new(".text", 0x80, 0x100)],
        );
        assert!(matches!(result, Err(Error::InvalidImage(_))));
        assert!(ModuleImage::new("empty.dll", 0x1000, 0, vec![]).is_err());
    }

    #[test]
    fn test_module_table_lookup() {
        let dxgi = ModuleImage::new("dxgi.dll", 0x7ff0_0000, 0x1000, vec![]).unwrap();
        let table = ModuleTable::new(vec![sample_image(), dxgi]);

        assert_eq!(table.get(None).unwrap().name(), "game.exe");
        assert_eq!(table.get(Some("DXGI.dll")).unwrap().base_address(), 0x7ff0_0000);
        assert!(matches!(
            table.get(Some("d3d11.dll")),
            Err(Error::ModuleNotFound(_))
        ));
        assert!(ModuleTable::default().get(None).is_err());
    }

    struct FixedProvider(Vec<ModuleImage>);

    impl ModuleProvider for FixedProvider {
        fn find_module(&self, name: &str) -> Result<ModuleImage> {
            self.0
                .iter()
                .find(|m| m.name() == name)
                .cloned()
                .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
        }
    }

    #[test]
    fn test_capture_requires_primary_only() {
        let provider = FixedProvider(vec![sample_image()]);

        let table = ModuleTable::capture(&provider, "game.exe", &["dxgi.dll"]).unwrap();
        assert_eq!(table.iter().count(), 1);
        assert_eq!(table.primary().unwrap().name(), "game.exe");

        assert!(matches!(
            ModuleTable::capture(&provider, "other.exe", &[]),
            Err(Error::ModuleNotFound(_))
        ));
    }
}
