use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use super::ResolverRegistry;
use crate::error::Result;
use crate::image::ModuleTable;
use crate::resolver::FieldState;

/// Resolved address table for diagnostic purposes
#[derive(Debug, Clone, Serialize)]
pub struct AddressTableDump {
    pub generated_at: DateTime<Utc>,
    pub modules: Vec<ModuleEntry>,
    pub resolvers: Vec<ResolverEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleEntry {
    pub name: String,
    pub base_address: String,
    pub size: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverEntry {
    pub name: String,
    pub module: Option<String>,
    pub usable: bool,
    pub fields: Vec<FieldEntry>,
}

/// One field; addresses in hex string format
#[derive(Debug, Clone, Serialize)]
pub struct FieldEntry {
    pub name: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Distance from the module base, stable across ASLR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl AddressTableDump {
    pub fn from_registry(registry: &ResolverRegistry, modules: &ModuleTable) -> Self {
        let module_entries = modules
            .iter()
            .map(|m| ModuleEntry {
                name: m.name().to_string(),
                base_address: format!("0x{:X}", m.base_address()),
                size: format!("0x{:X}", m.size()),
            })
            .collect();

        let resolvers = registry
            .outcomes()
            .map(|outcome| {
                let base = modules
                    .get(outcome.module.as_deref())
                    .ok()
                    .map(|m| m.base_address());

                let fields = outcome
                    .records
                    .iter()
                    .map(|record| {
                        let (state, address, signature_index, diagnostic) = match record.state() {
                            FieldState::Unresolved => ("unresolved", None, None, None),
                            FieldState::Resolved {
                                address,
                                signature_index,
                            } => ("resolved", Some(address.get()), Some(*signature_index), None),
                            FieldState::Failed { diagnostic } => {
                                ("failed", None, None, Some(diagnostic.to_string()))
                            }
                        };

                        FieldEntry {
                            name: record.field.clone(),
                            state,
                            address: address.map(|a| format!("0x{:X}", a)),
                            module_offset: address
                                .zip(base)
                                .map(|(a, b)| format!("0x{:X}", a.wrapping_sub(b))),
                            signature_index,
                            diagnostic,
                        }
                    })
                    .collect();

                ResolverEntry {
                    name: outcome.resolver.clone(),
                    module: outcome.module.clone(),
                    usable: outcome.usable,
                    fields,
                }
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            modules: module_entries,
            resolvers,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save dump to JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::image::{ModuleImage, SearchExtent};
    use crate::memory::ByteBuffer;
    use crate::resolver::{AddressResolver, ResolverField};
    use tempfile::NamedTempFile;

    #[test]
    fn test_dump_reports_offsets_and_failures() {
        let base = 0x7FF6_0000_0000;
        let mut bytes = vec![0u8; 0x100];
        bytes[0x40..0x42].copy_from_slice(&[0xE8, 0x90]);
        let reader = ByteBuffer::new(base, bytes);
        let modules =
            ModuleTable::single(ModuleImage::new("game.exe", base, 0x100, vec![]).unwrap());

        let mut registry = ResolverRegistry::new(RegistryConfig::default());
        registry
            .register(
                AddressResolver::new("chat")
                    .field(ResolverField::new("print", SearchExtent::Module).signature("E8 90"))
                    .field(ResolverField::new("log", SearchExtent::Module).signature("FF FE")),
            )
            .unwrap();
        registry.resolve_all(&modules, &reader);

        let dump = AddressTableDump::from_registry(&registry, &modules);
        let chat = &dump.resolvers[0];
        assert_eq!(chat.fields[0].state, "resolved");
        assert_eq!(chat.fields[0].address.as_deref(), Some("0x7FF600000040"));
        assert_eq!(chat.fields[0].module_offset.as_deref(), Some("0x40"));
        assert_eq!(chat.fields[1].state, "failed");
        assert!(chat.fields[1].diagnostic.as_deref().unwrap().contains("FF FE"));

        let temp_file = NamedTempFile::new().unwrap();
        dump.save(temp_file.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        assert_eq!(json["modules"][0]["base_address"], "0x7FF600000000");
        assert!(json["resolvers"][0]["fields"][1].get("address").is_none());
    }
}
