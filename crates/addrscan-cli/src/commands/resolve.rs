//! Resolve command implementation.

use std::path::Path;

use addrscan::{
    AddressTableDump, FieldState, ModuleTable, RegistryConfig, ResolverOutcome, ResolverRegistry,
    builtin_resolvers, load_resolvers,
};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::info;

use super::hex_utils::format_with_offset;
use super::{describe_image, load_image, module_name};

/// Resolve declarations against a dump. Built-in declarations unless a
/// resolver file is given.
pub fn resolve_image(
    image_path: &Path,
    base: u64,
    module: Option<&str>,
    resolvers_file: Option<&Path>,
    config: RegistryConfig,
) -> Result<(ResolverRegistry, ModuleTable)> {
    let buffer = load_image(image_path, base)?;
    let image = describe_image(&buffer, &module_name(image_path, module))?;
    info!(
        "Module {} at 0x{:X} ({} sections)",
        image.name(),
        image.base_address(),
        image.sections().len()
    );

    let resolvers = match resolvers_file {
        Some(path) => {
            let set = load_resolvers(path)
                .with_context(|| format!("Failed to load resolvers from {}", path.display()))?;
            info!("Loaded resolver set version: {}", set.version);
            set.resolvers
        }
        None => builtin_resolvers(),
    };

    let mut registry = ResolverRegistry::new(config);
    for resolver in resolvers {
        registry.register(resolver)?;
    }

    let modules = ModuleTable::single(image);
    registry.resolve_all(&modules, &buffer);
    Ok((registry, modules))
}

/// Run the resolve command
pub fn run(
    image_path: &Path,
    base: u64,
    module: Option<&str>,
    resolvers_file: Option<&Path>,
    json_out: Option<&Path>,
    config: RegistryConfig,
) -> Result<()> {
    let (registry, modules) = resolve_image(image_path, base, module, resolvers_file, config)?;

    for outcome in registry.outcomes() {
        print_outcome(outcome, base);
    }

    let summary = registry.summary();
    println!();
    println!(
        "{} resolved, {} failed, {} of {} resolvers usable",
        summary.total_resolved(),
        summary.total_failed(),
        summary.resolvers.len() - summary.unusable_count(),
        summary.resolvers.len()
    );

    if let Some(path) = json_out {
        AddressTableDump::from_registry(&registry, &modules).save(path)?;
        println!("Address table saved to: {}", path.display());
    }

    Ok(())
}

fn print_outcome(outcome: &ResolverOutcome, base: u64) {
    println!();
    let module = outcome.module.as_deref().unwrap_or("<primary>");
    if outcome.usable {
        println!("{} ({})", outcome.resolver.green().bold(), module);
    } else {
        println!(
            "{} ({}) {}",
            outcome.resolver.red().bold(),
            module,
            "unusable".red()
        );
    }

    for record in &outcome.records {
        match record.state() {
            FieldState::Resolved {
                address,
                signature_index,
            } => println!(
                "  {:<32} {}  sig #{}",
                record.field,
                format_with_offset(address.get(), base).green(),
                signature_index
            ),
            FieldState::Failed { diagnostic } => {
                println!("  {:<32} {}", record.field, "FAILED".red());
                println!("      {}", diagnostic.reason.dimmed());
                for attempt in &diagnostic.attempts {
                    println!(
                        "      #{} {}: {}",
                        attempt.signature_index,
                        attempt.pattern.dimmed(),
                        attempt.error
                    );
                }
            }
            FieldState::Unresolved => {
                println!("  {:<32} {}", record.field, "unresolved".yellow())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addrscan::{
        AddressResolver, NativeAddress, PostRule, ResolverField, ResolverSet, SearchExtent,
        save_resolvers,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASE: u64 = 0x1_4000_0000;

    fn dump() -> NamedTempFile {
        let mut bytes = vec![0u8; 0x400];
        // call +0x100 from 0x200
        bytes[0x200..0x205].copy_from_slice(&[0xE8, 0xFB, 0x00, 0x00, 0x00]);
        bytes[0x205..0x207].copy_from_slice(&[0x48, 0x8B]);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file
    }

    fn resolver_file() -> NamedTempFile {
        let set = ResolverSet {
            version: "test".to_string(),
            resolvers: vec![
                AddressResolver::new("chat").all_or_nothing().field(
                    ResolverField::new("print", SearchExtent::Module)
                        .signature("E8 ?? ?? ?? ?? 48 8B")
                        .post_rule(PostRule::RelativeCallTarget {
                            instruction_offset: 0,
                            opcode_length: 1,
                            instruction_length: 5,
                        }),
                ),
                AddressResolver::new("overlay")
                    .field(ResolverField::new("draw", SearchExtent::Module).signature("FF 15")),
            ],
        };
        let file = NamedTempFile::new().unwrap();
        save_resolvers(file.path(), &set).unwrap();
        file
    }

    #[test]
    fn test_resolve_from_resolver_file() {
        let image = dump();
        let resolvers = resolver_file();
        let config = RegistryConfig::builder().parallel(false).build();

        let (registry, _) =
            resolve_image(image.path(), BASE, None, Some(resolvers.path()), config).unwrap();

        assert_eq!(
            registry.lookup("chat", "print").unwrap(),
            NativeAddress::new(BASE + 0x300)
        );
        assert!(registry.lookup("overlay", "draw").is_err());
        assert!(registry.is_usable("chat"));
    }

    #[test]
    fn test_builtin_resolvers_fail_on_raw_dump() {
        let image = dump();
        let config = RegistryConfig::default();

        let (registry, _) = resolve_image(image.path(), BASE, None, None, config).unwrap();

        let summary = registry.summary();
        assert_eq!(summary.resolvers.len(), 2);
        assert_eq!(summary.total_resolved(), 0);
        assert!(!summary.all_usable());
    }

    #[test]
    fn test_run_writes_json_table() {
        let image = dump();
        let resolvers = resolver_file();
        let out = NamedTempFile::new().unwrap();

        run(
            image.path(),
            BASE,
            Some("game.exe"),
            Some(resolvers.path()),
            Some(out.path()),
            RegistryConfig::default(),
        )
        .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.path()).unwrap()).unwrap();
        assert_eq!(json["modules"][0]["name"], "game.exe");
        assert_eq!(json["resolvers"][0]["fields"][0]["address"], "0x140000300");
        assert_eq!(json["resolvers"][1]["fields"][0]["state"], "failed");
    }
}
