//! Built-in resolver declarations.
//!
//! Offsets and windows below were measured against the current client build
//! and must be re-derived when a signature stops matching.

use super::{AddressResolver, PostRule, ResolverField};
use crate::image::{SearchExtent, SectionKind};

pub const GAME_NETWORK: &str = "game_network";
pub const SWAP_CHAIN: &str = "swap_chain";

pub const DXGI_MODULE: &str = "dxgi.dll";

/// Zone packet send/receive handlers used for network interception.
pub fn game_network_resolver() -> AddressResolver {
    let code = SearchExtent::Section(SectionKind::Code);

    AddressResolver::new(GAME_NETWORK)
        .all_or_nothing()
        .field(
            ResolverField::new("process_zone_packet_down", code.clone())
                // CN 7.0
                .signature(
                    "40 55 56 57 48 8D 6C 24 ?? 48 81 EC ?? ?? ?? ?? 48 8B 05 ?? ?? ?? ?? \
                     48 33 C4 48 89 45 3F 8B FA",
                )
                .signature(
                    "40 53 56 48 81 EC ?? ?? ?? ?? 48 8B 05 ?? ?? ?? ?? 48 33 C4 48 89 44 24 ?? \
                     8B F2",
                ),
        )
        .field(
            ResolverField::new("process_zone_packet_up", code).signature(
                "48 89 5C 24 ?? 48 89 74 24 ?? 4C 89 64 24 ?? 55 41 56 41 57 48 8B EC 48 83 EC 70",
            ),
        )
}

/// DXGI swap chain methods for the presentation hook.
pub fn swap_chain_resolver() -> AddressResolver {
    AddressResolver::new(SWAP_CHAIN)
        .in_module(DXGI_MODULE)
        .all_or_nothing()
        .field(
            // Matches code after the prologue so other hooks on the entry don't break it.
            ResolverField::new("present", SearchExtent::Module)
                .signature("41 8B F0 8B FA 89 54 24 ?? 48 8B D9 48 89 4D ?? C6 44 24 ?? 00")
                .post_rule(PostRule::FixedOffset { delta: -0x37 }),
        )
        .field(
            ResolverField::new("resize_buffers", SearchExtent::Module)
                .signature(
                    "45 8B CC 45 8B C5 33 D2 48 8B CF E8 ?? ?? ?? ?? 44 8B C0 48 8D 55 ?? \
                     48 8D 4D ?? E8 ?? ?? ?? ??",
                )
                .post_rule(PostRule::ReversedScan {
                    window: 0x100,
                    pattern: "CC CC CC CC 48 8B C4 55 41 54".to_string(),
                    delta: 4,
                }),
        )
}

/// Every resolver the host registers by default.
pub fn builtin_resolvers() -> Vec<AddressResolver> {
    vec![game_network_resolver(), swap_chain_resolver()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::image::{ModuleImage, ModuleTable, Section};
    use crate::memory::MockMemoryBuilder;
    use crate::registry::ResolverRegistry;
    use crate::resolver::NativeAddress;
    use crate::signature::CompiledSignature;

    const GAME_BASE: u64 = 0x1_4000_0000;
    const DXGI_BASE: u64 = 0x7FF0_0000;

    /// Bytes matching `pattern`, with zeros for wildcards.
    fn bytes_of(pattern: &str) -> Vec<u8> {
        CompiledSignature::parse(pattern).unwrap().bytes().to_vec()
    }

    fn field_signature(resolver: &AddressResolver, field: &str, index: usize) -> String {
        resolver
            .fields
            .iter()
            .find(|f| f.name == field)
            .unwrap()
            .signatures[index]
            .clone()
    }

    #[test]
    fn test_builtin_signatures_compile() {
        for resolver in builtin_resolvers() {
            for field in &resolver.fields {
                assert!(!field.signatures.is_empty(), "{} has no signatures", field.name);
                for pattern in &field.signatures {
                    CompiledSignature::parse(pattern)
                        .unwrap_or_else(|e| panic!("{}.{}: {}", resolver.name, field.name, e));
                }
                if let PostRule::ReversedScan { pattern, .. } = &field.post_rule {
                    assert!(CompiledSignature::parse(pattern).is_ok());
                }
            }
        }
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let resolvers = builtin_resolvers();
        assert_eq!(resolvers.len(), 2);
        assert_ne!(resolvers[0].name, resolvers[1].name);
        assert_eq!(resolvers[1].module.as_deref(), Some(DXGI_MODULE));
    }

    #[test]
    fn test_builtin_resolvers_resolve_against_both_modules() {
        let network = game_network_resolver();
        let swap_chain = swap_chain_resolver();

        let reader = MockMemoryBuilder::new()
            .zeroed(GAME_BASE, 0x2000)
            .write(
                GAME_BASE + 0x1100,
                &bytes_of(&field_signature(&network, "process_zone_packet_down", 1)),
            )
            .write(
                GAME_BASE + 0x1400,
                &bytes_of(&field_signature(&network, "process_zone_packet_up", 0)),
            )
            .zeroed(DXGI_BASE, 0x1000)
            .write(
                DXGI_BASE + 0x400,
                &bytes_of(&field_signature(&swap_chain, "present", 0)),
            )
            .write(DXGI_BASE + 0x580, &bytes_of("CC CC CC CC 48 8B C4 55 41 54"))
            .write(
                DXGI_BASE + 0x600,
                &bytes_of(&field_signature(&swap_chain, "resize_buffers", 0)),
            )
            .build();

        let modules = ModuleTable::new(vec![
            ModuleImage::new(
                "ffxiv_dx11.exe",
                GAME_BASE,
                0x2000,
                vec![Section::new(".text", 0x1000, 0x800)],
            )
            .unwrap(),
            ModuleImage::new(
                "DXGI.dll",
                DXGI_BASE,
                0x1000,
                vec![Section::new(".text", 0, 0x1000)],
            )
            .unwrap(),
        ]);

        let mut registry = ResolverRegistry::with_builtin_resolvers(RegistryConfig::default());
        let summary = registry.resolve_all(&modules, &reader);
        assert!(summary.all_usable());

        assert_eq!(
            registry.lookup(GAME_NETWORK, "process_zone_packet_down").unwrap(),
            NativeAddress::new(GAME_BASE + 0x1100)
        );
        assert_eq!(
            registry
                .record(GAME_NETWORK, "process_zone_packet_down")
                .unwrap()
                .signature_index(),
            Some(1)
        );
        assert_eq!(
            registry.lookup(GAME_NETWORK, "process_zone_packet_up").unwrap(),
            NativeAddress::new(GAME_BASE + 0x1400)
        );
        assert_eq!(
            registry.lookup(SWAP_CHAIN, "present").unwrap(),
            NativeAddress::new(DXGI_BASE + 0x3C9)
        );
        assert_eq!(
            registry.lookup(SWAP_CHAIN, "resize_buffers").unwrap(),
            NativeAddress::new(DXGI_BASE + 0x584)
        );
    }

    #[test]
    fn test_game_network_ignores_matches_outside_code() {
        let network = game_network_resolver();
        let up = bytes_of(&field_signature(&network, "process_zone_packet_up", 0));
        let reader = MockMemoryBuilder::new()
            .zeroed(GAME_BASE, 0x2000)
            .write(GAME_BASE + 0x1900, &up)
            .build();
        let modules = ModuleTable::single(
            ModuleImage::new(
                "ffxiv_dx11.exe",
                GAME_BASE,
                0x2000,
                vec![Section::new(".text", 0x1000, 0x800), Section::new(".data", 0x1800, 0x800)],
            )
            .unwrap(),
        );

        let outcome = network.resolve(&modules, &reader, RegistryConfig::default().scan);
        assert!(!outcome.usable);
        assert!(outcome.record("process_zone_packet_up").unwrap().is_failed());
    }
}
