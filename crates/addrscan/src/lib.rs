//! # addrscan
//!
//! Signature-based address resolution for code loaded in a host process.
//!
//! This crate provides:
//! - Wildcard byte signatures (`"48 8B ?? ?? E8"`) compiled into bytes and a mask
//! - Module images with their PE section table
//! - Forward, nth-match and bounded reversed scans over module memory
//! - Relative call/jump displacement decoding
//! - Declarative per-feature resolvers and a write-once registry of results
//!
//! ## Feature Flags
//!
//! - `parallel` (default): Resolves independent resolvers concurrently with rayon.

pub mod config;
pub mod displacement;
pub mod error;
pub mod image;
pub mod memory;
pub mod registry;
pub mod resolver;
pub mod scan;
pub mod signature;

pub use config::{DEFAULT_CHUNK_SIZE, RegistryConfig, RegistryConfigBuilder, ScanConfig};
pub use displacement::{relative_call_target, relative_target};
pub use error::{Error, Result};
pub use image::{ModuleImage, ModuleProvider, ModuleTable, SearchExtent, Section, SectionKind};
#[cfg(target_os = "windows")]
pub use memory::ProcessHandle;
pub use memory::{ByteBuffer, ReadMemory};
pub use registry::{AddressTableDump, ResolutionSummary, ResolverRegistry, ResolverSummary};
pub use resolver::{
    AddressResolver, Attempt, Diagnostic, FieldState, NativeAddress, PostRule, ResolvedAddress,
    ResolverField, ResolverOutcome, ResolverSet, builtin_resolvers, load_resolvers,
    save_resolvers,
};
pub use scan::Scanner;
pub use signature::CompiledSignature;
