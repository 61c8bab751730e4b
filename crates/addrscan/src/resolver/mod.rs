//! Per-feature address resolvers.
//!
//! A feature declares the native functions it needs as a table of
//! [`ResolverField`]s. Each field lists candidate signatures in priority order
//! (typically a build-specific pattern before a looser fallback) and a
//! [`PostRule`] that turns the raw match into the address the feature hooks.
//! The numeric constants inside post rules are tied to one binary build and are
//! kept as declaration data.

mod builtin;
mod loader;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::displacement::relative_call_target;
use crate::error::{Error, Result};
use crate::image::{ModuleTable, SearchExtent};
use crate::memory::ReadMemory;
use crate::scan::Scanner;
use crate::signature::CompiledSignature;

pub use builtin::*;
pub use loader::*;

/// An address in the target's address space. Never dereferenced locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeAddress(u64);

impl NativeAddress {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// How a raw signature match becomes the final address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostRule {
    /// The match itself.
    #[default]
    None,
    /// The match plus a signed byte offset.
    FixedOffset { delta: i64 },
    /// Search backwards from the match for `pattern`, then add `delta`.
    ReversedScan {
        window: u64,
        pattern: String,
        #[serde(default)]
        delta: i64,
    },
    /// Decode the rel32 branch at `match + instruction_offset`.
    RelativeCallTarget {
        #[serde(default)]
        instruction_offset: u64,
        opcode_length: u64,
        instruction_length: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverField {
    pub name: String,
    /// Signature text, highest priority first.
    pub signatures: Vec<String>,
    #[serde(default)]
    pub extent: SearchExtent,
    #[serde(default)]
    pub post_rule: PostRule,
    /// Whether a failure here makes an all-or-nothing resolver unusable.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ResolverField {
    pub fn new(name: impl Into<String>, extent: SearchExtent) -> Self {
        Self {
            name: name.into(),
            signatures: Vec::new(),
            extent,
            post_rule: PostRule::None,
            required: true,
        }
    }

    pub fn signature(mut self, pattern: impl Into<String>) -> Self {
        self.signatures.push(pattern.into());
        self
    }

    pub fn post_rule(mut self, rule: PostRule) -> Self {
        self.post_rule = rule;
        self
    }

    /// Let the resolver stay usable when this field fails.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The declaration for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResolver {
    pub name: String,
    /// Module to scan; `None` means the primary module.
    #[serde(default)]
    pub module: Option<String>,
    /// If any required field fails, the whole feature is unusable.
    #[serde(default)]
    pub all_or_nothing: bool,
    pub fields: Vec<ResolverField>,
}

impl AddressResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            all_or_nothing: false,
            fields: Vec::new(),
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn all_or_nothing(mut self) -> Self {
        self.all_or_nothing = true;
        self
    }

    pub fn field(mut self, field: ResolverField) -> Self {
        self.fields.push(field);
        self
    }

    /// Resolve every field once against the module this resolver targets.
    pub fn resolve<R: ReadMemory + ?Sized>(
        &self,
        modules: &ModuleTable,
        reader: &R,
        config: ScanConfig,
    ) -> ResolverOutcome {
        let mut records: Vec<ResolvedAddress> = self
            .fields
            .iter()
            .map(|f| ResolvedAddress::new(f.name.clone()))
            .collect();

        let image = match modules.get(self.module.as_deref()) {
            Ok(image) => image,
            Err(e) => {
                warn!("Resolver {} unusable: {}", self.name, e);
                let diagnostic = Diagnostic::new(e.to_string());
                for record in &mut records {
                    record.settle(FieldState::Failed {
                        diagnostic: diagnostic.clone(),
                    });
                }
                return ResolverOutcome {
                    resolver: self.name.clone(),
                    module: self.module.clone(),
                    usable: false,
                    records,
                };
            }
        };

        let scanner = Scanner::with_config(image, reader, config);
        let mut aborted: Option<String> = None;

        for (field, record) in self.fields.iter().zip(records.iter_mut()) {
            if let Some(reason) = &aborted {
                record.settle(FieldState::Failed {
                    diagnostic: Diagnostic::new(format!("pass aborted: {}", reason)),
                });
                continue;
            }

            match resolve_field(&scanner, field) {
                Ok((address, signature_index)) => {
                    debug!(
                        "{}.{} = {:#x} (signature #{})",
                        self.name, field.name, address, signature_index
                    );
                    record.settle(FieldState::Resolved {
                        address: NativeAddress(address),
                        signature_index,
                    });
                }
                Err(failure) => {
                    warn!("{}.{} failed: {}", self.name, field.name, failure.diagnostic);
                    if let Some(reason) = failure.abort {
                        warn!("Aborting remaining fields of {}: {}", self.name, reason);
                        aborted = Some(reason);
                    }
                    record.settle(FieldState::Failed {
                        diagnostic: failure.diagnostic,
                    });
                }
            }
        }

        let failed = records.iter().filter(|r| r.is_failed()).count();
        let required_failed = self
            .fields
            .iter()
            .zip(&records)
            .any(|(field, record)| field.required && record.is_failed());
        let usable = !(self.all_or_nothing && required_failed);
        if usable {
            info!(
                "Resolver {}: {} resolved, {} failed",
                self.name,
                records.len() - failed,
                failed
            );
        } else {
            warn!(
                "Resolver {} unusable: {} of {} fields failed",
                self.name,
                failed,
                records.len()
            );
        }

        ResolverOutcome {
            resolver: self.name.clone(),
            module: Some(image.name().to_string()),
            usable,
            records,
        }
    }
}

struct FieldFailure {
    diagnostic: Diagnostic,
    /// Set when the failure invalidates the rest of the pass.
    abort: Option<String>,
}

fn resolve_field<R: ReadMemory + ?Sized>(
    scanner: &Scanner<'_, R>,
    field: &ResolverField,
) -> std::result::Result<(u64, usize), FieldFailure> {
    if field.signatures.is_empty() {
        return Err(FieldFailure {
            diagnostic: Diagnostic::new("no candidate signatures declared"),
            abort: None,
        });
    }

    let extent = field.extent.to_string();
    let mut attempts = Vec::with_capacity(field.signatures.len());

    for (index, pattern) in field.signatures.iter().enumerate() {
        let outcome = CompiledSignature::parse(pattern).and_then(|sig| {
            let raw = scanner.scan(&field.extent, &sig)?;
            apply_post_rule(scanner, raw, &field.post_rule)
        });

        match outcome {
            Ok(address) => return Ok((address, index)),
            Err(e) => {
                debug!("  {} candidate #{} missed: {}", field.name, index, e);
                let fatal = e.is_fatal_to_pass().then(|| e.to_string());
                attempts.push(Attempt {
                    signature_index: index,
                    pattern: pattern.clone(),
                    extent: extent.clone(),
                    error: e.to_string(),
                });

                if let Some(reason) = fatal {
                    return Err(FieldFailure {
                        diagnostic: Diagnostic {
                            reason: format!("memory became unreadable: {}", reason),
                            attempts,
                        },
                        abort: Some(reason),
                    });
                }
            }
        }
    }

    Err(FieldFailure {
        diagnostic: Diagnostic {
            reason: "no candidate signature matched".to_string(),
            attempts,
        },
        abort: None,
    })
}

fn apply_post_rule<R: ReadMemory + ?Sized>(
    scanner: &Scanner<'_, R>,
    raw: u64,
    rule: &PostRule,
) -> Result<u64> {
    match rule {
        PostRule::None => Ok(raw),
        PostRule::FixedOffset { delta } => Ok(raw.wrapping_add_signed(*delta)),
        PostRule::ReversedScan {
            window,
            pattern,
            delta,
        } => {
            let sig = CompiledSignature::parse(pattern)?;
            let entry = scanner.scan_reversed(raw, *window, &sig)?;
            Ok(entry.wrapping_add_signed(*delta))
        }
        PostRule::RelativeCallTarget {
            instruction_offset,
            opcode_length,
            instruction_length,
        } => relative_call_target(
            scanner.reader(),
            raw.wrapping_add(*instruction_offset),
            *opcode_length,
            *instruction_length,
        ),
    }
}

/// One failed candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub signature_index: usize,
    pub pattern: String,
    pub extent: String,
    pub error: String,
}

/// Why a field failed, with every signature that was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
}

impl Diagnostic {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            attempts: Vec::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        for attempt in &self.attempts {
            write!(
                f,
                "; #{} '{}' in {}: {}",
                attempt.signature_index, attempt.pattern, attempt.extent, attempt.error
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FieldState {
    #[default]
    Unresolved,
    Resolved {
        address: NativeAddress,
        signature_index: usize,
    },
    Failed {
        diagnostic: Diagnostic,
    },
}

impl FieldState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// The outcome for one field. Leaves `Unresolved` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAddress {
    pub field: String,
    state: FieldState,
}

impl ResolvedAddress {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            state: FieldState::Unresolved,
        }
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    /// Move out of `Unresolved`. Returns false, leaving the record untouched,
    /// if it was already settled or `next` is not terminal.
    pub(crate) fn settle(&mut self, next: FieldState) -> bool {
        if self.state.is_terminal() || !next.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    pub fn address(&self) -> Option<NativeAddress> {
        match self.state {
            FieldState::Resolved { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn signature_index(&self) -> Option<usize> {
        match self.state {
            FieldState::Resolved {
                signature_index, ..
            } => Some(signature_index),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match &self.state {
            FieldState::Failed { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, FieldState::Resolved { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, FieldState::Failed { .. })
    }
}

/// Everything one resolver produced in its pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverOutcome {
    pub resolver: String,
    /// Module that was scanned, or the missing module's name.
    pub module: Option<String>,
    pub usable: bool,
    pub records: Vec<ResolvedAddress>,
}

impl ResolverOutcome {
    pub fn record(&self, field: &str) -> Option<&ResolvedAddress> {
        self.records.iter().find(|r| r.field == field)
    }

    pub fn resolved_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_resolved()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }

    pub(crate) fn lookup(&self, field: &str) -> Result<NativeAddress> {
        let record = self.record(field).ok_or_else(|| Error::UnknownField {
            resolver: self.resolver.clone(),
            field: field.to_string(),
        })?;

        let not_resolved = |reason: String| Error::AddressNotResolved {
            resolver: self.resolver.clone(),
            field: field.to_string(),
            reason,
        };

        if !self.usable {
            return Err(not_resolved("resolver is unusable".to_string()));
        }

        match record.state() {
            FieldState::Resolved { address, .. } => Ok(*address),
            FieldState::Failed { diagnostic } => Err(not_resolved(diagnostic.reason.clone())),
            FieldState::Unresolved => Err(not_resolved("not resolved yet".to_string())),
        }
    }
}
