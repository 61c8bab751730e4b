//! The session-wide address table.
//!
//! A [`ResolverRegistry`] is built once at startup, resolved once, and then
//! shared by reference with every hook installer. Nothing in it changes after
//! a resolver's outcome has been stored.

mod dump;

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::image::ModuleTable;
use crate::memory::ReadMemory;
use crate::resolver::{
    AddressResolver, NativeAddress, ResolvedAddress, ResolverOutcome, builtin_resolvers,
};

pub use dump::*;

#[derive(Debug, Default)]
pub struct ResolverRegistry {
    config: RegistryConfig,
    resolvers: Vec<AddressResolver>,
    outcomes: HashMap<String, ResolverOutcome>,
}

impl ResolverRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            resolvers: Vec::new(),
            outcomes: HashMap::new(),
        }
    }

    pub fn with_builtin_resolvers(config: RegistryConfig) -> Self {
        let mut registry = Self::new(config);
        registry.resolvers = builtin_resolvers();
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn register(&mut self, resolver: AddressResolver) -> Result<()> {
        if self.resolvers.iter().any(|r| r.name == resolver.name) {
            return Err(Error::DuplicateResolver(resolver.name));
        }
        for (i, field) in resolver.fields.iter().enumerate() {
            if resolver.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::DuplicateField {
                    resolver: resolver.name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        self.resolvers.push(resolver);
        Ok(())
    }

    pub fn resolvers(&self) -> &[AddressResolver] {
        &self.resolvers
    }

    /// Resolve every registered resolver that has no stored outcome yet.
    ///
    /// Outcomes already stored are kept as they are, so calling this again
    /// against the same modules leaves the table unchanged.
    pub fn resolve_all<R: ReadMemory + ?Sized>(
        &mut self,
        modules: &ModuleTable,
        reader: &R,
    ) -> ResolutionSummary {
        let pending: Vec<&AddressResolver> = self
            .resolvers
            .iter()
            .filter(|r| !self.outcomes.contains_key(&r.name))
            .collect();

        info!(
            "Resolving {} resolvers ({} already resolved)",
            pending.len(),
            self.outcomes.len()
        );

        let scan = self.config.scan;
        let outcomes: Vec<ResolverOutcome> = if self.config.parallel {
            resolve_parallel(&pending, modules, reader, scan)
        } else {
            pending
                .iter()
                .map(|resolver| resolver.resolve(modules, reader, scan))
                .collect()
        };

        for outcome in outcomes {
            self.outcomes.entry(outcome.resolver.clone()).or_insert(outcome);
        }

        let summary = self.summary();
        info!(
            "Resolution finished: {} resolved, {} failed, {} unusable resolvers",
            summary.total_resolved(),
            summary.total_failed(),
            summary.unusable_count()
        );
        summary
    }

    /// Counts per resolver, in registration order.
    pub fn summary(&self) -> ResolutionSummary {
        let resolvers = self
            .resolvers
            .iter()
            .filter_map(|r| self.outcomes.get(&r.name))
            .map(|outcome| ResolverSummary {
                name: outcome.resolver.clone(),
                resolved: outcome.resolved_count(),
                failed: outcome.failed_count(),
                usable: outcome.usable,
            })
            .collect();
        ResolutionSummary { resolvers }
    }

    /// The address hook installers use. Fails unless the field resolved and its
    /// resolver is usable.
    pub fn lookup(&self, resolver: &str, field: &str) -> Result<NativeAddress> {
        match self.outcomes.get(resolver) {
            Some(outcome) => outcome.lookup(field),
            None => {
                let declared = self
                    .resolvers
                    .iter()
                    .any(|r| r.name == resolver && r.fields.iter().any(|f| f.name == field));
                if declared {
                    Err(Error::AddressNotResolved {
                        resolver: resolver.to_string(),
                        field: field.to_string(),
                        reason: "resolution has not run".to_string(),
                    })
                } else {
                    Err(Error::UnknownField {
                        resolver: resolver.to_string(),
                        field: field.to_string(),
                    })
                }
            }
        }
    }

    pub fn outcome(&self, resolver: &str) -> Option<&ResolverOutcome> {
        self.outcomes.get(resolver)
    }

    pub fn record(&self, resolver: &str, field: &str) -> Option<&ResolvedAddress> {
        self.outcome(resolver)?.record(field)
    }

    pub fn is_usable(&self, resolver: &str) -> bool {
        self.outcome(resolver).is_some_and(|o| o.usable)
    }

    /// Stored outcomes in registration order.
    pub fn outcomes(&self) -> impl Iterator<Item = &ResolverOutcome> {
        self.resolvers
            .iter()
            .filter_map(|r| self.outcomes.get(&r.name))
    }
}

#[cfg(feature = "parallel")]
fn resolve_parallel<R: ReadMemory + ?Sized>(
    pending: &[&AddressResolver],
    modules: &ModuleTable,
    reader: &R,
    scan: crate::config::ScanConfig,
) -> Vec<ResolverOutcome> {
    use rayon::prelude::*;

    pending
        .par_iter()
        .map(|resolver| resolver.resolve(modules, reader, scan))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn resolve_parallel<R: ReadMemory + ?Sized>(
    pending: &[&AddressResolver],
    modules: &ModuleTable,
    reader: &R,
    scan: crate::config::ScanConfig,
) -> Vec<ResolverOutcome> {
    pending
        .iter()
        .map(|resolver| resolver.resolve(modules, reader, scan))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverSummary {
    pub name: String,
    pub resolved: usize,
    pub failed: usize,
    pub usable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResolutionSummary {
    pub resolvers: Vec<ResolverSummary>,
}

impl ResolutionSummary {
    pub fn total_resolved(&self) -> usize {
        self.resolvers.iter().map(|r| r.resolved).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.resolvers.iter().map(|r| r.failed).sum()
    }

    pub fn unusable_count(&self) -> usize {
        self.resolvers.iter().filter(|r| !r.usable).count()
    }

    pub fn all_usable(&self) -> bool {
        self.unusable_count() == 0
    }
}
