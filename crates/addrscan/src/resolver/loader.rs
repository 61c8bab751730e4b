use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::AddressResolver;
use crate::error::Result;

/// A set of resolver declarations targeting one client build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSet {
    pub version: String,
    pub resolvers: Vec<AddressResolver>,
}

impl ResolverSet {
    pub fn resolver(&self, name: &str) -> Option<&AddressResolver> {
        self.resolvers
            .iter()
            .find(|resolver| resolver.name.eq_ignore_ascii_case(name))
    }
}

pub fn load_resolvers<P: AsRef<Path>>(path: P) -> Result<ResolverSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_resolvers<P: AsRef<Path>>(path: P, resolvers: &ResolverSet) -> Result<()> {
    let content = serde_json::to_string_pretty(resolvers)?;
    fs::write(path, content)?;
    Ok(())
}
