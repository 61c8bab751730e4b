//! Builtin command implementation.

use std::path::Path;

use addrscan::{ResolverSet, builtin_resolvers, save_resolvers};
use anyhow::Result;

pub fn builtin_set() -> ResolverSet {
    ResolverSet {
        version: env!("CARGO_PKG_VERSION").to_string(),
        resolvers: builtin_resolvers(),
    }
}

/// Run the builtin command
pub fn run(output: Option<&Path>) -> Result<()> {
    let set = builtin_set();

    match output {
        Some(path) => {
            save_resolvers(path, &set)?;
            println!(
                "Saved {} built-in resolvers to: {}",
                set.resolvers.len(),
                path.display()
            );
        }
        None => println!("{}", serde_json::to_string_pretty(&set)?),
    }

    Ok(())
}
