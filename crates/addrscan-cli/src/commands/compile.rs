//! Compile command implementation.

use addrscan::CompiledSignature;
use anyhow::Result;

/// Mask rendered as `x` for literal bytes and `?` for wildcards.
pub fn mask_string(sig: &CompiledSignature) -> String {
    sig.mask().iter().map(|&m| if m { 'x' } else { '?' }).collect()
}

/// Run the compile command
pub fn run(pattern: &str) -> Result<()> {
    let sig = CompiledSignature::parse(pattern)?;

    println!("Pattern:  {}", sig);
    println!("Mask:     {}", mask_string(&sig));
    println!(
        "Length:   {} bytes ({} literal, {} wildcard)",
        sig.len(),
        sig.literal_count(),
        sig.len() - sig.literal_count()
    );
    match sig.first_literal() {
        Some((index, byte)) => println!("Anchor:   0x{:02X} at +{}", byte, index),
        None => println!("Anchor:   none (matches anywhere)"),
    }

    Ok(())
}
