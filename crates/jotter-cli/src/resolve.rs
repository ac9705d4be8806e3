//! Resolve command implementation.
//!
//! Resolves one library reference the way `%use` would and prints the
//! resulting definition as JSON on stdout. Diagnostics go to stderr.

use jotter_core::library::parse_request;
use jotter_core::{KernelDirs, ResolverChain, SessionConfig};

use crate::colors;

pub fn execute(reference: &str, config: &SessionConfig, dirs: &KernelDirs) -> anyhow::Result<()> {
    let request = parse_request(reference)?;
    let resolver = ResolverChain::from_config(config, dirs)?;
    let resolved = resolver.resolve(&request)?;

    for warning in &resolved.warnings {
        colors::warn(warning);
    }
    eprintln!(
        "{}Resolved{} {} from {}",
        colors::GREEN,
        colors::RESET,
        resolved.reference,
        resolved.origin
    );
    println!("{}", serde_json::to_string_pretty(&resolved.definition)?);
    Ok(())
}
