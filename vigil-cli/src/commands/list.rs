//! Show every registered scenario.

use anyhow::Result;

use vigil_harness::Registry;

/// Run the list command.
pub fn run() -> Result<()> {
    let registry = Registry::builtin();

    println!("=== vigil scenarios ===");
    println!();
    for scenario in registry.iter() {
        println!("  {:<18} {}", scenario.name(), scenario.summary());
    }
    println!();
    println!("Run one with 'vigil run --scenario <name>'.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_succeeds() {
        assert!(run().is_ok());
    }
}
