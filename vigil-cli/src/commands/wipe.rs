//! Sweep a broker clean by hand.

use anyhow::{Context, Result};

use vigil_client::ConnectOptions;
use vigil_harness::wipe;

/// Run the wipe command.
pub async fn run(server: &str, mock: bool) -> Result<()> {
    let broker = super::select_broker(mock)?;

    let options = ConnectOptions::new(server).with_client_name("vigil-wipe");
    let session = broker
        .connect(&options)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;

    let report = wipe(session.as_ref()).await?;

    println!("=== vigil wipe ===");
    println!();
    println!("  streams removed:       {}", report.streams);
    println!("  consumers removed:     {}", report.consumers);
    println!("  buckets removed:       {}", report.buckets);
    println!("  object stores removed: {}", report.object_stores);
    if report.failures > 0 {
        println!("  failed removals:       {}", report.failures);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wipes_the_mock() {
        assert!(run("mock://local", true).await.is_ok());
    }

    #[tokio::test]
    async fn refuses_without_an_adapter() {
        let err = run("localhost:4222", false).await.unwrap_err();
        assert!(err.to_string().contains("no broker adapter"));
    }
}
