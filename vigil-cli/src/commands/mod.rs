//! Command implementations for the `vigil` binary.

use std::sync::Arc;

use anyhow::Result;

use vigil_client::{Broker, MockBroker};

pub mod list;
pub mod run;
pub mod wipe;

/// Pick the broker the command will talk to.
///
/// Only the in-process mock ships with this binary; the session contract
/// in `vigil-client` is the seam where a deployment-specific adapter
/// plugs in.
pub fn select_broker(mock: bool) -> Result<Arc<dyn Broker>> {
    if mock {
        return Ok(Arc::new(MockBroker::new()));
    }
    anyhow::bail!(
        "no broker adapter is compiled into this binary; \
         run with --mock or link an adapter for your deployment"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_flag_selects_the_mock() {
        assert!(select_broker(true).is_ok());
    }

    #[test]
    fn refuses_without_an_adapter() {
        let err = select_broker(false).unwrap_err();
        assert!(err.to_string().contains("no broker adapter"));
    }
}
