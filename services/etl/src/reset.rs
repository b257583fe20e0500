//! Warehouse Reset - the full-load pre-step.

use tracing::{error, info};

use crate::error::{EtlError, Result};
use crate::warehouse::Warehouse;

/// Empty the fact table and every dimension.
///
/// A failure leaves the warehouse in an unknown state, so it is fatal to the run.
pub async fn reset_warehouse<W: Warehouse>(warehouse: &mut W) -> Result<()> {
    info!("emptying warehouse tables for a full load");
    match warehouse.reset().await {
        Ok(()) => {
            info!("warehouse tables emptied");
            Ok(())
        }
        Err(source) => {
            let err = EtlError::Reset(source);
            error!(error = %err, "aborting run");
            Err(err)
        }
    }
}
