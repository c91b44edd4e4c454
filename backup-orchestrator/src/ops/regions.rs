//! Region listing for managed storage.

use super::OperationContext;
use crate::space::{Region, SpaceClient};
use crate::utils::errors::Result;
use crate::utils::retry::retry;
use tracing::info;

/// Regions offered by the control plane, retried under the client's token
/// policy.
pub async fn regions(client: &SpaceClient, ctx: &OperationContext) -> Result<Vec<Region>> {
    let regions = retry(&client.config().retry, "list regions", &ctx.cancel, move || async move {
        client.regions().await
    })
    .await?;

    info!(operation_id = %ctx.id, "Control plane offers {} region(s)", regions.len());
    Ok(regions)
}
