//! Standard gRPC health probe.

use crate::error::{is_transport_status, InvokeError};
use crate::pool::ConnectionManager;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{debug, instrument};

/// True when the endpoint reports `SERVING` for the overall server.
#[instrument(skip(connections))]
pub async fn check_serving(connections: &ConnectionManager, url: &str) -> Result<bool, InvokeError> {
    let channel = connections.acquire(url).await?;
    let mut client = HealthClient::new(channel);

    let request = HealthCheckRequest {
        service: String::new(),
    };

    match client.check(request).await {
        Ok(response) => {
            let status = response.into_inner().status;
            debug!("Health status for {}: {}", url, status);
            Ok(status == ServingStatus::Serving as i32)
        }
        Err(status) => {
            if is_transport_status(&status) {
                connections.mark_failed(url).await;
            }
            Err(InvokeError::Invoke(status))
        }
    }
}
