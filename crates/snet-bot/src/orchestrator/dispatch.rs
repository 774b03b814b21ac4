//! Paid call execution and result rendering.

use crate::catalog::ServiceCatalog;
use crate::messenger::Messenger;
use async_trait::async_trait;
use call_store::CallTarget;
use grpc_invoke::{DynamicInvoker, InvokeError};
use mpe_payments::{PaymentError, PaymentStrategy};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const SERVICE_UNAVAILABLE: &str = "Service unavailable.";
pub const PAYMENT_REJECTED: &str = "Payment rejected.";

/// A fully collected call, ready to pay for and execute.
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub room_id: String,
    pub sender: String,
    pub target: CallTarget,
    pub inputs: Map<String, Value>,
}

impl AiRequest {
    pub fn new(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        target: CallTarget,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            target,
            inputs: values
                .into_iter()
                .map(|(name, value)| (name, Value::String(value)))
                .collect(),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: AiRequest);
}

/// Authorizes, invokes and reports one call.
pub struct CallDispatcher {
    catalog: Arc<dyn ServiceCatalog>,
    strategy: Arc<dyn PaymentStrategy>,
    invoker: DynamicInvoker,
    messenger: Arc<dyn Messenger>,
}

impl CallDispatcher {
    pub fn new(
        catalog: Arc<dyn ServiceCatalog>,
        strategy: Arc<dyn PaymentStrategy>,
        invoker: DynamicInvoker,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            catalog,
            strategy,
            invoker,
            messenger,
        }
    }

    async fn execute(&self, request: &AiRequest) -> String {
        let target = &request.target;
        let Some(entry) = self.catalog.lookup(&target.snet_id, &target.descriptor) else {
            return SERVICE_UNAVAILABLE.to_string();
        };

        let payment = match self.strategy.authorize(&entry.service).await {
            Ok(payment) => payment,
            Err(e) => return payment_failure(&e),
        };
        let metadata = match payment.to_metadata() {
            Ok(metadata) => metadata,
            Err(e) => return payment_failure(&e),
        };

        match self
            .invoker
            .invoke(
                &entry.service.url,
                &entry.schema,
                Some(target.service.as_str()),
                &target.method,
                &request.inputs,
                metadata,
            )
            .await
        {
            Ok(outputs) => {
                info!("{} answered for {}", target, request.sender);
                render_outputs(&outputs)
            }
            Err(e) => invoke_failure(&e),
        }
    }
}

#[async_trait]
impl Dispatcher for CallDispatcher {
    #[instrument(skip(self, request), fields(target = %request.target, room = %request.room_id))]
    async fn dispatch(&self, request: AiRequest) {
        let body = self.execute(&request).await;
        if let Err(e) = self.messenger.send(&request.room_id, &body).await {
            error!("Failed to send call result: {}", e);
        }
    }
}

/// Pretty JSON in a code block.
pub fn render_outputs(outputs: &Map<String, Value>) -> String {
    let pretty = serde_json::to_string_pretty(outputs).unwrap_or_else(|_| "{}".to_string());
    format!("```json\n{}\n```", pretty)
}

pub fn payment_failure(e: &PaymentError) -> String {
    warn!("Payment failed: {}", e);
    match e {
        PaymentError::DaemonUnavailable(_) => SERVICE_UNAVAILABLE.to_string(),
        PaymentError::PaymentRejected(_) | PaymentError::InsufficientChannelValue { .. } => {
            PAYMENT_REJECTED.to_string()
        }
        other => format!("Call failed: {}", other),
    }
}

pub fn invoke_failure(e: &InvokeError) -> String {
    warn!("Call failed at {}: {}", e.stage(), e);
    if e.is_transport() {
        SERVICE_UNAVAILABLE.to_string()
    } else {
        format!("Call failed: {}", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_outputs() {
        let outputs = json!({"value": 3.5, "result_label": ""}).as_object().cloned().unwrap();

        let rendered = render_outputs(&outputs);

        assert!(rendered.starts_with("```json\n{"));
        assert!(rendered.ends_with("}\n```"));
        assert!(rendered.contains("\"value\": 3.5"));
        assert!(rendered.contains("\"result_label\": \"\""));
    }

    #[test]
    fn test_ai_request_inputs_are_strings() {
        let mut values = BTreeMap::new();
        values.insert("amount".to_string(), "3.5".to_string());

        let request = AiRequest::new("!r", "@a", target(), values);
        assert_eq!(request.inputs["amount"], json!("3.5"));
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            payment_failure(&PaymentError::DaemonUnavailable("down".into())),
            SERVICE_UNAVAILABLE
        );
        assert_eq!(
            payment_failure(&PaymentError::PaymentRejected("nonce".into())),
            PAYMENT_REJECTED
        );
        assert!(payment_failure(&PaymentError::Rpc("boom".into())).starts_with("Call failed:"));

        assert_eq!(
            invoke_failure(&InvokeError::connect("http://svc", "refused")),
            SERVICE_UNAVAILABLE
        );
        assert!(
            invoke_failure(&InvokeError::Resolve("method calc.mul not found".into()))
                .starts_with("Call failed:")
        );
    }

    fn target() -> CallTarget {
        CallTarget {
            snet_id: "org1".into(),
            descriptor: "v1".into(),
            service: "calc".into(),
            method: "add".into(),
        }
    }
}
