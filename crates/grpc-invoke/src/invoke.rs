//! Dynamic unary invocation.

use crate::codec::DynamicCodec;
use crate::coerce::build_request_json;
use crate::error::{is_transport_status, InvokeError};
use crate::pool::{grpc_client, ConnectionManager};
use crate::schema::MethodSchema;
use prost_reflect::{DescriptorPool, DeserializeOptions, DynamicMessage, SerializeOptions};
use serde_json::{Map, Value};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataMap;
use tonic::Request;
use tracing::{debug, info, instrument};

/// Calls methods known only through runtime descriptors.
#[derive(Clone)]
pub struct DynamicInvoker {
    connections: ConnectionManager,
}

impl DynamicInvoker {
    pub fn new(connections: ConnectionManager) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Resolve, build, call and encode in one step.
    #[instrument(skip(self, pool, inputs, metadata))]
    pub async fn invoke(
        &self,
        url: &str,
        pool: &DescriptorPool,
        service: Option<&str>,
        method: &str,
        inputs: &Map<String, Value>,
        metadata: MetadataMap,
    ) -> Result<Map<String, Value>, InvokeError> {
        let schema = MethodSchema::resolve(pool, service, method)?;
        let request = build_request(&schema, inputs)?;
        let response = self.call(url, &schema, request, metadata).await?;
        encode_response(&response)
    }

    /// Execute a unary call with an already built request.
    pub async fn call(
        &self,
        url: &str,
        schema: &MethodSchema,
        request: DynamicMessage,
        metadata: MetadataMap,
    ) -> Result<DynamicMessage, InvokeError> {
        let path = PathAndQuery::try_from(schema.path())
            .map_err(|e| InvokeError::Resolve(format!("invalid path {}: {}", schema.path(), e)))?;

        let channel = self.connections.acquire(url).await?;
        let mut grpc = grpc_client(channel);

        if let Err(e) = grpc.ready().await {
            self.connections.mark_failed(url).await;
            return Err(InvokeError::connect(url, e));
        }

        let mut request = Request::new(request);
        *request.metadata_mut() = metadata;

        debug!("Calling {} on {}", schema.path(), url);
        let codec = DynamicCodec::new(schema.output_descriptor());

        match grpc.unary(request, path, codec).await {
            Ok(response) => {
                info!("Call {} succeeded", schema.path());
                Ok(response.into_inner())
            }
            Err(status) => {
                if is_transport_status(&status) {
                    self.connections.mark_failed(url).await;
                }
                Err(InvokeError::Invoke(status))
            }
        }
    }
}

/// Coerce `inputs` and decode them into the method's request type.
///
/// Unknown fields are tolerated and missing fields keep their defaults.
pub fn build_request(
    schema: &MethodSchema,
    inputs: &Map<String, Value>,
) -> Result<DynamicMessage, InvokeError> {
    let json = build_request_json(&schema.inputs, inputs);
    let options = DeserializeOptions::new().deny_unknown_fields(false);

    DynamicMessage::deserialize_with_options(schema.input_descriptor(), Value::Object(json), &options)
        .map_err(|e| InvokeError::Decode(e.to_string()))
}

/// Serialize a response with every field present, keyed by proto field name.
pub fn encode_response(message: &DynamicMessage) -> Result<Map<String, Value>, InvokeError> {
    let options = SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true);

    match message.serialize_with_options(serde_json::value::Serializer, &options) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(InvokeError::Encode(format!("expected object, got {}", other))),
        Err(e) => Err(InvokeError::Encode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::calculator_pool;
    use serde_json::json;

    fn add_schema() -> MethodSchema {
        MethodSchema::resolve(&calculator_pool(), Some("Calculator"), "add").unwrap()
    }

    #[test]
    fn test_build_request_coerces_inputs() {
        let inputs = json!({"amount": "3.5", "note": 42}).as_object().cloned().unwrap();
        let request = build_request(&add_schema(), &inputs).unwrap();

        let amount = request.get_field_by_name("amount").unwrap();
        let note = request.get_field_by_name("note").unwrap();
        assert_eq!(amount.as_f32(), Some(3.5));
        assert_eq!(note.as_str(), Some("42"));
    }

    #[test]
    fn test_build_request_missing_fields_default() {
        let request = build_request(&add_schema(), &Map::new()).unwrap();
        let count = request.get_field_by_name("count").unwrap();
        assert_eq!(count.as_i32(), Some(0));
    }

    #[test]
    fn test_encode_response_emits_defaults() {
        let schema = add_schema();
        let response = DynamicMessage::new(schema.output_descriptor());

        let output = encode_response(&response).unwrap();
        assert_eq!(output.get("value"), Some(&json!(0.0)));
        assert_eq!(output.get("result_label"), Some(&json!("")));
    }

    #[test]
    fn test_encode_response_uses_proto_names() {
        let schema = add_schema();
        let mut response = DynamicMessage::new(schema.output_descriptor());
        response.set_field_by_name("value", prost_reflect::Value::F32(4.5));
        response.set_field_by_name("result_label", prost_reflect::Value::String("ok".into()));

        let output = encode_response(&response).unwrap();
        assert_eq!(output.get("value"), Some(&json!(4.5)));
        assert_eq!(output.get("result_label"), Some(&json!("ok")));
        assert!(!output.contains_key("resultLabel"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_method_fails_before_connect() {
        let invoker = DynamicInvoker::new(ConnectionManager::new(
            std::time::Duration::from_millis(200),
            std::time::Duration::from_secs(1),
        ));

        let err = invoker
            .invoke(
                "http://127.0.0.1:1",
                &calculator_pool(),
                None,
                "divide",
                &Map::new(),
                MetadataMap::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "resolve");
        assert!(invoker.connections().is_empty().await);
    }
}
