//! Descriptor-driven gRPC invocation.
//!
//! Methods are resolved at run time against a `DescriptorPool` decoded from
//! compiled `FileDescriptorSet` bytes, so no generated client code is needed.
//!
//! ```text
//! inputs (JSON map) -> coerce -> DynamicMessage -> DynamicCodec -> channel
//!                                                                  |
//! outputs (JSON map) <- encode_response <- DynamicMessage <--------+
//! ```
//!
//! Channels come from a [`ConnectionManager`] that pools one channel per
//! endpoint and redials after a caller reports a transport failure.

mod codec;
mod coerce;
mod error;
mod health;
mod invoke;
mod pool;
mod schema;

pub use codec::DynamicCodec;
pub use coerce::build_request_json;
pub use error::{is_transport_status, InvokeError};
pub use health::check_serving;
pub use invoke::{build_request, encode_response, DynamicInvoker};
pub use pool::{grpc_client, ConnectionManager, ConnectionState, MAX_MESSAGE_SIZE};
pub use schema::{FieldKind, FieldSpec, MethodSchema};

pub use prost_reflect::DescriptorPool;

#[cfg(test)]
pub(crate) mod testing {
    use prost_reflect::DescriptorPool;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        MethodDescriptorProto, ServiceDescriptorProto,
    };

    fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(kind as i32),
            ..Default::default()
        }
    }

    /// `example.Calculator/add(AddRequest) -> AddResponse`
    pub fn calculator_pool() -> DescriptorPool {
        let file = FileDescriptorProto {
            name: Some("calculator.proto".into()),
            package: Some("example".into()),
            syntax: Some("proto3".into()),
            message_type: vec![
                DescriptorProto {
                    name: Some("AddRequest".into()),
                    field: vec![
                        field("amount", 1, Type::Float),
                        field("note", 2, Type::String),
                        field("count", 3, Type::Int32),
                    ],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("AddResponse".into()),
                    field: vec![
                        field("value", 1, Type::Float),
                        field("result_label", 2, Type::String),
                    ],
                    ..Default::default()
                },
            ],
            service: vec![ServiceDescriptorProto {
                name: Some("Calculator".into()),
                method: vec![MethodDescriptorProto {
                    name: Some("add".into()),
                    input_type: Some(".example.AddRequest".into()),
                    output_type: Some(".example.AddResponse".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };

        DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] }).unwrap()
    }
}
