//! Shared fixtures: an in-process health server and its descriptors.

use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, ServiceDescriptorProto,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic_health::server::HealthReporter;

/// Start a health server on an ephemeral port and return its URL.
pub async fn start_health_server() -> (String, HealthReporter) {
    let (mut reporter, service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (format!("http://{}", addr), reporter)
}

fn string_field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        ..Default::default()
    }
}

/// Descriptors for `grpc.health.v1.Health/Check`.
pub fn health_pool() -> DescriptorPool {
    let status_values = ["UNKNOWN", "SERVING", "NOT_SERVING", "SERVICE_UNKNOWN"]
        .iter()
        .enumerate()
        .map(|(number, name)| EnumValueDescriptorProto {
            name: Some((*name).into()),
            number: Some(number as i32),
            ..Default::default()
        })
        .collect();

    let file = FileDescriptorProto {
        name: Some("grpc/health/v1/health.proto".into()),
        package: Some("grpc.health.v1".into()),
        syntax: Some("proto3".into()),
        message_type: vec![
            DescriptorProto {
                name: Some("HealthCheckRequest".into()),
                field: vec![string_field("service", 1)],
                ..Default::default()
            },
            DescriptorProto {
                name: Some("HealthCheckResponse".into()),
                field: vec![FieldDescriptorProto {
                    name: Some("status".into()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Enum as i32),
                    type_name: Some(".grpc.health.v1.HealthCheckResponse.ServingStatus".into()),
                    ..Default::default()
                }],
                enum_type: vec![EnumDescriptorProto {
                    name: Some("ServingStatus".into()),
                    value: status_values,
                    ..Default::default()
                }],
                ..Default::default()
            },
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Health".into()),
            method: vec![MethodDescriptorProto {
                name: Some("Check".into()),
                input_type: Some(".grpc.health.v1.HealthCheckRequest".into()),
                output_type: Some(".grpc.health.v1.HealthCheckResponse".into()),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    };

    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] }).unwrap()
}
