//! Method resolution against compiled descriptor pools.

use crate::error::InvokeError;
use prost_reflect::{DescriptorPool, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor};
use std::fmt;

/// Wire type of a message field, reduced to what coercion cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
}

impl FieldKind {
    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Double | Self::Float)
    }
}

impl From<&Kind> for FieldKind {
    fn from(kind: &Kind) -> Self {
        match kind {
            Kind::Double => Self::Double,
            Kind::Float => Self::Float,
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Self::Int32,
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Self::Int64,
            Kind::Uint32 | Kind::Fixed32 => Self::Uint32,
            Kind::Uint64 | Kind::Fixed64 => Self::Uint64,
            Kind::Bool => Self::Bool,
            Kind::String => Self::String,
            Kind::Bytes => Self::Bytes,
            Kind::Enum(_) => Self::Enum,
            Kind::Message(_) => Self::Message,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Enum => "enum",
            Self::Message => "message",
        };
        f.write_str(name)
    }
}

/// A named, typed message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl From<FieldDescriptor> for FieldSpec {
    fn from(field: FieldDescriptor) -> Self {
        Self {
            name: field.name().to_string(),
            kind: FieldKind::from(&field.kind()),
        }
    }
}

/// A resolved RPC method with its ordered input and output fields.
#[derive(Debug, Clone)]
pub struct MethodSchema {
    pub service: String,
    pub method: String,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
    descriptor: MethodDescriptor,
}

impl MethodSchema {
    /// Find `method` by linear search over the pool's services.
    ///
    /// When `service` is given, only services whose short or fully
    /// qualified name matches are searched. The first match wins.
    pub fn resolve(
        pool: &DescriptorPool,
        service: Option<&str>,
        method: &str,
    ) -> Result<Self, InvokeError> {
        let descriptor = pool
            .services()
            .filter(|svc| service.map_or(true, |name| svc.name() == name || svc.full_name() == name))
            .find_map(|svc| svc.methods().find(|m| m.name() == method))
            .ok_or_else(|| match service {
                Some(name) => InvokeError::Resolve(format!("method {}.{} not found", name, method)),
                None => InvokeError::Resolve(format!("method {} not found", method)),
            })?;

        Ok(Self::from_descriptor(descriptor))
    }

    pub fn from_descriptor(descriptor: MethodDescriptor) -> Self {
        let inputs = ordered_fields(&descriptor.input());
        let outputs = ordered_fields(&descriptor.output());
        Self {
            service: descriptor.parent_service().full_name().to_string(),
            method: descriptor.name().to_string(),
            inputs,
            outputs,
            descriptor,
        }
    }

    /// Wire path, `/<package>.<service>/<method>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    pub fn input_descriptor(&self) -> MessageDescriptor {
        self.descriptor.input()
    }

    pub fn output_descriptor(&self) -> MessageDescriptor {
        self.descriptor.output()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|f| f.name.clone()).collect()
    }
}

// Declaration order, not field number order
fn ordered_fields(message: &MessageDescriptor) -> Vec<FieldSpec> {
    message
        .descriptor_proto()
        .field
        .iter()
        .filter_map(|proto| message.get_field_by_name(proto.name()))
        .map(FieldSpec::from)
        .collect()
}
