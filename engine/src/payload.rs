//! Payload schemas and typed payload decoding.
//!
//! Every operation type carries a JSON payload. Payloads are validated
//! against a per-type field list before they are replayed; a payload that
//! fails validation can never succeed and is routed to the conflict log.

use crate::{error::Result, Error, OperationType, Timestamp};
use serde::{Deserialize, Serialize};

/// Field types supported in payload schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Float,
    Timestamp,
    Object,
    Array,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Object => write!(f, "Object"),
            FieldType::Array => write!(f, "Array"),
        }
    }
}

/// Definition of a field in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: &'static str,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub const fn optional(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.to_string()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Float => value.is_number(),
            FieldType::Timestamp => value.is_u64(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.to_string(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_u64() => "Timestamp",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

const DELIVERY_COMPLETION_FIELDS: &[FieldDef] = &[
    FieldDef::required("stopId", FieldType::String),
    FieldDef::required("completedAt", FieldType::Timestamp),
    FieldDef::optional("recipient", FieldType::String),
    FieldDef::optional("notes", FieldType::String),
];

const LOCATION_UPDATE_FIELDS: &[FieldDef] = &[FieldDef::required("samples", FieldType::Array)];

const LOCATION_SAMPLE_FIELDS: &[FieldDef] = &[
    FieldDef::required("id", FieldType::String),
    FieldDef::required("latitude", FieldType::Float),
    FieldDef::required("longitude", FieldType::Float),
    FieldDef::required("accuracy", FieldType::Float),
    FieldDef::required("capturedAt", FieldType::Timestamp),
];

const ROUTE_STATUS_FIELDS: &[FieldDef] = &[
    FieldDef::required("routeId", FieldType::String),
    FieldDef::required("action", FieldType::String),
    FieldDef::required("at", FieldType::Timestamp),
];

const ORDER_UPDATE_FIELDS: &[FieldDef] = &[
    FieldDef::required("orderId", FieldType::String),
    FieldDef::required("capturedAt", FieldType::Timestamp),
    FieldDef::required("changes", FieldType::Object),
];

/// Field list for an operation type.
pub fn fields_for(kind: OperationType) -> &'static [FieldDef] {
    match kind {
        OperationType::DeliveryCompletion => DELIVERY_COMPLETION_FIELDS,
        OperationType::LocationUpdate => LOCATION_UPDATE_FIELDS,
        OperationType::RouteStatus => ROUTE_STATUS_FIELDS,
        OperationType::OrderUpdate => ORDER_UPDATE_FIELDS,
    }
}

fn validate_object(fields: &[FieldDef], payload: &serde_json::Value) -> Result<()> {
    let obj = payload
        .as_object()
        .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

    for field in fields {
        field.validate(obj.get(field.name))?;
    }

    Ok(())
}

/// Validate a payload against the schema of its operation type.
pub fn validate(kind: OperationType, payload: &serde_json::Value) -> Result<()> {
    validate_object(fields_for(kind), payload)?;

    match kind {
        OperationType::LocationUpdate => {
            let samples = payload["samples"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            if samples.is_empty() {
                return Err(Error::InvalidPayload("samples must not be empty".into()));
            }
            for sample in samples {
                validate_object(LOCATION_SAMPLE_FIELDS, sample)?;
            }
        }
        OperationType::RouteStatus => {
            let action = payload["action"].as_str().unwrap_or_default();
            RouteAction::parse(action)?;
        }
        OperationType::DeliveryCompletion | OperationType::OrderUpdate => {}
    }

    Ok(())
}

/// Route lifecycle transitions an agent can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    Start,
    Complete,
}

impl RouteAction {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(RouteAction::Start),
            "complete" => Ok(RouteAction::Complete),
            other => Err(Error::InvalidPayload(format!(
                "unknown route action: {other}"
            ))),
        }
    }
}

/// Payload of a `delivery_completion` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCompletion {
    pub stop_id: String,
    pub completed_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A single sample inside a `location_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplePayload {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: Timestamp,
}

/// Payload of a `location_update` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub samples: Vec<SamplePayload>,
}

/// Payload of a `route_status` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub route_id: String,
    pub action: RouteAction,
    pub at: Timestamp,
}

/// Payload of an `order_update` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: String,
    pub captured_at: Timestamp,
    pub changes: serde_json::Map<String, serde_json::Value>,
}

/// A validated, typed operation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    DeliveryCompletion(DeliveryCompletion),
    LocationUpdate(LocationUpdate),
    RouteStatus(RouteStatus),
    OrderUpdate(OrderUpdate),
}

impl Payload {
    /// Validate and decode a raw payload.
    pub fn decode(kind: OperationType, payload: &serde_json::Value) -> Result<Self> {
        validate(kind, payload)?;

        let decoded = match kind {
            OperationType::DeliveryCompletion => Payload::DeliveryCompletion(from_value(payload)?),
            OperationType::LocationUpdate => Payload::LocationUpdate(from_value(payload)?),
            OperationType::RouteStatus => Payload::RouteStatus(from_value(payload)?),
            OperationType::OrderUpdate => Payload::OrderUpdate(from_value(payload)?),
        };

        Ok(decoded)
    }
}

fn from_value<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone()).map_err(|e| Error::InvalidPayload(e.to_string()))
}
