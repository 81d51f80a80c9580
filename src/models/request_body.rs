//! Wire shapes sent to the scratchpad and service-gateway tiers.
//!
//! Optional fields are `Option`s skipped on serialization: the server's
//! schema validation rejects null or empty values in some deployments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::core::endpoints::{ScratchpadEndpoint, ServiceGatewayEndpoint};

pub const SAMPLE_FN: &str = "first";
pub const SAMPLE_SIZE: u32 = 10000;
pub const RETURN_FORMAT_TEXT: &str = "text";
pub const RETURN_FORMAT_STRUCTURED: &str = "structuredText";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,
    pub assembly: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dap: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadRequestBody {
    pub expression: String,
    pub language: String,
    pub context: String,
    pub sample_fn: String,
    pub sample_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_table_view: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_format: Option<String>,
}

/// Getdata parameters. Used as the scratchpad import `params` and, as is,
/// as the service-gateway API body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiParams {
    pub table: String,
    #[serde(rename = "startTS")]
    pub start_ts: String,
    #[serde(rename = "endTS")]
    pub end_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agg: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_cols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParams {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QsqlParams {
    pub query: String,
    pub scope: ScopeObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadImportApiBody {
    pub params: ApiParams,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub return_format: String,
    pub sample_fn: String,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadImportSqlBody {
    pub params: SqlParams,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub return_format: String,
    pub sample_fn: String,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadImportQsqlBody {
    pub params: QsqlParams,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub return_format: String,
    pub sample_fn: String,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadImportUdaBody {
    pub output: String,
    pub return_format: String,
    pub params: Map<String, Value>,
    pub parameter_types: BTreeMap<String, i32>,
    pub language: String,
    pub name: String,
    pub sample_fn: String,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScratchpadImportBody {
    Api(ScratchpadImportApiBody),
    Sql(ScratchpadImportSqlBody),
    Qsql(ScratchpadImportQsqlBody),
    Uda(ScratchpadImportUdaBody),
}

impl ScratchpadImportBody {
    pub fn endpoint(&self) -> ScratchpadEndpoint {
        match self {
            ScratchpadImportBody::Api(_) => ScratchpadEndpoint::Import,
            ScratchpadImportBody::Sql(_) => ScratchpadEndpoint::ImportSql,
            ScratchpadImportBody::Qsql(_) => ScratchpadEndpoint::ImportQsql,
            ScratchpadImportBody::Uda(_) => ScratchpadEndpoint::ImportUda,
        }
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            ScratchpadImportBody::Api(_) => "API",
            ScratchpadImportBody::Sql(_) => "SQL",
            ScratchpadImportBody::Qsql(_) => "QSQL",
            ScratchpadImportBody::Uda(_) => "UDA",
        }
    }

    /// The `params` member, for logging.
    pub fn params_json(&self) -> serde_json::Result<Value> {
        match self {
            ScratchpadImportBody::Api(body) => serde_json::to_value(&body.params),
            ScratchpadImportBody::Sql(body) => serde_json::to_value(&body.params),
            ScratchpadImportBody::Qsql(body) => serde_json::to_value(&body.params),
            ScratchpadImportBody::Uda(body) => Ok(Value::Object(body.params.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGatewaySqlBody {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGatewayQsqlBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<ScopeObject>,
    pub query: String,
    pub scope: ScopeObject,
}

/// A service-gateway request: which endpoint to hit and what to send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceGatewayRequest {
    Api(ApiParams),
    Sql(ServiceGatewaySqlBody),
    Qsql(ServiceGatewayQsqlBody),
    /// UDAs are posted to a path derived from their name; the body is the
    /// flat parameter map.
    Uda {
        name: String,
        params: Map<String, Value>,
    },
}

impl ServiceGatewayRequest {
    pub fn endpoint(&self) -> ServiceGatewayEndpoint {
        match self {
            ServiceGatewayRequest::Api(_) => ServiceGatewayEndpoint::Data,
            ServiceGatewayRequest::Sql(_) => ServiceGatewayEndpoint::Sql,
            ServiceGatewayRequest::Qsql(_) => ServiceGatewayEndpoint::Qsql,
            ServiceGatewayRequest::Uda { .. } => ServiceGatewayEndpoint::UdaBase,
        }
    }

    pub fn body(&self) -> serde_json::Result<Value> {
        match self {
            ServiceGatewayRequest::Api(body) => serde_json::to_value(body),
            ServiceGatewayRequest::Sql(body) => serde_json::to_value(body),
            ServiceGatewayRequest::Qsql(body) => serde_json::to_value(body),
            ServiceGatewayRequest::Uda { params, .. } => Ok(Value::Object(params.clone())),
        }
    }
}
