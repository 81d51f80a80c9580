use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaObject {
    #[serde(default)]
    pub header: HashMap<String, Value>,
    #[serde(default)]
    pub payload: MetaPayload,
}

/// Deployment-wide catalog returned by `servicegateway/meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaPayload {
    #[serde(default)]
    pub rc: Vec<MetaRc>,
    #[serde(default)]
    pub api: Vec<MetaApi>,
    #[serde(default)]
    pub agg: Vec<MetaAgg>,
    #[serde(default)]
    pub assembly: Vec<MetaAssembly>,
    #[serde(default)]
    pub schema: Vec<MetaSchema>,
    #[serde(default)]
    pub dap: Vec<MetaDap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaRc {
    #[serde(default)]
    pub rc: String,
    #[serde(default)]
    pub labels: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub started: String,
    #[serde(default)]
    pub api: i64,
    #[serde(default)]
    pub agg: i64,
    #[serde(default)]
    pub assembly: i64,
    #[serde(default)]
    pub schema: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaAgg {
    #[serde(default)]
    pub agg_fn: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub procs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaApi {
    pub api: String,
    #[serde(default)]
    pub agg_fn: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub procs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaAssembly {
    pub assembly: String,
    #[serde(default)]
    pub tbls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<MetaDap>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaSchema {
    pub table: String,
    #[serde(default)]
    pub assembly: String,
    #[serde(default, rename = "type")]
    pub table_type: String,
    #[serde(default)]
    pub columns: Vec<MetaColumn>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaColumn {
    pub column: String,
    #[serde(default)]
    pub typ: i32,
    #[serde(default)]
    pub anymap: bool,
    #[serde(default)]
    pub attr_disk: String,
    #[serde(default, rename = "attrIDisk")]
    pub attr_i_disk: String,
    #[serde(default)]
    pub attr_mem: String,
    #[serde(default)]
    pub foreign: String,
    #[serde(default)]
    pub is_serialized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDap {
    #[serde(default)]
    pub dap: String,
    #[serde(default)]
    pub assembly: String,
    #[serde(default, rename = "startTS")]
    pub start_ts: String,
    #[serde(default, rename = "endTS")]
    pub end_ts: String,
    #[serde(default)]
    pub labels: Value,
    #[serde(default)]
    pub instance: String,
}

/// Sections of the meta payload that editors ask for individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaInfoType {
    Meta,
    Schema,
    Api,
    Agg,
    Dap,
    Rc,
}

impl MetaPayload {
    pub fn section_json(&self, kind: MetaInfoType) -> serde_json::Result<String> {
        match kind {
            MetaInfoType::Meta => serde_json::to_string(self),
            MetaInfoType::Schema => serde_json::to_string(&self.schema),
            MetaInfoType::Api => serde_json::to_string(&self.api),
            MetaInfoType::Agg => serde_json::to_string(&self.agg),
            MetaInfoType::Dap => serde_json::to_string(&self.dap),
            MetaInfoType::Rc => serde_json::to_string(&self.rc),
        }
    }

    /// Custom APIs (UDAs) exposed by the deployment.
    pub fn custom_apis(&self) -> impl Iterator<Item = &MetaApi> {
        self.api.iter().filter(|api| api.custom)
    }
}
