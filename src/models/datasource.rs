use serde::{Deserialize, Serialize};

use super::uda::UdaDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSourceType {
    Api,
    Qsql,
    Sql,
    Uda,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::Api => "API",
            DataSourceType::Qsql => "QSQL",
            DataSourceType::Sql => "SQL",
            DataSourceType::Uda => "UDA",
        }
    }
}

impl std::str::FromStr for DataSourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "API" => Ok(DataSourceType::Api),
            "QSQL" => Ok(DataSourceType::Qsql),
            "SQL" => Ok(DataSourceType::Sql),
            "UDA" => Ok(DataSourceType::Uda),
            other => Err(format!("Unknown datasource type: {}", other)),
        }
    }
}

/// Datasource document as the editor stores it. Every variant's fields are
/// kept; `selected_type` decides which one is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights_node: Option<String>,
    pub data_source: DataSourceSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSelection {
    pub selected_type: DataSourceType,
    #[serde(default)]
    pub api: ApiQuery,
    #[serde(default)]
    pub qsql: QsqlQuery,
    #[serde(default)]
    pub sql: SqlQuery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uda: Option<UdaDescriptor>,
}

/// The one query a datasource document currently describes.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceQuery {
    Api(ApiQuery),
    Sql(SqlQuery),
    Qsql(QsqlQuery),
    Uda(Option<UdaDescriptor>),
}

impl DataSourceQuery {
    pub fn kind(&self) -> DataSourceType {
        match self {
            DataSourceQuery::Api(_) => DataSourceType::Api,
            DataSourceQuery::Sql(_) => DataSourceType::Sql,
            DataSourceQuery::Qsql(_) => DataSourceType::Qsql,
            DataSourceQuery::Uda(_) => DataSourceType::Uda,
        }
    }
}

impl DataSourceFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            insights_node: None,
            data_source: DataSourceSelection {
                selected_type: DataSourceType::Api,
                api: ApiQuery::default(),
                qsql: QsqlQuery::default(),
                sql: SqlQuery::default(),
                uda: None,
            },
        }
    }

    pub fn active_query(&self) -> DataSourceQuery {
        let ds = &self.data_source;
        match ds.selected_type {
            DataSourceType::Api => DataSourceQuery::Api(ds.api.clone()),
            DataSourceType::Sql => DataSourceQuery::Sql(ds.sql.clone()),
            DataSourceType::Qsql => DataSourceQuery::Qsql(ds.qsql.clone()),
            DataSourceType::Uda => DataSourceQuery::Uda(ds.uda.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiQuery {
    pub selected_api: String,
    pub table: String,
    #[serde(rename = "startTS")]
    pub start_ts: String,
    #[serde(rename = "endTS")]
    pub end_ts: String,
    pub fill: String,
    pub temporality: String,
    pub filter: Vec<String>,
    pub group_by: Vec<String>,
    pub agg: Vec<String>,
    pub sort_cols: Vec<String>,
    pub slice: Vec<String>,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_row_limit_last: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<ApiOptional>,
}

/// Editor rows for the optional API parameters; inactive rows are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiOptional {
    pub filled: bool,
    pub temporal: bool,
    pub row_limit: bool,
    pub filters: Vec<Filter>,
    pub labels: Vec<Label>,
    pub sorts: Vec<Sort>,
    pub aggs: Vec<Agg>,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub active: bool,
    pub column: String,
    pub operator: String,
    pub values: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub active: bool,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sort {
    pub active: bool,
    pub column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Agg {
    pub active: bool,
    pub key: String,
    pub operator: String,
    pub column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub active: bool,
    pub column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QsqlQuery {
    pub query: String,
    pub selected_target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlQuery {
    pub query: String,
}
