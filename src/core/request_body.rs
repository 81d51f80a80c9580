use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use super::query::{qsql_wrapper, split_target};
use crate::error::{InsightsError, Result};
use crate::models::datasource::{ApiOptional, ApiQuery, DataSourceQuery, QsqlQuery, SqlQuery};
use crate::models::request_body::{
    ApiParams, QsqlParams, ScratchpadImportApiBody, ScratchpadImportBody,
    ScratchpadImportQsqlBody, ScratchpadImportSqlBody, ScratchpadImportUdaBody,
    ScratchpadRequestBody, ServiceGatewayQsqlBody, ServiceGatewayRequest, ServiceGatewaySqlBody,
    SqlParams, RETURN_FORMAT_TEXT, SAMPLE_FN, SAMPLE_SIZE,
};
use crate::models::uda::{UdaDescriptor, UdaRequestBody};
use crate::utils::time::TimestampFormatter;

/// Result shape requested from scratchpad execution. The choice depends on
/// the deployment version and is made by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchpadFormat {
    ReturnFormat(String),
    TableView(bool),
    Unspecified,
}

/// Builds wire bodies for each (tier, query type). Builders are pure apart
/// from timestamp formatting.
#[derive(Clone)]
pub struct RequestBodyBuilder {
    formatter: Arc<dyn TimestampFormatter>,
}

impl RequestBodyBuilder {
    pub fn new(formatter: Arc<dyn TimestampFormatter>) -> Self {
        Self { formatter }
    }

    pub fn scratchpad_query_body(
        &self,
        expression: &str,
        context: Option<&str>,
        is_python: bool,
        format: ScratchpadFormat,
    ) -> ScratchpadRequestBody {
        let (is_table_view, return_format) = match format {
            ScratchpadFormat::ReturnFormat(f) => (None, Some(f)),
            ScratchpadFormat::TableView(v) => (Some(v), None),
            ScratchpadFormat::Unspecified => (None, None),
        };

        ScratchpadRequestBody {
            expression: expression.to_string(),
            language: if is_python { "python" } else { "q" }.to_string(),
            context: context
                .filter(|c| !c.is_empty())
                .unwrap_or(".")
                .to_string(),
            sample_fn: SAMPLE_FN.to_string(),
            sample_size: SAMPLE_SIZE,
            is_table_view,
            return_format,
        }
    }

    /// Body for populating `variable` in the scratchpad. UDAs are resolved
    /// through `resolve_uda`; its error is returned as is.
    pub fn scratchpad_import_body<F>(
        &self,
        query: &DataSourceQuery,
        variable: &str,
        resolve_uda: F,
    ) -> Result<ScratchpadImportBody>
    where
        F: FnOnce(Option<&UdaDescriptor>) -> Result<UdaRequestBody>,
    {
        match query {
            DataSourceQuery::Api(api) => Ok(ScratchpadImportBody::Api(
                self.scratchpad_api_import(api, variable),
            )),
            DataSourceQuery::Sql(sql) => Ok(ScratchpadImportBody::Sql(
                self.scratchpad_sql_import(sql, variable)?,
            )),
            DataSourceQuery::Qsql(qsql) => Ok(ScratchpadImportBody::Qsql(
                self.scratchpad_qsql_import(qsql, variable, false)?,
            )),
            DataSourceQuery::Uda(uda) => {
                let resolved = resolve_uda(uda.as_ref())?;
                Ok(ScratchpadImportBody::Uda(
                    self.scratchpad_uda_import(resolved, variable),
                ))
            }
        }
    }

    pub fn scratchpad_api_import(&self, api: &ApiQuery, variable: &str) -> ScratchpadImportApiBody {
        ScratchpadImportApiBody {
            params: self.api_params(api),
            language: "q".to_string(),
            output: non_empty(variable),
            return_format: RETURN_FORMAT_TEXT.to_string(),
            sample_fn: SAMPLE_FN.to_string(),
            sample_size: SAMPLE_SIZE,
        }
    }

    pub fn scratchpad_sql_import(
        &self,
        sql: &SqlQuery,
        variable: &str,
    ) -> Result<ScratchpadImportSqlBody> {
        Ok(ScratchpadImportSqlBody {
            params: SqlParams {
                query: require_query(&sql.query, "populate scratchpad")?,
            },
            language: "sql".to_string(),
            output: non_empty(variable),
            return_format: RETURN_FORMAT_TEXT.to_string(),
            sample_fn: SAMPLE_FN.to_string(),
            sample_size: SAMPLE_SIZE,
        })
    }

    pub fn scratchpad_qsql_import(
        &self,
        qsql: &QsqlQuery,
        variable: &str,
        is_python: bool,
    ) -> Result<ScratchpadImportQsqlBody> {
        let query = require_query(&qsql.query, "populate scratchpad")?;
        let scope = split_target(&qsql.selected_target);

        Ok(ScratchpadImportQsqlBody {
            instance: scope.tier.clone(),
            params: QsqlParams {
                query: qsql_wrapper(&query, is_python)?,
                scope,
            },
            language: "q".to_string(),
            output: non_empty(variable),
            return_format: RETURN_FORMAT_TEXT.to_string(),
            sample_fn: SAMPLE_FN.to_string(),
            sample_size: SAMPLE_SIZE,
        })
    }

    pub fn scratchpad_uda_import(
        &self,
        uda: UdaRequestBody,
        variable: &str,
    ) -> ScratchpadImportUdaBody {
        ScratchpadImportUdaBody {
            output: variable.to_string(),
            return_format: RETURN_FORMAT_TEXT.to_string(),
            params: uda.params,
            parameter_types: uda.parameter_types,
            language: uda.language,
            name: uda.name,
            sample_fn: uda.sample_fn,
            sample_size: uda.sample_size,
        }
    }

    /// Request for running a datasource directly against the service
    /// gateway.
    pub fn service_gateway_request<F>(
        &self,
        query: &DataSourceQuery,
        resolve_uda: F,
    ) -> Result<ServiceGatewayRequest>
    where
        F: FnOnce(Option<&UdaDescriptor>) -> Result<UdaRequestBody>,
    {
        match query {
            DataSourceQuery::Api(api) => Ok(ServiceGatewayRequest::Api(self.api_params(api))),
            DataSourceQuery::Sql(sql) => Ok(ServiceGatewayRequest::Sql(ServiceGatewaySqlBody {
                query: require_query(&sql.query, "execute")?,
            })),
            DataSourceQuery::Qsql(qsql) => Ok(ServiceGatewayRequest::Qsql(
                self.service_gateway_qsql(qsql, false)?,
            )),
            DataSourceQuery::Uda(uda) => {
                let resolved = resolve_uda(uda.as_ref())?;
                Ok(ServiceGatewayRequest::Uda {
                    name: resolved.name,
                    params: resolved.params,
                })
            }
        }
    }

    pub fn service_gateway_qsql(
        &self,
        qsql: &QsqlQuery,
        is_python: bool,
    ) -> Result<ServiceGatewayQsqlBody> {
        let query = require_query(&qsql.query, "execute")?;
        Ok(ServiceGatewayQsqlBody {
            labels: None,
            query: qsql_wrapper(&query, is_python)?,
            scope: split_target(&qsql.selected_target),
        })
    }

    /// getData parameters. Editors with optional rows use only the active
    /// rows; otherwise the plain fields are copied when set.
    pub fn api_params(&self, api: &ApiQuery) -> ApiParams {
        let mut params = ApiParams {
            table: api.table.clone(),
            start_ts: self.formatter.to_fixed_nanos(&api.start_ts),
            end_ts: self.formatter.to_fixed_nanos(&api.end_ts),
            fill: None,
            temporality: None,
            filter: None,
            group_by: None,
            agg: None,
            sort_cols: None,
            slice: None,
            labels: None,
            limit: None,
        };

        match &api.optional {
            Some(optional) => apply_optional(&mut params, api, optional),
            None => apply_simple(&mut params, api),
        }

        params
    }
}

fn apply_simple(params: &mut ApiParams, api: &ApiQuery) {
    params.fill = non_empty(&api.fill);
    params.temporality = non_empty(&api.temporality);
    params.filter = non_empty_list(&api.filter).map(string_array);
    params.group_by = non_empty_list(&api.group_by);
    params.agg = non_empty_list(&api.agg).map(string_array);
    params.sort_cols = non_empty_list(&api.sort_cols);
    params.slice = non_empty_list(&api.slice);
    params.labels = non_empty_list(&api.labels).map(string_array);
    params.limit = encode_limit(api.row_count_limit.as_deref(), api.is_row_limit_last);
}

fn apply_optional(params: &mut ApiParams, api: &ApiQuery, optional: &ApiOptional) {
    if optional.filled {
        params.fill = non_empty(&api.fill);
    }
    if optional.temporal {
        params.temporality = non_empty(&api.temporality);
    }
    if optional.row_limit {
        params.limit = encode_limit(api.row_count_limit.as_deref(), api.is_row_limit_last);
    }

    let labels: Map<String, Value> = optional
        .labels
        .iter()
        .filter(|label| label.active)
        .map(|label| (label.key.clone(), Value::String(label.value.clone())))
        .collect();
    if !labels.is_empty() {
        params.labels = Some(Value::Object(labels));
    }

    let filters: Vec<Value> = optional
        .filters
        .iter()
        .filter(|filter| filter.active)
        .map(|filter| {
            Value::Array(vec![
                Value::String(filter.operator.clone()),
                Value::String(filter.column.clone()),
                Value::String(filter.values.clone()),
            ])
        })
        .collect();
    if !filters.is_empty() {
        params.filter = Some(Value::Array(filters));
    }

    let sorts: Vec<String> = optional
        .sorts
        .iter()
        .filter(|sort| sort.active)
        .map(|sort| sort.column.clone())
        .collect();
    params.sort_cols = non_empty_list(&sorts);

    let aggs: Vec<Value> = optional
        .aggs
        .iter()
        .filter(|agg| agg.active)
        .map(|agg| {
            Value::Array(vec![
                Value::String(agg.key.clone()),
                Value::String(agg.operator.clone()),
                Value::String(agg.column.clone()),
            ])
        })
        .collect();
    if !aggs.is_empty() {
        params.agg = Some(Value::Array(aggs));
    }

    let groups: Vec<String> = optional
        .groups
        .iter()
        .filter(|group| group.active)
        .map(|group| group.column.clone())
        .collect();
    params.group_by = non_empty_list(&groups);
}

/// Signed row limit: negative counts from the end of the result. The editor
/// value is a row count, so negative input is dropped like any other
/// unusable value.
pub fn encode_limit(row_count_limit: Option<&str>, is_row_limit_last: Option<bool>) -> Option<i64> {
    let raw = row_count_limit.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse::<i64>() {
        Ok(limit) if limit < 0 => {
            warn!("Ignoring negative row limit {:?}", raw);
            None
        }
        Ok(limit) if is_row_limit_last == Some(true) => Some(-limit),
        Ok(limit) => Some(limit),
        Err(e) => {
            warn!("Ignoring row limit {:?}: {}", raw, e);
            None
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn non_empty_list(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn string_array(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

fn require_query(query: &str, action: &str) -> Result<String> {
    if query.trim().is_empty() {
        return Err(InsightsError::InvalidRequest(format!(
            "No query provided to {}.",
            action
        )));
    }
    Ok(query.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasource::{Agg, Filter, Group, Label, Sort};
    use crate::utils::time::ChronoTimestampFormatter;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn builder() -> RequestBodyBuilder {
        RequestBodyBuilder::new(Arc::new(ChronoTimestampFormatter))
    }

    fn api_query() -> ApiQuery {
        ApiQuery {
            selected_api: "getData".to_string(),
            table: "trades".to_string(),
            start_ts: "2024-01-01".to_string(),
            end_ts: "2024-01-02T10:30".to_string(),
            ..Default::default()
        }
    }

    fn no_uda(_: Option<&UdaDescriptor>) -> Result<UdaRequestBody> {
        Err(InsightsError::UdaUnavailable("UDA is undefined".to_string()))
    }

    fn keys(value: &Value) -> Vec<String> {
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_encode_limit() {
        assert_eq!(encode_limit(Some("100"), Some(true)), Some(-100));
        assert_eq!(encode_limit(Some("100"), Some(false)), Some(100));
        assert_eq!(encode_limit(Some("100"), None), Some(100));
        assert_eq!(encode_limit(Some(""), Some(true)), None);
        assert_eq!(encode_limit(None, Some(true)), None);
        assert_eq!(encode_limit(Some("ten"), Some(false)), None);
        assert_eq!(encode_limit(Some(" 0 "), Some(true)), Some(0));
    }

    #[test]
    fn test_encode_limit_rejects_negative_counts() {
        assert_eq!(encode_limit(Some("-5"), Some(true)), None);
        assert_eq!(encode_limit(Some("-5"), Some(false)), None);
        assert_eq!(encode_limit(Some("-9223372036854775808"), Some(true)), None);
        assert_eq!(
            encode_limit(Some("9223372036854775807"), Some(true)),
            Some(-9223372036854775807)
        );
    }

    #[test]
    fn test_api_limit_in_body() {
        let mut api = api_query();
        api.row_count_limit = Some("100".to_string());
        api.is_row_limit_last = Some(true);
        let body = serde_json::to_value(builder().api_params(&api)).unwrap();
        assert_eq!(body["limit"], -100);

        api.is_row_limit_last = Some(false);
        let body = serde_json::to_value(builder().api_params(&api)).unwrap();
        assert_eq!(body["limit"], 100);

        api.row_count_limit = Some(String::new());
        let body = serde_json::to_value(builder().api_params(&api)).unwrap();
        assert!(body.get("limit").is_none());
    }

    #[test]
    fn test_api_body_elides_unset_fields() {
        let body = serde_json::to_value(builder().api_params(&api_query())).unwrap();
        assert_eq!(keys(&body), vec!["endTS", "startTS", "table"]);
        assert_eq!(body["startTS"], "2024-01-01T00:00:00.000000000");
        assert_eq!(body["endTS"], "2024-01-02T10:30:00.000000000");
    }

    #[test]
    fn test_api_body_simple_fields() {
        let mut api = api_query();
        api.fill = "zero".to_string();
        api.group_by = vec!["sym".to_string()];
        api.sort_cols = vec!["time".to_string()];
        let body = serde_json::to_value(builder().api_params(&api)).unwrap();
        assert_eq!(body["fill"], "zero");
        assert_eq!(body["groupBy"], json!(["sym"]));
        assert_eq!(body["sortCols"], json!(["time"]));
        assert!(body.get("temporality").is_none());
        assert!(body.get("slice").is_none());
    }

    #[test]
    fn test_api_body_optional_rows() {
        let mut api = api_query();
        api.fill = "forward".to_string();
        api.temporality = "snapshot".to_string();
        api.row_count_limit = Some("5".to_string());
        api.is_row_limit_last = Some(true);
        api.optional = Some(ApiOptional {
            filled: true,
            temporal: false,
            row_limit: true,
            filters: vec![
                Filter {
                    active: true,
                    column: "price".to_string(),
                    operator: ">".to_string(),
                    values: "10".to_string(),
                },
                Filter {
                    active: false,
                    column: "size".to_string(),
                    operator: "<".to_string(),
                    values: "1".to_string(),
                },
            ],
            labels: vec![Label {
                active: true,
                key: "region".to_string(),
                value: "us".to_string(),
            }],
            sorts: vec![Sort { active: true, column: "time".to_string() }],
            aggs: vec![Agg {
                active: true,
                key: "avgPrice".to_string(),
                operator: "avg".to_string(),
                column: "price".to_string(),
            }],
            groups: vec![Group { active: false, column: "sym".to_string() }],
        });

        let body = serde_json::to_value(builder().api_params(&api)).unwrap();
        assert_eq!(body["fill"], "forward");
        assert!(body.get("temporality").is_none());
        assert_eq!(body["limit"], -5);
        assert_eq!(body["filter"], json!([[">", "price", "10"]]));
        assert_eq!(body["labels"], json!({"region": "us"}));
        assert_eq!(body["sortCols"], json!(["time"]));
        assert_eq!(body["agg"], json!([["avgPrice", "avg", "price"]]));
        assert!(body.get("groupBy").is_none());
    }

    #[test]
    fn test_scratchpad_query_body() {
        let b = builder();
        let body = b.scratchpad_query_body(
            "til 10",
            None,
            false,
            ScratchpadFormat::ReturnFormat("structuredText".to_string()),
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            json!({
                "expression": "til 10",
                "language": "q",
                "context": ".",
                "sampleFn": "first",
                "sampleSize": 10000,
                "returnFormat": "structuredText"
            })
        );

        let body = b.scratchpad_query_body("1+1", Some(".ctx"), true, ScratchpadFormat::TableView(false));
        assert_eq!(body.language, "python");
        assert_eq!(body.context, ".ctx");
        assert_eq!(body.is_table_view, Some(false));
        assert_eq!(body.return_format, None);

        let json = serde_json::to_value(b.scratchpad_query_body("", None, false, ScratchpadFormat::Unspecified)).unwrap();
        assert!(json.get("isTableView").is_none());
        assert!(json.get("returnFormat").is_none());
    }

    #[test]
    fn test_scratchpad_qsql_import() {
        let qsql = QsqlQuery {
            query: "select from trades\nselect from quotes".to_string(),
            selected_target: "myassembly-qe instance1 dap7".to_string(),
        };
        let body = builder().scratchpad_qsql_import(&qsql, "out", false).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            json!({
                "params": {
                    "query": "select from trades;select from quotes",
                    "scope": {"affinity": "soft", "assembly": "myassembly", "tier": "instance1", "dap": "dap7"}
                },
                "language": "q",
                "instance": "instance1",
                "output": "out",
                "returnFormat": "text",
                "sampleFn": "first",
                "sampleSize": 10000
            })
        );
    }

    #[test]
    fn test_scratchpad_qsql_import_two_token_target() {
        let qsql = QsqlQuery {
            query: "a:1".to_string(),
            selected_target: "asm tier1".to_string(),
        };
        let body = builder().scratchpad_qsql_import(&qsql, "", false).unwrap();
        assert_eq!(body.params.scope.assembly, "asm");
        assert_eq!(body.instance.as_deref(), Some("tier1"));
        assert_eq!(body.params.scope.dap, None);
        assert_eq!(body.output, None);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let b = builder();
        let err = b
            .scratchpad_import_body(&DataSourceQuery::Sql(SqlQuery::default()), "x", no_uda)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid request: No query provided to populate scratchpad."
        );
        assert!(b
            .service_gateway_request(&DataSourceQuery::Qsql(QsqlQuery::default()), no_uda)
            .is_err());
    }

    #[test]
    fn test_uda_error_propagates_unbuilt() {
        let b = builder();
        let err = b
            .scratchpad_import_body(&DataSourceQuery::Uda(None), "x", no_uda)
            .unwrap_err();
        assert!(matches!(err, InsightsError::UdaUnavailable(_)));
        assert!(b
            .service_gateway_request(&DataSourceQuery::Uda(None), no_uda)
            .is_err());
    }

    #[test]
    fn test_uda_bodies() {
        let mut params = Map::new();
        params.insert("n".to_string(), json!("5"));
        let mut types = BTreeMap::new();
        types.insert("n".to_string(), -7);
        let resolved = UdaRequestBody {
            language: "q".to_string(),
            name: ".example.fn".to_string(),
            parameter_types: types,
            params,
            return_format: "structuredText".to_string(),
            sample_fn: "first".to_string(),
            sample_size: 10000,
        };

        let b = builder();
        let uda = DataSourceQuery::Uda(Some(UdaDescriptor::default()));
        let import = b
            .scratchpad_import_body(&uda, "out", |_| Ok(resolved.clone()))
            .unwrap();
        let json = serde_json::to_value(&import).unwrap();
        assert_eq!(json["output"], "out");
        assert_eq!(json["returnFormat"], "text");
        assert_eq!(json["parameterTypes"], json!({"n": -7}));
        assert_eq!(json["name"], ".example.fn");

        let request = b.service_gateway_request(&uda, |_| Ok(resolved.clone())).unwrap();
        assert_eq!(request.body().unwrap(), json!({"n": "5"}));
    }

    #[test]
    fn test_service_gateway_sql_and_qsql() {
        let b = builder();
        let sql = DataSourceQuery::Sql(SqlQuery { query: "select 1".to_string() });
        let request = b.service_gateway_request(&sql, no_uda).unwrap();
        assert_eq!(request.body().unwrap(), json!({"query": "select 1"}));

        let qsql = DataSourceQuery::Qsql(QsqlQuery {
            query: "a:1 / set a".to_string(),
            selected_target: "asm-qe".to_string(),
        });
        let request = b.service_gateway_request(&qsql, no_uda).unwrap();
        assert_eq!(
            request.body().unwrap(),
            json!({"query": "a:1", "scope": {"affinity": "soft", "assembly": "asm"}})
        );
    }
}
