use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use kdb_insights_core::core::endpoints::EndpointTier;
use kdb_insights_core::core::request_body::RequestBodyBuilder;
use kdb_insights_core::core::{ConnectionRegistry, ConnectionSession, InsightsVersion, ScratchpadOptions};
use kdb_insights_core::models::datasource::{DataSourceFile, DataSourceType, QsqlQuery, SqlQuery};
use kdb_insights_core::models::deployment::{ConnectionState, DeploymentIdentity};
use kdb_insights_core::models::meta::MetaInfoType;
use kdb_insights_core::models::request_body::{ServiceGatewayRequest, ServiceGatewaySqlBody};
use kdb_insights_core::models::uda::{ParamTypes, UdaDescriptor, UdaParam};
use kdb_insights_core::utils::progress::ProgressReporter;
use kdb_insights_core::utils::time::ChronoTimestampFormatter;
use kdb_insights_core::utils::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError,
};
use kdb_insights_core::utils::StaticTokenProvider;
use kdb_insights_core::InsightsError;

const SERVER: &str = "https://insights.example.com/";

#[derive(Clone)]
enum Route {
    Json(Value),
    Bytes(Vec<u8>),
    Fail(u16, Vec<u8>),
    Hang,
}

/// Answers by URL suffix and records every request.
#[derive(Default)]
struct StubTransport {
    routes: Mutex<Vec<(String, Route)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    fn route(self, suffix: &str, route: Route) -> Self {
        self.routes.lock().unwrap().push((suffix.to_string(), route));
        self
    }

    fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .cloned()
            .collect()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let route = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(suffix, _)| request.url.ends_with(suffix.as_str()))
            .map(|(_, route)| route.clone());

        match route {
            Some(Route::Json(value)) => Ok(HttpResponse::json(200, &value)),
            Some(Route::Bytes(body)) => Ok(HttpResponse { status: 200, body }),
            Some(Route::Fail(status, body)) => Err(TransportError::Status { status, body }),
            Some(Route::Hang) => std::future::pending().await,
            None => Err(TransportError::Status {
                status: 404,
                body: b"not found".to_vec(),
            }),
        }
    }
}

struct ManualProgress {
    token: CancellationToken,
}

impl ProgressReporter for ManualProgress {
    fn report(&self, _message: &str) {}

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}

fn jwt(username: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(json!({ "preferred_username": username }).to_string())
    )
}

fn meta_with_uda() -> Value {
    json!({
        "header": {},
        "payload": {
            "rc": [], "agg": [], "assembly": [], "schema": [{"table": "trades", "assembly": "asm", "type": "partitioned", "columns": []}], "dap": [],
            "api": [
                {"api": "getData", "custom": false},
                {
                    "api": ".example.fn",
                    "custom": true,
                    "metadata": {
                        "description": "example",
                        "params": [{"name": "n", "type": -7, "isReq": true}],
                        "return": {"type": [98], "description": ""}
                    }
                }
            ]
        }
    })
}

fn stub(version: &str) -> StubTransport {
    StubTransport::default()
        .route("kxicontroller/config", Route::Json(json!({ "version": version })))
        .route("servicegateway/meta", Route::Json(meta_with_uda()))
        .route("api/config", Route::Json(json!({"version": "1.13", "queryEnvironmentsEnabled": true})))
        .route("scratchpad/display", Route::Json(json!({"error": "", "data": "1"})))
}

fn session(transport: Arc<StubTransport>) -> ConnectionSession {
    let identity = DeploymentIdentity::new("dev", SERVER, "dev");
    let tokens = StaticTokenProvider::new(Some(jwt("alice")));
    ConnectionSession::new(identity, transport, Arc::new(tokens))
}

async fn connected(transport: Arc<StubTransport>) -> ConnectionSession {
    let mut session = session(transport);
    assert!(session.connect().await);
    session
}

fn body_of(request: &HttpRequest) -> Value {
    request.body.clone().unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_connect_resolves_version_and_endpoints() {
    let transport = Arc::new(stub("servicebroker-1.12.0-x"));
    let mut session = connected(transport.clone()).await;

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.version(), Some(InsightsVersion::new(1, 12)));
    assert_eq!(
        session.endpoints().unwrap().scratchpad.scratchpad,
        "scratchpadmanager/scratchpad/display"
    );

    let config = session.get_config().await.unwrap().unwrap();
    assert_eq!(config.version, "servicebroker-1.12.0-x");
    assert_eq!(session.version(), Some(InsightsVersion::new(1, 12)));

    // below 1.13 there is no api/config
    assert!(transport.requests_to("api/config").is_empty());
    assert!(session.api_config().is_none());
}

#[tokio::test]
async fn test_connect_sequence() {
    let transport = Arc::new(stub("service-1.13.2"));
    let session = connected(transport.clone()).await;

    let urls: Vec<String> = transport
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.url.trim_start_matches(SERVER).to_string())
        .collect();
    assert_eq!(
        urls,
        vec![
            "kxicontroller/config",
            "servicegateway/meta",
            "api/config",
            "scratchpadmanager/scratchpad/display",
        ]
    );

    let api_config = transport.requests_to("api/config");
    assert_eq!(api_config[0].method, HttpMethod::Get);
    assert_eq!(api_config[0].header("username"), Some("alice"));
    assert!(session.api_config().unwrap().query_environments_enabled);

    let warm_up = body_of(&transport.requests_to("scratchpad/display")[0]);
    assert_eq!(warm_up["expression"], "");
    assert_eq!(warm_up["language"], "q");
}

#[tokio::test]
async fn test_connect_without_token_fails() {
    let transport = Arc::new(stub("service-1.12.0"));
    let identity = DeploymentIdentity::new("dev", SERVER, "dev");
    let mut session = ConnectionSession::new(
        identity,
        transport.clone(),
        Arc::new(StaticTokenProvider::default()),
    );

    assert!(!session.connect().await);
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(transport.request_count(), 0);
    assert!(session.get_config().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unparsable_version_falls_back_to_base_endpoints() {
    let transport = Arc::new(stub("dev-build"));
    let session = connected(transport.clone()).await;

    assert_eq!(session.version(), None);
    assert_eq!(
        session.retrieve_endpoints(EndpointTier::Scratchpad, "scratchpad"),
        Some("servicebroker/scratchpad/display")
    );
    assert_eq!(transport.requests_to("servicebroker/scratchpad/display").len(), 1);
}

#[tokio::test]
async fn test_config_failure_leaves_partial_state() {
    let transport = Arc::new(
        StubTransport::default()
            .route("kxicontroller/config", Route::Fail(503, b"down".to_vec()))
            .route("servicegateway/meta", Route::Json(meta_with_uda())),
    );
    let session = connected(transport).await;

    assert!(session.is_connected());
    assert!(session.config().is_none());
    assert_eq!(
        session.retrieve_endpoints(EndpointTier::Scratchpad, "reset"),
        Some("servicebroker/scratchpad/reset")
    );
    assert!(session.meta().is_some());
}

#[tokio::test]
async fn test_datasource_query_error_is_returned_not_raised() {
    let transport = Arc::new(
        stub("service-1.12.0").route("servicegateway/data", Route::Fail(500, b"boom".to_vec())),
    );
    let session = connected(transport).await;

    let builder = RequestBodyBuilder::new(Arc::new(ChronoTimestampFormatter));
    let mut file = DataSourceFile::new("ds");
    file.data_source.api.table = "trades".to_string();
    let request = builder
        .service_gateway_request(&file.active_query(), |_| unreachable!())
        .unwrap();

    let result = session.get_datasource_query(&request).await.unwrap().unwrap();
    assert_eq!(result.error.unwrap().buffer, b"boom".to_vec());
    assert_eq!(result.array_buffer, None);
}

#[tokio::test]
async fn test_datasource_query_decompresses() {
    let mut compressed = vec![1, 1, 1, 0, 17, 0, 0, 0, 14, 0, 0, 0];
    compressed.extend_from_slice(&[0b100, b'a', b'b', b'a' ^ b'b', 2]);
    let transport = Arc::new(
        stub("service-1.12.0").route("servicegateway/qe/sql", Route::Bytes(compressed)),
    );
    let session = connected(transport.clone()).await;

    let request = ServiceGatewayRequest::Sql(ServiceGatewaySqlBody {
        query: "select * from trades".to_string(),
    });
    let result = session.get_datasource_query(&request).await.unwrap().unwrap();
    let data = result.array_buffer.unwrap();
    assert_eq!(data.len(), 14);
    assert_eq!(data[2], 0);
    assert_eq!(&data[8..], b"ababab");

    let sent = &transport.requests_to("servicegateway/qe/sql")[0];
    assert_eq!(sent.header("Accept"), Some("application/octet-stream"));
    assert_eq!(sent.header("username"), None);
    assert_eq!(body_of(sent), json!({"query": "select * from trades"}));
}

#[tokio::test]
async fn test_datasource_query_when_disconnected() {
    let transport = Arc::new(stub("service-1.12.0"));
    let session = session(transport.clone());

    let request = ServiceGatewayRequest::Sql(ServiceGatewaySqlBody { query: "x".to_string() });
    assert!(session.get_datasource_query(&request).await.unwrap().is_none());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_scratchpad_body_follows_version() {
    // 1.12 and q: returnFormat
    let transport = Arc::new(stub("service-1.12.0"));
    let mut session = connected(transport.clone()).await;
    session.set_results_view(true);
    session.get_scratchpad_query("til 3", &ScratchpadOptions::q()).await.unwrap();
    session.get_scratchpad_query("1+1", &ScratchpadOptions::python()).await.unwrap();

    let bodies: Vec<Value> = transport
        .requests_to("scratchpad/display")
        .iter()
        .map(body_of)
        .collect();
    assert_eq!(bodies[1]["returnFormat"], "structuredText");
    assert!(bodies[1].get("isTableView").is_none());
    assert_eq!(bodies[2]["language"], "python");
    assert_eq!(bodies[2]["isTableView"], true);
    assert!(bodies[2].get("returnFormat").is_none());

    // 1.11: legacy flag
    let transport = Arc::new(stub("service-1.11.4"));
    let session = connected(transport.clone()).await;
    session.get_scratchpad_query("til 3", &ScratchpadOptions::q()).await.unwrap();
    let body = body_of(transport.requests_to("scratchpad/display").last().unwrap());
    assert_eq!(body["isTableView"], false);
    assert!(body.get("returnFormat").is_none());

    // unknown version: neither
    let transport = Arc::new(stub("nightly"));
    let session = connected(transport.clone()).await;
    session.get_scratchpad_query("til 3", &ScratchpadOptions::q()).await.unwrap();
    let body = body_of(transport.requests_to("scratchpad/display").last().unwrap());
    assert!(body.get("isTableView").is_none());
    assert!(body.get("returnFormat").is_none());
}

#[tokio::test]
async fn test_scratchpad_structured_results_are_parsed() {
    let transport = Arc::new(
        StubTransport::default()
            .route("kxicontroller/config", Route::Json(json!({"version": "x-1.12.0"})))
            .route("servicegateway/meta", Route::Json(meta_with_uda()))
            .route(
                "scratchpad/display",
                Route::Json(json!({"error": false, "data": "{\"columns\":[{\"name\":\"x\"}]}"})),
            ),
    );
    let mut session = connected(transport).await;
    session.set_results_view(true);

    let result = session
        .get_scratchpad_query("([] x:1 2)", &ScratchpadOptions::q())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, json!({"columns": [{"name": "x"}]}));
}

#[tokio::test]
async fn test_scratchpad_error_body_is_returned() {
    let transport = Arc::new(
        StubTransport::default()
            .route("kxicontroller/config", Route::Json(json!({"version": "x-1.12.0"})))
            .route(
                "scratchpad/display",
                Route::Json(json!({"error": true, "errorMsg": "type"})),
            ),
    );
    let session = connected(transport).await;

    let result = session
        .get_scratchpad_query("1+`a", &ScratchpadOptions::q())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result["errorMsg"], "type");
}

#[tokio::test]
async fn test_import_scratchpad() {
    let transport = Arc::new(
        stub("service-1.12.0").route(
            "scratchpad/import/qsql",
            Route::Json(json!({"error": false})),
        ),
    );
    let session = connected(transport.clone()).await;

    let mut file = DataSourceFile::new("ds");
    file.data_source.selected_type = DataSourceType::Qsql;
    file.data_source.qsql = QsqlQuery {
        query: "select from trades".to_string(),
        selected_target: "asm-qe tier1 dap1".to_string(),
    };

    let import = session.import_scratchpad("t", &file).await.unwrap();
    assert_eq!(import.variable, "t");
    assert_eq!(import.datasource_type, "QSQL");
    assert_eq!(import.status, 200);

    let sent = &transport.requests_to("scratchpadmanager/scratchpad/import/qsql")[0];
    assert_eq!(sent.header("username"), Some("alice"));
    let body = body_of(sent);
    assert_eq!(body["output"], "t");
    assert_eq!(body["instance"], "tier1");
    assert_eq!(body["params"]["scope"]["dap"], "dap1");
}

#[tokio::test]
async fn test_import_scratchpad_reports_server_error() {
    let transport = Arc::new(stub("service-1.12.0").route(
        "scratchpad/import/sql",
        Route::Json(json!({"error": true, "errorMsg": "bad sql"})),
    ));
    let session = connected(transport).await;

    let mut file = DataSourceFile::new("ds");
    file.data_source.selected_type = DataSourceType::Sql;
    file.data_source.sql = SqlQuery {
        query: "select".to_string(),
    };

    match session.import_scratchpad("t", &file).await {
        Err(InsightsError::Scratchpad(message)) => assert_eq!(message, "bad sql"),
        other => panic!("unexpected result: {:?}", other.map(|i| i.status)),
    }
}

#[tokio::test]
async fn test_scratchpad_http_failure_carries_server_message() {
    let transport = Arc::new(
        stub("service-1.12.0")
            .route("scratchpad/import/sql", Route::Fail(500, b"scratchpad quota exceeded".to_vec())),
    );
    let session = connected(transport).await;

    let mut file = DataSourceFile::new("ds");
    file.data_source.selected_type = DataSourceType::Sql;
    file.data_source.sql = SqlQuery {
        query: "select".to_string(),
    };

    let err = session.import_scratchpad("t", &file).await.unwrap_err();
    assert!(matches!(err, InsightsError::Transport(_)));
    assert_eq!(err.to_string(), "Transport error: HTTP 500: scratchpad quota exceeded");
}

#[tokio::test]
async fn test_import_scratchpad_when_disconnected() {
    let session = session(Arc::new(stub("service-1.12.0")));
    let file = DataSourceFile::new("ds");
    assert!(matches!(
        session.import_scratchpad("t", &file).await,
        Err(InsightsError::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_reset_scratchpad() {
    let transport = Arc::new(stub("service-1.12.0").route("scratchpad/reset", Route::Json(json!({}))));
    let session = connected(transport.clone()).await;
    assert_eq!(session.reset_scratchpad().await, Some(true));
    let reset = &transport.requests_to("scratchpadmanager/scratchpad/reset")[0];
    assert_eq!(reset.method, HttpMethod::Post);
    assert_eq!(reset.body, None);
    assert_eq!(reset.header("username"), Some("alice"));

    let transport = Arc::new(stub("service-1.12.0").route("scratchpad/reset", Route::Fail(500, Vec::new())));
    let session = connected(transport).await;
    assert_eq!(session.reset_scratchpad().await, Some(false));

    let mut session = session;
    session.disconnect();
    assert_eq!(session.reset_scratchpad().await, Some(false));
}

#[tokio::test]
async fn test_cancellation_aborts_request() {
    let transport = Arc::new(stub("service-1.12.0").route("servicegateway/data", Route::Hang));
    let token = CancellationToken::new();
    let mut session = session(transport).with_progress(Arc::new(ManualProgress {
        token: token.clone(),
    }));
    assert!(session.connect().await);

    let builder = RequestBodyBuilder::new(Arc::new(ChronoTimestampFormatter));
    let request = builder
        .service_gateway_request(&DataSourceFile::new("ds").active_query(), |_| unreachable!())
        .unwrap();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        canceller.cancel();
    });

    match session.get_datasource_query(&request).await {
        Err(InsightsError::Cancelled(operation)) => assert_eq!(operation, "Datasource Run"),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(session.reset_scratchpad().await, Some(false));
}

#[tokio::test]
async fn test_run_uda_datasource() {
    let transport = Arc::new(
        stub("service-1.12.0").route("servicegateway/example/fn", Route::Bytes(vec![1, 0, 0, 0])),
    );
    let session = connected(transport.clone()).await;
    assert!(session.is_uda_available(".example.fn"));
    assert!(!session.is_uda_available("getData"));

    let mut uda = session.uda_list().remove(0);
    uda.params[0].value = Some(json!(5));

    let mut file = DataSourceFile::new("ds");
    file.data_source.selected_type = DataSourceType::Uda;
    file.data_source.uda = Some(uda);

    let result = session.run_datasource(&file).await.unwrap().unwrap();
    assert_eq!(result.array_buffer, Some(vec![1, 0, 0, 0]));
    let sent = &transport.requests_to("servicegateway/example/fn")[0];
    assert_eq!(body_of(sent), json!({"n": 5}));
}

#[tokio::test]
async fn test_resolve_uda_request_errors() {
    let session = connected(Arc::new(stub("service-1.12.0"))).await;

    let err = session.resolve_uda_request(None).unwrap_err();
    assert_eq!(err.to_string(), "UDA is undefined");

    let unnamed = UdaDescriptor::default();
    assert_eq!(
        session.resolve_uda_request(Some(&unnamed)).unwrap_err().to_string(),
        "UDA name not found"
    );

    let missing = UdaDescriptor {
        name: ".other.fn".to_string(),
        ..Default::default()
    };
    assert_eq!(
        session.resolve_uda_request(Some(&missing)).unwrap_err().to_string(),
        "UDA .other.fn is not available in this connection"
    );

    let without_value = UdaDescriptor {
        name: ".example.fn".to_string(),
        params: vec![UdaParam {
            name: "n".to_string(),
            is_req: true,
            param_type: ParamTypes::Many(vec![-7]),
            is_visible: Some(true),
            ..Default::default()
        }],
        ..Default::default()
    };
    assert_eq!(
        session.resolve_uda_request(Some(&without_value)).unwrap_err().to_string(),
        "The UDA: .example.fn requires the parameter: n."
    );
}

#[tokio::test]
async fn test_meta_section() {
    let transport = Arc::new(stub("service-1.12.0"));
    let unconnected = session(transport.clone());
    assert_eq!(unconnected.meta_section(MetaInfoType::Schema), "");

    let session = connected(transport).await;
    let schema: Value = serde_json::from_str(&session.meta_section(MetaInfoType::Schema)).unwrap();
    assert_eq!(schema[0]["table"], "trades");
}

#[tokio::test]
async fn test_registry_bookkeeping() {
    let registry = ConnectionRegistry::new();
    let transport = Arc::new(stub("service-1.12.0"));

    let dev = registry.add(session(transport.clone())).await;
    let identity = DeploymentIdentity::new("prod", SERVER, "prod");
    registry
        .add(ConnectionSession::new(
            identity,
            transport,
            Arc::new(StaticTokenProvider::new(Some(jwt("bob")))),
        ))
        .await;

    assert_eq!(registry.labels().await, vec!["dev", "prod"]);
    assert!(registry.connected_labels().await.is_empty());

    assert!(dev.lock().await.connect().await);
    assert_eq!(registry.connected_labels().await, vec!["dev"]);

    assert!(!registry.set_active("missing").await);
    assert!(registry.set_active("dev").await);
    assert_eq!(registry.active_label().await.as_deref(), Some("dev"));
    assert!(registry.active().await.is_some());

    assert!(registry.remove("dev").await.is_some());
    assert_eq!(registry.active_label().await, None);
    assert!(registry.get("dev").await.is_none());
    assert_eq!(registry.labels().await, vec!["prod"]);
}

#[tokio::test]
async fn test_uda_scratchpad_query() {
    let transport = Arc::new(stub("service-1.12.0").route(
        "scratchpad/import/uda",
        Route::Json(json!({"error": false, "data": "{\"rows\":3}"})),
    ));
    let mut session = connected(transport.clone()).await;
    session.set_results_view(true);

    let mut uda = session.uda_list().remove(0);
    uda.params[0].value = Some(json!(3));
    let request = session.resolve_uda_request(Some(&uda)).unwrap();
    assert_eq!(request.return_format, "structuredText");

    let result = session.get_uda_scratchpad_query(&request).await.unwrap().unwrap();
    assert_eq!(result, json!({"rows": 3}));

    let body = body_of(&transport.requests_to("scratchpadmanager/scratchpad/import/uda")[0]);
    assert_eq!(body["name"], ".example.fn");
    assert_eq!(body["params"], json!({"n": 3}));
    assert_eq!(body["parameterTypes"], json!({"n": -7}));
}

#[tokio::test]
async fn test_scratchpad_rejects_oversized_expression() {
    let transport = Arc::new(stub("service-1.12.0"));
    let session = connected(transport.clone()).await;
    let sent_before = transport.request_count();

    let query = "a".repeat(250_001);
    assert!(matches!(
        session.get_scratchpad_query(&query, &ScratchpadOptions::q()).await,
        Err(InsightsError::InvalidRequest(_))
    ));
    assert_eq!(transport.request_count(), sent_before);
}
