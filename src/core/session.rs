//! Connection to one Insights deployment.
//!
//! The session owns the version, endpoint table and meta catalog of its
//! deployment. Tokens are requested from the provider for every call and
//! never stored.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::endpoints::{self, EndpointSet, EndpointTier, ScratchpadEndpoint, ServiceGatewayEndpoint};
use super::query::normalize_query;
use super::request_body::{RequestBodyBuilder, ScratchpadFormat};
use super::uda::{create_uda_request_body, fix_time_params, parse_uda_list, process_uda_params};
use super::version::{is_at_least, parse_version, InsightsVersion, API_CONFIG, STRUCTURED_TEXT};
use crate::error::{InsightsError, Result};
use crate::models::datasource::DataSourceFile;
use crate::models::deployment::{
    ApiConfig, AuthToken, ConnectionState, DeploymentIdentity, InsightsConfig,
};
use crate::models::meta::{MetaInfoType, MetaObject, MetaPayload};
use crate::models::request_body::{
    ServiceGatewayRequest, RETURN_FORMAT_STRUCTURED, RETURN_FORMAT_TEXT,
};
use crate::models::uda::{TypeCatalog, UdaDescriptor, UdaRequestBody};
use crate::utils::auth::{preferred_username, TokenProvider};
use crate::utils::ipc::{Decompressor, KdbIpcDecompressor};
use crate::utils::progress::{ProgressReporter, TracingProgress};
use crate::utils::time::{ChronoTimestampFormatter, TimestampFormatter};
use crate::utils::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ResponseType};

pub const CONFIG_PATH: &str = "kxicontroller/config";
pub const API_CONFIG_PATH: &str = "api/config";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Headers {
    Plain,
    Json,
    Octet,
}

impl Headers {
    fn pairs(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Headers::Plain => &[],
            Headers::Json => &[
                ("Content-Type", "application/json"),
                ("Accept", "application/json"),
            ],
            Headers::Octet => &[
                ("Accept", "application/octet-stream"),
                ("Content-Type", "application/json"),
            ],
        }
    }

    fn response_type(self) -> ResponseType {
        match self {
            Headers::Octet => ResponseType::Bytes,
            _ => ResponseType::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub buffer: Vec<u8>,
}

/// Outcome of a service-gateway query. Exactly one side is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceQueryResult {
    pub error: Option<ErrorPayload>,
    pub array_buffer: Option<Vec<u8>>,
}

impl DatasourceQueryResult {
    fn failed(buffer: Vec<u8>) -> Self {
        Self {
            error: Some(ErrorPayload { buffer }),
            array_buffer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScratchpadOptions {
    pub context: Option<String>,
    pub is_python: bool,
    /// Warm-up call made while connecting.
    pub is_starting: bool,
}

impl ScratchpadOptions {
    pub fn q() -> Self {
        Self::default()
    }

    pub fn python() -> Self {
        Self {
            is_python: true,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScratchpadImport {
    pub variable: String,
    pub datasource_type: &'static str,
    pub status: u16,
    pub params: Value,
}

pub struct ConnectionSession {
    identity: DeploymentIdentity,
    state: ConnectionState,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<dyn TokenProvider>,
    decompressor: Arc<dyn Decompressor>,
    progress: Arc<dyn ProgressReporter>,
    builder: RequestBodyBuilder,
    catalog: TypeCatalog,
    results_view: bool,
    config: Option<InsightsConfig>,
    api_config: Option<ApiConfig>,
    meta: Option<MetaObject>,
    version: Option<InsightsVersion>,
    endpoints: Option<EndpointSet>,
}

impl ConnectionSession {
    pub fn new(
        identity: DeploymentIdentity,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            identity,
            state: ConnectionState::Disconnected,
            transport,
            tokens,
            decompressor: Arc::new(KdbIpcDecompressor),
            progress: Arc::new(TracingProgress::new()),
            builder: RequestBodyBuilder::new(Arc::new(ChronoTimestampFormatter)),
            catalog: TypeCatalog::default(),
            results_view: false,
            config: None,
            api_config: None,
            meta: None,
            version: None,
            endpoints: None,
        }
    }

    pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
        self.decompressor = decompressor;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn TimestampFormatter>) -> Self {
        self.builder = RequestBodyBuilder::new(formatter);
        self
    }

    pub fn with_catalog(mut self, catalog: TypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Whether results are shown as a table (structured text) rather than
    /// plain text.
    pub fn set_results_view(&mut self, visible: bool) {
        self.results_view = visible;
    }

    pub fn label(&self) -> &str {
        &self.identity.label
    }

    pub fn identity(&self) -> &DeploymentIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn version(&self) -> Option<InsightsVersion> {
        self.version
    }

    pub fn endpoints(&self) -> Option<&EndpointSet> {
        self.endpoints.as_ref()
    }

    pub fn config(&self) -> Option<&InsightsConfig> {
        self.config.as_ref()
    }

    pub fn api_config(&self) -> Option<&ApiConfig> {
        self.api_config.as_ref()
    }

    pub fn meta(&self) -> Option<&MetaObject> {
        self.meta.as_ref()
    }

    /// Authenticates, then loads config, meta and API config and starts the
    /// scratchpad. Only a missing token fails the connection; later steps
    /// are logged and leave whatever state they managed to set.
    pub async fn connect(&mut self) -> bool {
        self.state = ConnectionState::Authenticating;

        if self.fetch_token().await.is_none() {
            error!("Token undefined for connection: {}", self.identity.label);
            self.state = ConnectionState::Failed;
            return false;
        }
        self.state = ConnectionState::Connected;

        if let Err(e) = self.get_config().await {
            warn!("[{}] Failed to load config ({}): {}", self.identity.label, e.category(), e);
        }
        if self.endpoints.is_none() {
            self.endpoints = Some(endpoints::resolve(self.version));
        }
        if let Err(e) = self.get_meta().await {
            warn!("[{}] Failed to load meta ({}): {}", self.identity.label, e.category(), e);
        }
        if let Err(e) = self.get_api_config().await {
            warn!("[{}] Failed to load API config ({}): {}", self.identity.label, e.category(), e);
        }
        let warm_up = ScratchpadOptions {
            is_starting: true,
            ..ScratchpadOptions::default()
        };
        if let Err(e) = self.get_scratchpad_query("", &warm_up).await {
            warn!("[{}] Failed to start scratchpad ({}): {}", self.identity.label, e.category(), e);
        }

        info!(
            "Connected to {} (version {})",
            self.identity.label,
            self.version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        true
    }

    /// Forgets the connection. Issued tokens stay valid.
    pub fn disconnect(&mut self) -> bool {
        self.state = ConnectionState::Disconnected;
        info!("Disconnected from {}", self.identity.label);
        false
    }

    pub async fn get_config(&mut self) -> Result<Option<InsightsConfig>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let url = self.url(CONFIG_PATH)?;
        let request = self
            .request_options(false, Headers::Plain, HttpMethod::Get, url, None)
            .await?;
        let response = self.transport.request(request).await?;
        let config: InsightsConfig = serde_json::from_slice(&response.body)?;

        self.version = parse_version(&config.version);
        if self.version.is_none() {
            warn!(
                "Could not read a version from {:?}, using base endpoints",
                config.version
            );
        }
        self.endpoints = Some(endpoints::resolve(self.version));
        self.config = Some(config.clone());
        Ok(Some(config))
    }

    pub async fn get_meta(&mut self) -> Result<Option<MetaPayload>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let path = self.active_endpoints().service_gateway(ServiceGatewayEndpoint::Meta);
        let url = self.url(path)?;
        let request = self
            .request_options(
                false,
                Headers::Plain,
                HttpMethod::Post,
                url,
                Some(Value::Object(Default::default())),
            )
            .await?;
        let response = self.transport.request(request).await?;
        let meta: MetaObject = serde_json::from_slice(&response.body)?;

        debug!(
            "[{}] Meta loaded: {} APIs, {} schemas",
            self.identity.label,
            meta.payload.api.len(),
            meta.payload.schema.len()
        );
        let payload = meta.payload.clone();
        self.meta = Some(meta);
        Ok(Some(payload))
    }

    /// Only deployments from 1.13 expose `api/config`.
    pub async fn get_api_config(&mut self) -> Result<Option<ApiConfig>> {
        if !self.is_connected() || !is_at_least(self.version, API_CONFIG) {
            return Ok(None);
        }

        let url = self.url(API_CONFIG_PATH)?;
        let request = self
            .request_options(true, Headers::Plain, HttpMethod::Get, url, None)
            .await?;
        let response = self.transport.request(request).await?;
        let api_config: ApiConfig = serde_json::from_slice(&response.body)?;

        self.api_config = Some(api_config.clone());
        Ok(Some(api_config))
    }

    /// Endpoint path by tier and camelCase key, `None` before the version
    /// is known or for unknown keys.
    pub fn retrieve_endpoints(&self, tier: EndpointTier, key: &str) -> Option<&'static str> {
        self.endpoints
            .as_ref()
            .and_then(|set| endpoints::lookup(set, tier, key))
    }

    /// One section of the meta catalog as JSON, empty when meta has not been
    /// loaded.
    pub fn meta_section(&self, kind: MetaInfoType) -> String {
        let Some(meta) = &self.meta else {
            error!("Meta data is undefined for connection {}", self.identity.label);
            return String::new();
        };
        meta.payload.section_json(kind).unwrap_or_else(|e| {
            error!("Failed to serialize meta section {:?}: {}", kind, e);
            String::new()
        })
    }

    pub fn is_uda_available(&self, name: &str) -> bool {
        self.meta
            .as_ref()
            .map_or(false, |meta| meta.payload.custom_apis().any(|api| api.api == name))
    }

    /// UDAs advertised by the deployment, reconciled against the type
    /// catalog.
    pub fn uda_list(&self) -> Vec<UdaDescriptor> {
        self.meta
            .as_ref()
            .map(|meta| parse_uda_list(&meta.payload, &self.catalog))
            .unwrap_or_default()
    }

    /// Validates a UDA against this deployment and builds its request.
    pub fn resolve_uda_request(&self, uda: Option<&UdaDescriptor>) -> Result<UdaRequestBody> {
        let uda = uda.ok_or_else(|| InsightsError::UdaUnavailable("UDA is undefined".to_string()))?;

        if uda.name.is_empty() {
            return Err(InsightsError::UdaUnavailable("UDA name not found".to_string()));
        }
        if !self.is_uda_available(&uda.name) {
            return Err(InsightsError::UdaUnavailable(format!(
                "UDA {} is not available in this connection",
                uda.name
            )));
        }
        if let Some(reason) = uda.incompatible_error {
            return Err(InsightsError::UdaUnavailable(format!(
                "UDA {} cannot be used: {}",
                uda.name, reason
            )));
        }

        let (params, parameter_types) = process_uda_params(uda, &self.catalog)?;
        let return_format = if self.results_view {
            RETURN_FORMAT_STRUCTURED
        } else {
            RETURN_FORMAT_TEXT
        };

        Ok(fix_time_params(create_uda_request_body(
            &uda.name,
            params,
            parameter_types,
            return_format,
        )))
    }

    /// Runs a query on the service gateway. HTTP failures are returned as an
    /// error payload; `None` means the call was never made.
    pub async fn get_datasource_query(
        &self,
        request: &ServiceGatewayRequest,
    ) -> Result<Option<DatasourceQueryResult>> {
        if !self.is_connected() {
            self.no_connection_or_endpoints();
            return Ok(None);
        }

        let endpoints = self.active_endpoints();
        let path = match request {
            ServiceGatewayRequest::Uda { name, .. } => endpoints.uda_path(name),
            other => endpoints.service_gateway(other.endpoint()).to_string(),
        };
        let url = self.url(&path)?;
        let body = request.body()?;

        let options = match self
            .request_options(false, Headers::Octet, HttpMethod::Post, url, Some(body))
            .await
        {
            Ok(options) => options,
            Err(e) => {
                error!("{}", e);
                return Ok(None);
            }
        };

        let response = match self
            .send("Datasource Run", Some("Query executing..."), options)
            .await
        {
            Ok(response) => response,
            Err(InsightsError::Transport(e)) => {
                info!(
                    "[Datasource RUN] Status: {}.",
                    e.status().map_or_else(|| e.to_string(), |s| s.to_string())
                );
                return Ok(Some(DatasourceQueryResult::failed(e.body())));
            }
            Err(e) => return Err(e),
        };

        info!("[Datasource RUN] Status: {}.", response.status);
        let mut data = response.body;
        if self.decompressor.is_compressed(&data) {
            data = match self.decompressor.uncompress(&data) {
                Ok(data) => data,
                Err(e) => {
                    error!("[Datasource RUN] {}", e);
                    return Ok(Some(DatasourceQueryResult::failed(e.to_string().into_bytes())));
                }
            };
        }

        Ok(Some(DatasourceQueryResult {
            error: None,
            array_buffer: Some(data),
        }))
    }

    /// Builds the service-gateway request for the document's active query
    /// and runs it.
    pub async fn run_datasource(
        &self,
        file: &DataSourceFile,
    ) -> Result<Option<DatasourceQueryResult>> {
        let request = self
            .builder
            .service_gateway_request(&file.active_query(), |uda| self.resolve_uda_request(uda))?;
        self.get_datasource_query(&request).await
    }

    /// Populates `variable` in the scratchpad from a datasource document.
    pub async fn import_scratchpad(
        &self,
        variable: &str,
        file: &DataSourceFile,
    ) -> Result<ScratchpadImport> {
        let endpoints = self.connected_endpoints()?;

        let body = self.builder.scratchpad_import_body(
            &file.active_query(),
            variable,
            |uda| self.resolve_uda_request(uda),
        )?;
        let url = self.url(endpoints.scratchpad(body.endpoint()))?;
        let options = self
            .request_options(
                true,
                Headers::Json,
                HttpMethod::Post,
                url,
                Some(serde_json::to_value(&body)?),
            )
            .await?;

        let response = self
            .send("scratchpad import", Some("Populating scratchpad..."), options)
            .await?;
        let data = response.json_body()?;

        if is_truthy(data.get("error")) {
            let message = data
                .get("errorMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            error!(
                "[SCRATCHPAD] Error occured while populating scratchpad: {}",
                message
            );
            return Err(InsightsError::Scratchpad(message));
        }

        let params = body.params_json()?;
        info!("Executed successfully, stored in {}.", variable);
        info!("[SCRATCHPAD] Status: {}", response.status);
        info!(
            "[SCRATCHPAD] Populated scratchpad with the following params: {}",
            params
        );

        Ok(ScratchpadImport {
            variable: variable.to_string(),
            datasource_type: body.type_label(),
            status: response.status,
            params,
        })
    }

    /// Executes an expression in the scratchpad. An empty expression only
    /// makes sure the scratchpad exists and returns `None`.
    pub async fn get_scratchpad_query(
        &self,
        query: &str,
        options: &ScratchpadOptions,
    ) -> Result<Option<Value>> {
        let Some(endpoints) = self.endpoints_if_connected() else {
            return Ok(None);
        };

        let expression = normalize_query(query)?;
        let structured = !options.is_python && is_at_least(self.version, STRUCTURED_TEXT);
        let body = self.builder.scratchpad_query_body(
            &expression,
            options.context.as_deref(),
            options.is_python,
            self.scratchpad_format(options.is_python),
        );
        let url = self.url(endpoints.scratchpad(ScratchpadEndpoint::Scratchpad))?;
        let request = self
            .request_options(
                true,
                Headers::Json,
                HttpMethod::Post,
                url,
                Some(serde_json::to_value(&body)?),
            )
            .await?;

        let message = options.is_starting.then_some("Starting scratchpad...");
        let response = self.send("scratchpad execution", message, request).await?;
        let mut data = response.json_body()?;

        if is_truthy(data.get("error")) {
            return Ok(Some(data));
        }
        if query.is_empty() {
            info!(
                "[SCRATCHPAD] scratchpad created for connection: {}",
                self.identity.label
            );
            return Ok(None);
        }

        info!("[SCRATCHPAD] Status: {}", response.status);
        if self.results_view && structured {
            data = parse_structured(data)?;
        }
        Ok(Some(data))
    }

    /// Runs a resolved UDA in the scratchpad.
    pub async fn get_uda_scratchpad_query(
        &self,
        request: &UdaRequestBody,
    ) -> Result<Option<Value>> {
        let Some(endpoints) = self.endpoints_if_connected() else {
            return Ok(None);
        };

        let url = self.url(endpoints.scratchpad(ScratchpadEndpoint::ImportUda))?;
        let options = self
            .request_options(
                true,
                Headers::Json,
                HttpMethod::Post,
                url,
                Some(serde_json::to_value(request)?),
            )
            .await?;

        let response = self.send("UDA execution", None, options).await?;
        let data = response.json_body()?;

        if is_truthy(data.get("error")) {
            return Ok(Some(data));
        }

        info!("[UDA] Status: {}", response.status);
        if request.return_format == RETURN_FORMAT_STRUCTURED {
            return parse_structured(data).map(Some);
        }
        Ok(Some(data))
    }

    /// `Some(true)` when the scratchpad was reset, `Some(false)` when it
    /// could not be, `None` when no token was available.
    pub async fn reset_scratchpad(&self) -> Option<bool> {
        let Some(endpoints) = self.endpoints_if_connected() else {
            return Some(false);
        };

        let url = match self.url(endpoints.scratchpad(ScratchpadEndpoint::Reset)) {
            Ok(url) => url,
            Err(e) => {
                error!("{}", e);
                return Some(false);
            }
        };
        let options = match self
            .request_options(true, Headers::Json, HttpMethod::Post, url, None)
            .await
        {
            Ok(options) => options,
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };

        match self
            .send("scratchpad reset", Some("Reseting scratchpad..."), options)
            .await
        {
            Ok(_) => {
                info!(
                    "[SCRATCHPAD] Executed successfully, scratchpad reseted at {} connection.",
                    self.identity.label
                );
                Some(true)
            }
            Err(InsightsError::Cancelled(_)) => Some(false),
            Err(e) => {
                error!(
                    "[SCRATCHPAD] Error ocurred while reseting scratchpad in connection {}, try again. ({})",
                    self.identity.label, e
                );
                Some(false)
            }
        }
    }

    fn scratchpad_format(&self, is_python: bool) -> ScratchpadFormat {
        if self.version.is_none() {
            return ScratchpadFormat::Unspecified;
        }
        // structuredText is not returned for Python
        if !is_python && is_at_least(self.version, STRUCTURED_TEXT) {
            let format = if self.results_view {
                RETURN_FORMAT_STRUCTURED
            } else {
                RETURN_FORMAT_TEXT
            };
            ScratchpadFormat::ReturnFormat(format.to_string())
        } else {
            ScratchpadFormat::TableView(self.results_view)
        }
    }

    fn active_endpoints(&self) -> EndpointSet {
        self.endpoints
            .clone()
            .unwrap_or_else(|| endpoints::resolve(self.version))
    }

    fn endpoints_if_connected(&self) -> Option<&EndpointSet> {
        match (&self.endpoints, self.is_connected()) {
            (Some(endpoints), true) => Some(endpoints),
            _ => {
                self.no_connection_or_endpoints();
                None
            }
        }
    }

    fn connected_endpoints(&self) -> Result<&EndpointSet> {
        self.endpoints_if_connected()
            .ok_or_else(|| InsightsError::NotConnected(self.identity.label.clone()))
    }

    fn no_connection_or_endpoints(&self) {
        error!("No connection or endpoints defined for {}", self.identity.label);
    }

    fn url(&self, path: &str) -> Result<String> {
        Ok(Url::parse(&self.identity.server)?.join(path)?.to_string())
    }

    async fn fetch_token(&self) -> Option<AuthToken> {
        self.tokens
            .get_token(
                &self.identity.server,
                &self.identity.alias,
                self.identity.realm(),
                self.identity.insecure,
            )
            .await
    }

    async fn request_options(
        &self,
        need_username: bool,
        headers: Headers,
        method: HttpMethod,
        url: String,
        body: Option<Value>,
    ) -> Result<HttpRequest> {
        let token = self
            .fetch_token()
            .await
            .ok_or_else(|| InsightsError::TokenUndefined(self.identity.label.clone()))?;

        let mut pairs = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", token.access_token),
        )];
        pairs.extend(
            headers
                .pairs()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        if need_username {
            let username = preferred_username(&token.access_token)
                .ok_or_else(|| InsightsError::InvalidUsername(self.identity.label.clone()))?;
            pairs.push(("username".to_string(), username));
        }

        Ok(HttpRequest {
            method,
            url,
            headers: pairs,
            body,
            response_type: headers.response_type(),
        })
    }

    /// Sends a request, reporting progress and aborting if the user
    /// cancels.
    async fn send(
        &self,
        operation: &str,
        message: Option<&str>,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        let cancel = self.progress.cancellation();
        if let Some(message) = message {
            self.progress.report(message);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("User cancelled the {}.", operation);
                Err(InsightsError::Cancelled(operation.to_string()))
            }
            result = self.transport.request(request) => Ok(result?),
        }
    }
}

/// JavaScript truthiness of an `error` member.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    }
}

/// Structured-text responses carry the result as a JSON string in `data`.
fn parse_structured(data: Value) -> Result<Value> {
    match data.get("data") {
        Some(Value::String(raw)) => Ok(serde_json::from_str(raw)?),
        _ => Ok(data),
    }
}
