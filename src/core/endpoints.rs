use serde::Serialize;

use super::version::{is_at_least, InsightsVersion, SCRATCHPAD_MANAGER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchpadEndpoints {
    pub scratchpad: &'static str,
    pub import: &'static str,
    pub import_sql: &'static str,
    pub import_qsql: &'static str,
    #[serde(rename = "importUDA")]
    pub import_uda: &'static str,
    pub reset: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGatewayEndpoints {
    pub meta: &'static str,
    pub data: &'static str,
    pub sql: &'static str,
    pub qsql: &'static str,
    pub uda_base: &'static str,
}

/// Relative paths for one deployment, fixed once its version is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSet {
    pub scratchpad: ScratchpadEndpoints,
    pub service_gateway: ServiceGatewayEndpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTier {
    Scratchpad,
    ServiceGateway,
}

impl std::str::FromStr for EndpointTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scratchpad" => Ok(EndpointTier::Scratchpad),
            "serviceGateway" => Ok(EndpointTier::ServiceGateway),
            other => Err(format!("Unknown endpoint tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchpadEndpoint {
    Scratchpad,
    Import,
    ImportSql,
    ImportQsql,
    ImportUda,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceGatewayEndpoint {
    Meta,
    Data,
    Sql,
    Qsql,
    UdaBase,
}

const SERVICE_GATEWAY: ServiceGatewayEndpoints = ServiceGatewayEndpoints {
    meta: "servicegateway/meta",
    data: "servicegateway/data",
    sql: "servicegateway/qe/sql",
    qsql: "servicegateway/qe/qsql",
    uda_base: "servicegateway/",
};

const BASE_ENDPOINTS: EndpointSet = EndpointSet {
    scratchpad: ScratchpadEndpoints {
        scratchpad: "servicebroker/scratchpad/display",
        import: "servicebroker/scratchpad/import/data",
        import_sql: "servicebroker/scratchpad/import/sql",
        import_qsql: "servicebroker/scratchpad/import/qsql",
        import_uda: "servicebroker/scratchpad/import/uda",
        reset: "servicebroker/scratchpad/reset",
    },
    service_gateway: SERVICE_GATEWAY,
};

const UPDATED_ENDPOINTS: EndpointSet = EndpointSet {
    scratchpad: ScratchpadEndpoints {
        scratchpad: "scratchpadmanager/scratchpad/display",
        import: "scratchpadmanager/scratchpad/import/data",
        import_sql: "scratchpadmanager/scratchpad/import/sql",
        import_qsql: "scratchpadmanager/scratchpad/import/qsql",
        import_uda: "scratchpadmanager/scratchpad/import/uda",
        reset: "scratchpadmanager/scratchpad/reset",
    },
    service_gateway: SERVICE_GATEWAY,
};

/// Picks the endpoint table for a deployment version. Unknown versions get
/// the base table.
pub fn resolve(version: Option<InsightsVersion>) -> EndpointSet {
    if is_at_least(version, SCRATCHPAD_MANAGER) {
        UPDATED_ENDPOINTS
    } else {
        BASE_ENDPOINTS
    }
}

/// Looks up a path by its camelCase key, e.g. `("scratchpad", "importSql")`.
pub fn lookup(set: &EndpointSet, tier: EndpointTier, key: &str) -> Option<&'static str> {
    match tier {
        EndpointTier::Scratchpad => {
            let sp = &set.scratchpad;
            match key {
                "scratchpad" => Some(sp.scratchpad),
                "import" => Some(sp.import),
                "importSql" => Some(sp.import_sql),
                "importQsql" => Some(sp.import_qsql),
                "importUDA" => Some(sp.import_uda),
                "reset" => Some(sp.reset),
                _ => None,
            }
        }
        EndpointTier::ServiceGateway => {
            let sg = &set.service_gateway;
            match key {
                "meta" => Some(sg.meta),
                "data" => Some(sg.data),
                "sql" => Some(sg.sql),
                "qsql" => Some(sg.qsql),
                "udaBase" => Some(sg.uda_base),
                _ => None,
            }
        }
    }
}

impl EndpointSet {
    pub fn scratchpad(&self, endpoint: ScratchpadEndpoint) -> &'static str {
        let sp = &self.scratchpad;
        match endpoint {
            ScratchpadEndpoint::Scratchpad => sp.scratchpad,
            ScratchpadEndpoint::Import => sp.import,
            ScratchpadEndpoint::ImportSql => sp.import_sql,
            ScratchpadEndpoint::ImportQsql => sp.import_qsql,
            ScratchpadEndpoint::ImportUda => sp.import_uda,
            ScratchpadEndpoint::Reset => sp.reset,
        }
    }

    pub fn service_gateway(&self, endpoint: ServiceGatewayEndpoint) -> &'static str {
        let sg = &self.service_gateway;
        match endpoint {
            ServiceGatewayEndpoint::Meta => sg.meta,
            ServiceGatewayEndpoint::Data => sg.data,
            ServiceGatewayEndpoint::Sql => sg.sql,
            ServiceGatewayEndpoint::Qsql => sg.qsql,
            ServiceGatewayEndpoint::UdaBase => sg.uda_base,
        }
    }

    /// Path of a UDA: `.ns.fn` is served at `<udaBase>ns/fn`.
    pub fn uda_path(&self, uda_name: &str) -> String {
        let tail: Vec<&str> = uda_name.split('.').skip(1).collect();
        format!("{}{}", self.service_gateway.uda_base, tail.join("/"))
    }
}
