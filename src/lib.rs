// KDB Insights connection core
// Version negotiation, request bodies and scratchpad/service-gateway calls

pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::{
    ConnectionRegistry,
    ConnectionSession,
    DatasourceQueryResult,
    EndpointSet,
    EndpointTier,
    InsightsVersion,
    RequestBodyBuilder,
    ScratchpadOptions,
};

pub use error::InsightsError;
