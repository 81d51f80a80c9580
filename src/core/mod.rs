pub mod endpoints;
pub mod query;
pub mod registry;
pub mod request_body;
pub mod session;
pub mod uda;
pub mod version;

pub use endpoints::{EndpointSet, EndpointTier};
pub use registry::ConnectionRegistry;
pub use request_body::RequestBodyBuilder;
pub use session::{ConnectionSession, DatasourceQueryResult, ScratchpadOptions};
pub use version::InsightsVersion;
