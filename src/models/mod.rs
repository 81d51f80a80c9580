pub mod datasource;
pub mod deployment;
pub mod meta;
pub mod request_body;
pub mod uda;

pub use datasource::{DataSourceFile, DataSourceQuery, DataSourceType};
pub use deployment::{ApiConfig, AuthToken, ConnectionState, DeploymentIdentity, InsightsConfig};
pub use meta::{MetaInfoType, MetaObject, MetaPayload};
pub use uda::{ParamFieldType, TypeCatalog, UdaDescriptor, UdaParam, UdaRequestBody};
