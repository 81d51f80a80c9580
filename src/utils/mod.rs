pub mod auth;
pub mod ipc;
pub mod progress;
pub mod time;
pub mod transport;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use ipc::{Decompressor, KdbIpcDecompressor};
pub use progress::{ProgressReporter, TracingProgress};
pub use time::{ChronoTimestampFormatter, TimestampFormatter};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
