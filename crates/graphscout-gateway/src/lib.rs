//! Gateway layer: HTTP transport to dataset endpoints and meta-index discovery.

mod error;
pub mod discovery;
pub mod http;
pub mod transport;

pub use discovery::{DatasetDetails, DatasetDiscovery, DiscoveryCandidate};
pub use error::GatewayError;
pub use http::GatewayClient;
pub use transport::{GraphRequest, QueryTransport};
