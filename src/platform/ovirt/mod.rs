//! oVirt Engine REST API client

mod api_client;
mod api_types;
mod session;

pub use api_client::OvirtApiClient;
pub use session::{OvirtConnector, OvirtSession};
