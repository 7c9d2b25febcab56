// * Network layer: HTTP transport, request identity and the collector client

pub mod client;
pub mod errors;
pub mod identity;
pub mod reporter;

pub use client::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use errors::NetworkError;
pub use identity::BrowserIdentity;
pub use reporter::{AlertMail, RemoteReporter, RemoteStatusPayload, ReportError, StatusPush, StatusUpdate};
