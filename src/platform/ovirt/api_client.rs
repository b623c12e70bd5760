// ============================================================================
// File: packages/vm-backup/src/platform/ovirt/api_client.rs
// ----------------------------------------------------------------------------
// HTTP plumbing for the oVirt Engine REST API.
// ============================================================================

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::platform::{Credentials, PlatformError, PlatformResult};

use super::api_types::Fault;

type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Upper bound for a single HTTP exchange
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a `?search=` query for the engine's search language
pub fn search_query(expression: &str) -> String {
    format!("search={}", utf8_percent_encode(expression, NON_ALPHANUMERIC))
}

/// oVirt API client authenticating every request with HTTP Basic
#[derive(Clone)]
pub struct OvirtApiClient {
    /// HTTP client for API communication
    http_client: HttpClient,

    /// API root, e.g. `https://engine/ovirt-engine/api`
    base_url: String,

    /// Pre-encoded `Authorization` header value
    authorization: String,
}

impl std::fmt::Debug for OvirtApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvirtApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OvirtApiClient {
    /// Create a new client for the given credentials
    pub fn new(credentials: &Credentials) -> PlatformResult<Self> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(credentials.insecure)
            .danger_accept_invalid_hostnames(credentials.insecure)
            .build()
            .map_err(|e| {
                PlatformError::connection(
                    credentials.url.as_str(),
                    format!("Failed to initialise TLS: {e}"),
                )
            })?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let connector = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));
        let http_client = Client::builder(TokioExecutor::new()).build(connector);

        let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));

        Ok(Self {
            http_client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {token}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        operation: &'static str,
    ) -> PlatformResult<(StatusCode, Bytes)> {
        let uri = format!("{}{}", self.base_url, path);
        debug!("{method} {uri}");

        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(header::AUTHORIZATION, self.authorization.as_str())
            .header(header::ACCEPT, "application/json")
            .header("Version", "4");
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }

        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| {
                PlatformError::unexpected(operation, format!("Failed to create HTTP request: {e}"))
            })?;

        let response = timeout(REQUEST_TIMEOUT, self.http_client.request(request))
            .await
            .map_err(|_| PlatformError::connection(self.base_url.as_str(), format!("{operation} timed out")))?
            .map_err(|e| PlatformError::connection(self.base_url.as_str(), format!("{operation} failed: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                PlatformError::connection(
                    self.base_url.as_str(),
                    format!("Failed to read {operation} response body: {e}"),
                )
            })?
            .to_bytes();

        if status == StatusCode::UNAUTHORIZED {
            return Err(PlatformError::connection(
                self.base_url.as_str(),
                "session rejected with 401 Unauthorized",
            ));
        }

        Ok((status, body))
    }

    fn check(status: StatusCode, body: Bytes, operation: &'static str) -> PlatformResult<Bytes> {
        if status.is_success() {
            return Ok(body);
        }

        let details = serde_json::from_slice::<Fault>(&body)
            .ok()
            .and_then(|fault| fault.message())
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());

        Err(PlatformError::request(operation, status.as_u16(), details))
    }

    fn decode<T: DeserializeOwned>(body: &[u8], operation: &'static str) -> PlatformResult<T> {
        serde_json::from_slice(body).map_err(|e| {
            PlatformError::unexpected(operation, format!("Failed to parse response: {e}"))
        })
    }

    fn encode<B: Serialize>(body: &B, operation: &'static str) -> PlatformResult<Vec<u8>> {
        serde_json::to_vec(body).map_err(|e| {
            PlatformError::unexpected(operation, format!("Failed to serialize request body: {e}"))
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
    ) -> PlatformResult<T> {
        let (status, body) = self.send(Method::GET, path, None, operation).await?;
        let body = Self::check(status, body, operation)?;
        Self::decode(&body, operation)
    }

    /// GET that maps 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
    ) -> PlatformResult<Option<T>> {
        let (status, body) = self.send(Method::GET, path, None, operation).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(status, body, operation)?;
        Self::decode(&body, operation).map(Some)
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        operation: &'static str,
    ) -> PlatformResult<T> {
        let payload = Self::encode(body, operation)?;
        let (status, body) = self.send(Method::POST, path, Some(payload), operation).await?;
        let body = Self::check(status, body, operation)?;
        Self::decode(&body, operation)
    }

    /// POST whose response body is irrelevant
    pub async fn post_action<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        operation: &'static str,
    ) -> PlatformResult<()> {
        let payload = Self::encode(body, operation)?;
        let (status, body) = self.send(Method::POST, path, Some(payload), operation).await?;
        Self::check(status, body, operation).map(|_| ())
    }

    /// DELETE; an already-missing resource counts as deleted
    pub async fn delete(&self, path: &str, operation: &'static str) -> PlatformResult<()> {
        let (status, body) = self.send(Method::DELETE, path, None, operation).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(status, body, operation).map(|_| ())
    }
}
