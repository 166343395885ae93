//! Transport seam between the protocol client and the store.
//!
//! `UploadTransport` keeps protocol logic independent of HTTP so it can be
//! driven by an in-process store or a scripted mock in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chunkvault_protocol::constants::{OWNER_HEADER, routes};
use chunkvault_protocol::{
    ApiError, CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, ErrorCode,
    HandshakeRequest, HandshakeResponse,
};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// Boxed future returned by [`UploadTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Request/response access to an upload store.
pub trait UploadTransport: Send + Sync {
    fn handshake<'a>(&'a self, req: &'a HandshakeRequest) -> TransportFuture<'a, HandshakeResponse>;

    fn upload_chunk<'a>(
        &'a self,
        query: &'a ChunkQuery,
        data: Vec<u8>,
    ) -> TransportFuture<'a, ChunkResponse>;

    fn cancel<'a>(&'a self, req: &'a CancelRequest) -> TransportFuture<'a, CancelResponse>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// [`UploadTransport`] over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    owner_id: String,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (e.g. `http://127.0.0.1:8787`)
    /// that authenticates as `owner_id`.
    pub fn new(
        base_url: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url, owner_id))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner_id: owner_id.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .header(OWNER_HEADER, &self.owner_id)
            .json(body)
            .send()
            .await?;
        read_response(resp).await
    }
}

async fn read_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let code = status.as_u16();
    let body = resp.bytes().await?;
    let error = serde_json::from_slice::<ApiError>(&body).unwrap_or_else(|_| {
        ApiError::new(ErrorCode::Internal, String::from_utf8_lossy(&body).into_owned())
    });
    Err(ClientError::from_api(code, error))
}

impl UploadTransport for HttpTransport {
    fn handshake<'a>(&'a self, req: &'a HandshakeRequest) -> TransportFuture<'a, HandshakeResponse> {
        Box::pin(self.post_json(routes::HANDSHAKE, req))
    }

    fn upload_chunk<'a>(
        &'a self,
        query: &'a ChunkQuery,
        data: Vec<u8>,
    ) -> TransportFuture<'a, ChunkResponse> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(routes::CHUNK))
                .header(OWNER_HEADER, &self.owner_id)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .query(query)
                .body(data)
                .send()
                .await?;
            read_response(resp).await
        })
    }

    fn cancel<'a>(&'a self, req: &'a CancelRequest) -> TransportFuture<'a, CancelResponse> {
        Box::pin(self.post_json(routes::CANCEL, req))
    }
}
