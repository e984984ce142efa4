//! Sandbox API client
//!
//! [`SandboxApi`] is the seam between the controller and the remote
//! sandbox service. [`HttpSandboxClient`] speaks the HTTP protocol:
//!
//! - create: `POST` of the packaged payload; the answer is either an
//!   immediate JSON [`SandboxInfo`] or a stream of prefixed frames
//! - teardown: `POST` of a [`TeardownRequest`], best effort
//! - process logs: `GET` of a companion frame stream for a sandbox

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{PreviewError, Result};
use crate::packager::PackagedPayload;
use crate::protocol::{ByteStream, SandboxInfo, TeardownRequest};

/// Tells the sandbox to gunzip the body before unzipping it
pub const PAYLOAD_ENCODING_HEADER: &str = "x-payload-encoding";

/// Answer to a creation request
pub enum CreateSessionResponse {
    /// Non-streaming short circuit
    Immediate(SandboxInfo),
    /// Frame stream to hand to a reader
    Streaming(ByteStream),
}

impl fmt::Debug for CreateSessionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateSessionResponse::Immediate(info) => {
                f.debug_tuple("Immediate").field(info).finish()
            }
            CreateSessionResponse::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

#[async_trait]
pub trait SandboxApi: Send + Sync {
    /// Checks that must pass before any network call
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    async fn create_session(&self, payload: &PackagedPayload) -> Result<CreateSessionResponse>;

    async fn teardown(&self, sandbox_id: &str) -> Result<()>;

    /// Companion stream of the sandbox process's own output
    async fn process_logs(&self, sandbox_id: &str) -> Result<ByteStream>;
}

/// reqwest-backed [`SandboxApi`]
#[derive(Clone)]
pub struct HttpSandboxClient {
    client: Client,
    config: ApiConfig,
}

impl HttpSandboxClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        // Connect timeout only; the frame stream may stay open indefinitely.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Turn a non-2xx response into [`PreviewError::HttpStatus`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PreviewError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

fn into_byte_stream(response: Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(PreviewError::from)),
    )
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

#[async_trait]
impl SandboxApi for HttpSandboxClient {
    fn preflight(&self) -> Result<()> {
        if self.config.require_auth && self.config.auth_token.is_none() {
            return Err(PreviewError::MissingAuth);
        }
        Ok(())
    }

    async fn create_session(&self, payload: &PackagedPayload) -> Result<CreateSessionResponse> {
        self.preflight()?;

        let url = self.config.endpoint(&self.config.create_path);
        debug!("Requesting sandbox session at {} ({} bytes)", url, payload.bytes.len());

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(ACCEPT, "text/event-stream, application/json")
            .header(PAYLOAD_ENCODING_HEADER, payload.metadata.diagnostics.compression.as_str())
            .body(payload.bytes.clone());

        let response = check_status(self.authorize(request).send().await?).await?;

        if is_json(&response) {
            let info: SandboxInfo = response.json().await?;
            debug!("Sandbox {} answered without streaming", info.sandbox_id);
            Ok(CreateSessionResponse::Immediate(info))
        } else {
            Ok(CreateSessionResponse::Streaming(into_byte_stream(response)))
        }
    }

    async fn teardown(&self, sandbox_id: &str) -> Result<()> {
        let url = self.config.endpoint(&self.config.teardown_path);
        let request = self.client.post(&url).json(&TeardownRequest {
            sandbox_id: sandbox_id.to_string(),
        });
        check_status(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn process_logs(&self, sandbox_id: &str) -> Result<ByteStream> {
        let url = Url::parse_with_params(
            &self.config.endpoint(&self.config.process_logs_path),
            &[("sandboxId", sandbox_id)],
        )
        .map_err(|e| PreviewError::Config(format!("Invalid process log URL: {e}")))?;

        let request = self.client.get(url).header(ACCEPT, "text/event-stream");
        let response = check_status(self.authorize(request).send().await?).await?;
        Ok(into_byte_stream(response))
    }
}
