//! # NextGIS Toolbox Client
//!
//! HTTP client for the Toolbox conversion API:
//!
//! - `POST {upload_url}{file_name}` with the archive as body, returns a file id
//! - `POST {execute_url}` with an `import_egrn` operation, returns `task_id`
//! - `GET {status_url}{task_id}/` returns `state`, `error`, and `output`
//! - `GET {result_url}` downloads the converted archive
//!
//! Every request carries `Authorization: Token ...`. Timeouts, connection
//! failures and 5xx answers are retried up to `max_attempts` with a doubling
//! pause; 4xx answers are returned immediately.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{ConversionClient, RemoteError, RemoteJobState, RemoteJobStatus, RemoteResult};
use crate::config::ToolboxConfig;
use crate::constants;
use crate::models::ConversionOptions;

#[derive(Clone)]
pub struct ToolboxClient {
    client: Client,
    config: ToolboxConfig,
}

impl std::fmt::Debug for ToolboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolboxClient")
            .field("upload_url", &self.config.upload_url)
            .field("execute_url", &self.config.execute_url)
            .field("status_url", &self.config.status_url)
            .field("timeout_seconds", &self.config.request_timeout_seconds)
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ImportRequest<'a> {
    operation: &'a str,
    inputs: ImportInputs<'a>,
}

#[derive(Debug, Serialize)]
struct ImportInputs<'a> {
    source_file: &'a str,
    identifier: &'a str,
    data_format: &'a str,
    unite: bool,
    do_not_transform: bool,
    ignore_without_geom: bool,
    remove_empty_attributes: bool,
    parse_reestr_extract: bool,
}

impl<'a> ImportRequest<'a> {
    fn new(file_id: &'a str, identifier: &'a str, options: &'a ConversionOptions) -> Self {
        Self {
            operation: constants::remote::IMPORT_OPERATION,
            inputs: ImportInputs {
                source_file: file_id,
                identifier,
                data_format: options.format.as_str(),
                unite: options.merge_objects,
                do_not_transform: options.save_default_crs,
                ignore_without_geom: options.skip_empty_geom,
                remove_empty_attributes: options.remove_empty_attrs,
                parse_reestr_extract: options.convert_additional_data,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    task_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    output: Vec<OutputEntry>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(default)]
    value: Option<String>,
}

impl StatusResponse {
    fn into_status(self) -> RemoteResult<RemoteJobStatus> {
        let state = RemoteJobState::from_remote(&self.state);
        let status = match state {
            RemoteJobState::Success => {
                let locator = self
                    .output
                    .into_iter()
                    .find_map(|entry| entry.value)
                    .ok_or_else(|| {
                        RemoteError::InvalidResponse(
                            "successful job without output location".to_string(),
                        )
                    })?;
                RemoteJobStatus::success(locator)
            }
            RemoteJobState::Failed => {
                RemoteJobStatus::failed(self.error.filter(|e| !e.trim().is_empty()))
            }
            RemoteJobState::Cancelled => RemoteJobStatus::cancelled(),
            RemoteJobState::Pending => RemoteJobStatus::pending(),
        };
        Ok(status)
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

impl ToolboxClient {
    pub fn new(config: ToolboxConfig) -> RemoteResult<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token))
            .map_err(|e| RemoteError::Configuration(format!("Invalid token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(constants::remote::USER_AGENT)
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| RemoteError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Send a request, retrying transport failures and server errors
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> RemoteResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.retry_base_delay();
        let mut last_error = RemoteError::Transport(format!("{operation}: no attempt made"));

        for attempt in 1..=max_attempts {
            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    if status.is_client_error() {
                        error!(operation = operation, status = %status, body = %body, "Toolbox rejected request");
                        return Err(RemoteError::Rejected {
                            status: status.as_u16(),
                            body,
                        });
                    }

                    warn!(
                        operation = operation,
                        status = %status,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        "Toolbox server error, will retry"
                    );
                    last_error = RemoteError::Transport(format!("HTTP {status}: {body}"));
                }
                Err(e) => {
                    warn!(
                        operation = operation,
                        error = %e,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        "Toolbox request failed, will retry"
                    );
                    last_error = transport_error(e);
                }
            }

            if attempt < max_attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(Duration::from_secs(30));
            }
        }

        error!(operation = operation, max_attempts = max_attempts, "Exhausted Toolbox request attempts");
        Err(last_error)
    }

    async fn upload(&self, source: &Path) -> RemoteResult<String> {
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteError::Source {
                path: source.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
        let content = tokio::fs::read(source)
            .await
            .map_err(|e| RemoteError::Source {
                path: source.display().to_string(),
                reason: e.to_string(),
            })?;

        let url = format!("{}{}", self.config.upload_url, file_name);
        let response = self
            .send_with_retry("upload", || self.client.post(&url).body(content.clone()))
            .await?;
        let file_id = response.text().await.map_err(transport_error)?;
        let file_id = file_id.trim().to_string();

        if file_id.is_empty() {
            return Err(RemoteError::InvalidResponse(
                "upload returned an empty file id".to_string(),
            ));
        }

        debug!(file = %file_name, file_id = %file_id, "Archive uploaded to Toolbox");
        Ok(file_id)
    }

    async fn execute(
        &self,
        file_id: &str,
        identifier: &str,
        options: &ConversionOptions,
    ) -> RemoteResult<String> {
        let request = ImportRequest::new(file_id, identifier, options);
        let response = self
            .send_with_retry("execute", || {
                self.client.post(&self.config.execute_url).json(&request)
            })
            .await?;

        let parsed: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("execute response: {e}")))?;

        match parsed.task_id {
            serde_json::Value::String(id) if !id.is_empty() => Ok(id),
            serde_json::Value::Number(id) => Ok(id.to_string()),
            other => Err(RemoteError::InvalidResponse(format!(
                "unexpected task_id: {other}"
            ))),
        }
    }
}

#[async_trait]
impl ConversionClient for ToolboxClient {
    async fn submit(
        &self,
        source: &Path,
        identifier: &str,
        options: &ConversionOptions,
    ) -> RemoteResult<String> {
        let file_id = self.upload(source).await?;
        let handle = self.execute(&file_id, identifier, options).await?;
        info!(identifier = %identifier, handle = %handle, "Conversion job submitted");
        Ok(handle)
    }

    async fn poll(&self, handle: &str) -> RemoteResult<RemoteJobStatus> {
        let url = format!("{}{}/", self.config.status_url, handle);
        let response = self
            .send_with_retry("status", || self.client.get(&url))
            .await?;

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("status response: {e}")))?;

        debug!(handle = %handle, state = %parsed.state, "Toolbox job status");
        parsed.into_status()
    }

    async fn fetch(&self, locator: &str) -> RemoteResult<Vec<u8>> {
        let response = self
            .send_with_retry("download", || self.client.get(locator))
            .await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputFormat;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection, in order
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buffer = vec![0u8; 4096];
                let mut received = Vec::new();
                loop {
                    let n = socket.read(&mut buffer).await.unwrap();
                    received.extend_from_slice(&buffer[..n]);
                    if n == 0 || received.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} STATUS\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{addr}/status/")
    }

    fn client(status_url: String) -> ToolboxClient {
        ToolboxClient::new(ToolboxConfig {
            upload_url: "http://127.0.0.1:9/upload/".into(),
            execute_url: "http://127.0.0.1:9/execute/".into(),
            status_url,
            token: "test-token".into(),
            request_timeout_seconds: 5,
            max_attempts: 3,
            retry_base_delay_ms: 0,
            accept_invalid_certs: false,
        })
        .unwrap()
    }

    #[test]
    fn test_import_request_shape() {
        let options = ConversionOptions {
            format: OutputFormat::Gpkg,
            merge_objects: true,
            ..ConversionOptions::default()
        };
        let request = ImportRequest::new("file-1", "kpt_01", &options);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["operation"], "import_egrn");
        assert_eq!(json["inputs"]["source_file"], "file-1");
        assert_eq!(json["inputs"]["identifier"], "kpt_01");
        assert_eq!(json["inputs"]["data_format"], "GPKG");
        assert_eq!(json["inputs"]["unite"], true);
        assert_eq!(json["inputs"]["do_not_transform"], true);
        assert_eq!(json["inputs"]["parse_reestr_extract"], false);
    }

    #[test]
    fn test_status_response_mapping() {
        let success: StatusResponse = serde_json::from_str(
            r#"{"state": "SUCCESS", "output": [{"value": "https://toolbox/result.zip"}]}"#,
        )
        .unwrap();
        assert_eq!(
            success.into_status().unwrap(),
            RemoteJobStatus::success("https://toolbox/result.zip")
        );

        let failed: StatusResponse =
            serde_json::from_str(r#"{"state": "FAILED", "error": ""}"#).unwrap();
        assert_eq!(failed.into_status().unwrap(), RemoteJobStatus::failed(None));

        let running: StatusResponse = serde_json::from_str(r#"{"state": "STARTED"}"#).unwrap();
        assert_eq!(running.into_status().unwrap(), RemoteJobStatus::pending());

        let broken: StatusResponse =
            serde_json::from_str(r#"{"state": "SUCCESS", "output": []}"#).unwrap();
        assert!(matches!(
            broken.into_status(),
            Err(RemoteError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = client("http://127.0.0.1:9/status/".into());
        let debug = format!("{client:?}");
        assert!(!debug.contains("test-token"));
    }

    #[tokio::test]
    async fn test_poll_retries_server_errors() {
        let url = serve(vec![
            (503, r#"{"detail": "busy"}"#),
            (200, r#"{"state": "CANCELLED"}"#),
        ])
        .await;

        let status = client(url).poll("job-1").await.unwrap();
        assert_eq!(status.state, RemoteJobState::Cancelled);
    }

    #[tokio::test]
    async fn test_poll_does_not_retry_client_errors() {
        let url = serve(vec![(404, r#"{"detail": "unknown task"}"#)]).await;

        let err = client(url).poll("job-404").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }
}
