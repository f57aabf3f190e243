//! `Backend` over the canvas REST API using reqwest.

use async_trait::async_trait;
use futures::StreamExt;
use nody_core::backend::{Backend, BackendError, ByteStream, Result};
use nody_core::records::{
    EdgeRecord, FileCreate, FileRecord, FolderRecord, OutputLog, ProjectSummary,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `GET /projects` has been served both bare and wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectList {
    Bare(Vec<ProjectSummary>),
    Wrapped { projects: Vec<ProjectSummary> },
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(api_url: &str) -> Result<Self> {
        let base = Url::parse(api_url)
            .map_err(|e| BackendError::Transport(format!("invalid base URL {}: {}", api_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "{} cannot be used as a base URL",
                api_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(transport)?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(transport)?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        debug!("GET {}", url);
        let response = self.send(self.client.get(url)).await?;
        decode(response, segments).await
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response, segments: &[&str]) -> Result<T> {
    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body)
        .map_err(|e| BackendError::Decode(format!("/{}: {}", segments.join("/"), e)))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        detail: error_detail(status.as_u16(), &body),
    })
}

/// Best-effort error message from a failed response body.
///
/// Uses the `detail` field of a JSON body (stringified when it is not a
/// string); falls back to a generic message naming the status.
pub fn error_detail(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned());

    match detail {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(Value::Null) | Some(Value::String(_)) | None => {
            format!("Request failed with status {}", status)
        }
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn files(&self) -> Result<Vec<FileRecord>> {
        self.get_json(&["files"]).await
    }

    async fn metadata_raw(&self) -> Result<String> {
        let url = self.url(&["metadata"]);
        debug!("GET {}", url);
        let response = self.send(self.client.get(url)).await?;
        response.text().await.map_err(transport)
    }

    async fn folders(&self) -> Result<Vec<FolderRecord>> {
        self.get_json(&["folders"]).await
    }

    async fn edges(&self) -> Result<Vec<EdgeRecord>> {
        self.get_json(&["edges"]).await
    }

    async fn output(&self) -> Result<OutputLog> {
        self.get_json(&["output"]).await
    }

    async fn projects(&self) -> Result<Vec<ProjectSummary>> {
        let list: ProjectList = self.get_json(&["projects"]).await?;
        match list {
            ProjectList::Bare(projects) | ProjectList::Wrapped { projects } => Ok(projects),
        }
    }

    async fn create_project(&self, name: &str, body: &Value) -> Result<Value> {
        let segments = ["projects", name, "create"];
        let url = self.url(&segments);
        debug!("POST {}", url);
        let response = self.send(self.client.post(url).json(body)).await?;
        decode(response, &segments).await
    }

    async fn create_file(&self, file: &FileCreate) -> Result<FileRecord> {
        let url = self.url(&["files"]);
        debug!("POST {} ({})", url, file.file_path);
        let response = self.send(self.client.post(url).json(file)).await?;
        decode(response, &["files"]).await
    }

    async fn update_description(&self, node_id: &str, description: &str) -> Result<()> {
        let url = self.url(&["files", node_id, "description"]);
        debug!("PUT {}", url);
        self.send(
            self.client
                .put(url)
                .json(&json!({ "description": description })),
        )
        .await?;
        Ok(())
    }

    async fn execute_stream(&self, command: &str) -> Result<ByteStream> {
        let url = self.url(&["terminal", "execute-stream"]);
        debug!("POST {}", url);
        let response = self
            .send(self.client.post(url).json(&json!({ "command": command })))
            .await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(transport))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_prefers_json_detail() {
        assert_eq!(
            error_detail(400, r#"{"detail":"Project 'x' already exists"}"#),
            "Project 'x' already exists"
        );
        assert_eq!(
            error_detail(422, r#"{"detail":[{"msg":"field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
    }

    #[test]
    fn test_error_detail_fallback() {
        assert_eq!(error_detail(502, "Bad Gateway"), "Request failed with status 502");
        assert_eq!(error_detail(500, r#"{"error":"x"}"#), "Request failed with status 500");
        assert_eq!(error_detail(500, r#"{"detail":""}"#), "Request failed with status 500");
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let backend = HttpBackend::new("http://localhost:8000").unwrap();
        assert_eq!(
            backend.url(&["projects", "my app", "create"]).as_str(),
            "http://localhost:8000/projects/my%20app/create"
        );

        let prefixed = HttpBackend::new("http://example.com/api").unwrap();
        assert_eq!(
            prefixed.url(&["files"]).as_str(),
            "http://example.com/api/files"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(HttpBackend::new("localhost").is_err());
        assert!(HttpBackend::new("mailto:someone@example.com").is_err());
    }
}
