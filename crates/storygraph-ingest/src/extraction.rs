//! Extraction backends.
//!
//! A backend receives the document text plus the registry entries already
//! known for names detected in it, and returns a raw [`KgFragment`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use storygraph_core::{DocumentId, KgFragment};
use storygraph_registry::ContextMatch;

use crate::document::Document;
use crate::error::ExtractionError;

/// Everything a backend gets to see for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    pub document_id: DocumentId,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub text: String,
    pub known_entities: Vec<ContextMatch>,
}

impl ExtractionRequest {
    pub fn new(document: &Document, known_entities: Vec<ContextMatch>) -> Self {
        Self {
            document_id: document.id.clone(),
            title: document.title.clone(),
            date: document.date,
            text: document.text.clone(),
            known_entities,
        }
    }
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<KgFragment, ExtractionError>;
}

/// POSTs the request as JSON and expects a fragment back.
pub struct HttpExtractionBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExtractionBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExtractionBackend for HttpExtractionBackend {
    async fn extract(&self, request: &ExtractionRequest) -> Result<KgFragment, ExtractionError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        Ok(KgFragment::from_json(&body)?)
    }
}

/// Reads `<document id>.kg.json` produced by an earlier offline run.
#[derive(Debug, Default, Clone)]
pub struct SidecarBackend {
    /// Directory that relative document ids are resolved against.
    pub root: Option<PathBuf>,
}

impl SidecarBackend {
    pub fn sidecar_path(&self, document_id: &DocumentId) -> PathBuf {
        let file = PathBuf::from(format!("{document_id}.kg.json"));
        match &self.root {
            Some(root) if file.is_relative() => root.join(file),
            _ => file,
        }
    }
}

#[async_trait]
impl ExtractionBackend for SidecarBackend {
    async fn extract(&self, request: &ExtractionRequest) -> Result<KgFragment, ExtractionError> {
        let path = self.sidecar_path(&request.document_id);
        let raw = tokio::fs::read_to_string(&path).await?;
        tracing::debug!(
            document_id = %request.document_id,
            path = %path.display(),
            "Loaded sidecar fragment"
        );
        Ok(KgFragment::from_json(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ExtractionRequest {
        ExtractionRequest::new(&Document::new(id, "t", "text"), Vec::new())
    }

    #[tokio::test]
    async fn test_sidecar_reads_fragment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("doc1.txt.kg.json"),
            r#"{"entities": [{"name": "Газпром", "label": "Organization"}], "relationships": []}"#,
        )
        .unwrap();
        let backend = SidecarBackend {
            root: Some(dir.path().to_path_buf()),
        };

        let fragment = backend.extract(&request("doc1.txt")).await.unwrap();
        assert_eq!(fragment.entities[0].name, "Газпром");
    }

    #[tokio::test]
    async fn test_sidecar_rejects_unusable_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.kg.json"), "not json").unwrap();
        let backend = SidecarBackend {
            root: Some(dir.path().to_path_buf()),
        };

        assert!(matches!(
            backend.extract(&request("bad")).await,
            Err(ExtractionError::Unusable(_))
        ));
        assert!(matches!(
            backend.extract(&request("missing")).await,
            Err(ExtractionError::Io(_))
        ));
    }

    /// Answers a single HTTP request with a canned status and body.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
                let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&received[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if received.len() >= end + 4 + body_len {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/extract")
    }

    fn http_backend(endpoint: &str) -> HttpExtractionBackend {
        HttpExtractionBackend::new(endpoint, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_http_returns_fragment() {
        let endpoint = serve_once(
            "200 OK",
            r#"{"entities": [{"name": "Минск", "label": "City"}], "relationships": []}"#,
        )
        .await;
        let fragment = http_backend(&endpoint).extract(&request("doc1")).await.unwrap();
        assert_eq!(fragment.entities[0].name, "Минск");
    }

    #[tokio::test]
    async fn test_http_error_status_maps_to_api_error() {
        let endpoint = serve_once("503 Service Unavailable", "model overloaded").await;
        match http_backend(&endpoint).extract(&request("doc1")).await {
            Err(ExtractionError::Api { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_unparsable_body_is_unusable() {
        let endpoint = serve_once("200 OK", "Sure! Here are the entities:").await;
        assert!(matches!(
            http_backend(&endpoint).extract(&request("doc1")).await,
            Err(ExtractionError::Unusable(_))
        ));
    }

    #[tokio::test]
    async fn test_http_unreachable_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            http_backend(&format!("http://{addr}/extract"))
                .extract(&request("doc1"))
                .await,
            Err(ExtractionError::Transport(_))
        ));
    }

    #[test]
    fn test_request_serializes_context() {
        let req = ExtractionRequest::new(
            &Document::new("d", "t", "Путин"),
            vec![ContextMatch {
                original: "Путина".into(),
                matched: "владимир путин".into(),
                description: Some("политик".into()),
            }],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["document_id"], "d");
        assert_eq!(json["known_entities"][0]["matched"], "владимир путин");
    }
}
