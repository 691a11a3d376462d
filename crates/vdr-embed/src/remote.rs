//! HTTP client for an external multi-vector embedding service.
//!
//! Wire format (JSON):
//! - `POST {url}/encode/images` with `{"images": [{"filename": .., "data": <base64>}]}`
//! - `POST {url}/encode/queries` with `{"queries": [..]}`
//!
//! Both answer `{"embeddings": [[[f32; d]; n_i]; batch]}`, one entry per input
//! in request order. Any count or shape mismatch fails the whole call.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use vdr_core::config::EncoderSettings;
use vdr_core::traits::MultiVectorEncoder;
use vdr_core::types::{ImageInput, MultiVector};

#[derive(Serialize)]
struct ImagePayload<'a> {
    filename: &'a str,
    data: String,
}

#[derive(Serialize)]
struct ImagesRequest<'a> {
    images: Vec<ImagePayload<'a>>,
}

#[derive(Serialize)]
struct QueriesRequest<'a> {
    queries: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct EncodeResponse {
    pub embeddings: Vec<Vec<Vec<f32>>>,
}

pub struct RemoteEncoder {
    client: Client,
    base_url: String,
    dim: usize,
    id: String,
}

impl RemoteEncoder {
    pub fn new(settings: &EncoderSettings, dim: usize) -> Result<Self> {
        let base_url = settings
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("remote encoder requires encoder.url"))?
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        let id = format!("remote:{}:d{}", base_url, dim);
        Ok(Self { client, base_url, dim, id })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B, expected: usize) -> Result<Vec<MultiVector>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, text));
        }
        let payload: EncodeResponse = response.json().await.with_context(|| format!("invalid response body from {}", url))?;
        parse_embeddings(payload, expected, self.dim)
    }
}

/// Convert a service response into MultiVectors, checking the item count.
///
/// Each item's dimensionality is taken from its own rows so that a model/index
/// skew surfaces downstream as a dimension mismatch rather than being padded
/// or truncated here. `fallback_dim` only applies to items without rows.
pub fn parse_embeddings(payload: EncodeResponse, expected: usize, fallback_dim: usize) -> Result<Vec<MultiVector>> {
    if payload.embeddings.len() != expected {
        return Err(anyhow!("encoder returned {} embeddings for {} inputs", payload.embeddings.len(), expected));
    }
    payload
        .embeddings
        .into_iter()
        .enumerate()
        .map(|(i, rows)| {
            let dim = rows.first().map_or(fallback_dim, Vec::len);
            MultiVector::from_rows(dim, &rows).map_err(|e| anyhow!("embedding {}: {}", i, e))
        })
        .collect()
}

#[async_trait]
impl MultiVectorEncoder for RemoteEncoder {
    fn encoder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn encode_images(&self, images: &[ImageInput]) -> Result<Vec<MultiVector>> {
        if images.is_empty() { return Ok(Vec::new()); }
        let engine = base64::engine::general_purpose::STANDARD;
        let body = ImagesRequest {
            images: images.iter().map(|img| ImagePayload { filename: &img.filename, data: engine.encode(&img.bytes) }).collect(),
        };
        self.post("/encode/images", &body, images.len()).await
    }

    async fn encode_queries(&self, queries: &[String]) -> Result<Vec<MultiVector>> {
        if queries.is_empty() { return Ok(Vec::new()); }
        self.post("/encode/queries", &QueriesRequest { queries }, queries.len()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> EncodeResponse { serde_json::from_str(json).expect("valid json") }

    #[test]
    fn parses_one_multivector_per_item() {
        let payload = response(r#"{"embeddings": [[[1.0, 0.0], [0.0, 1.0]], [[0.5, 0.5]]]}"#);
        let out = parse_embeddings(payload, 2, 2).expect("parse");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 2);
        assert_eq!(out[1].as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn count_mismatch_fails_whole_call() {
        let payload = response(r#"{"embeddings": [[[1.0, 0.0]]]}"#);
        assert!(parse_embeddings(payload, 2, 2).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let payload = response(r#"{"embeddings": [[[1.0, 0.0], [1.0]]]}"#);
        assert!(parse_embeddings(payload, 1, 2).is_err());
    }

    #[test]
    fn foreign_dimension_is_preserved_for_downstream_checks() {
        let payload = response(r#"{"embeddings": [[[1.0, 0.0, 0.0]]]}"#);
        let out = parse_embeddings(payload, 1, 2).expect("parse");
        assert_eq!(out[0].dim(), 3);
    }

    #[test]
    fn new_requires_url() {
        assert!(RemoteEncoder::new(&EncoderSettings::default(), 128).is_err());
        let settings = EncoderSettings { url: Some("http://localhost:8005/".to_string()), ..EncoderSettings::default() };
        let enc = RemoteEncoder::new(&settings, 128).expect("encoder");
        assert_eq!(enc.encoder_id(), "remote:http://localhost:8005:d128");
    }

    /// Serves one canned HTTP response on a local port and hands back the raw
    /// request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.expect("read");
                if n == 0 { break; }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length { break; }
                }
            }
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    fn encoder_for(url: String, dim: usize) -> RemoteEncoder {
        RemoteEncoder::new(&EncoderSettings { url: Some(url), timeout_ms: 5_000, ..EncoderSettings::default() }, dim)
            .expect("encoder")
    }

    #[tokio::test]
    async fn queries_are_posted_as_json_batch() {
        let (url, server) = serve_once("200 OK", r#"{"embeddings": [[[1.0, 0.0], [0.0, 1.0]]]}"#).await;
        let out = encoder_for(url, 2).encode_queries(&["hello".to_string()]).await.expect("encode");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /encode/queries HTTP/1.1"), "got {request}");
        let body = &request[request.find("\r\n\r\n").expect("headers end") + 4..];
        let json: serde_json::Value = serde_json::from_str(body).expect("json body");
        assert_eq!(json, serde_json::json!({"queries": ["hello"]}));
    }

    #[tokio::test]
    async fn images_carry_filename_and_base64_data() {
        let (url, server) = serve_once("200 OK", r#"{"embeddings": [[[0.5, 0.5]]]}"#).await;
        let images = vec![ImageInput { filename: "p1.jpg".to_string(), bytes: b"abc".to_vec() }];
        encoder_for(url, 2).encode_images(&images).await.expect("encode");

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /encode/images HTTP/1.1"), "got {request}");
        let body = &request[request.find("\r\n\r\n").expect("headers end") + 4..];
        let json: serde_json::Value = serde_json::from_str(body).expect("json body");
        assert_eq!(json, serde_json::json!({"images": [{"filename": "p1.jpg", "data": "YWJj"}]}));
    }

    #[tokio::test]
    async fn error_status_fails_with_status_and_body() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"detail": "model not loaded"}"#).await;
        let err = encoder_for(url, 2).encode_queries(&["hello".to_string()]).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("500"), "got {msg}");
        assert!(msg.contains("model not loaded"), "got {msg}");
        server.await.expect("server");
    }
}
