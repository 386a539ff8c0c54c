//! Generation over HTTP
//!
//! POSTs the [`GenerationRequest`] as JSON and expects a
//! `{success, payload, error}` body back.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{GenerationRequest, GenerationResponse, Generator};

pub struct HttpGenerator {
    url: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &GenerationRequest) -> Result<GenerationResponse, String> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("Generation request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Generation service returned {status}: {body}"));
        }

        response
            .json::<GenerationResponse>()
            .await
            .map_err(|e| format!("Invalid generation response: {e}"))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: GenerationRequest) -> GenerationResponse {
        debug!(url = %self.url, session_id = %request.session_id, "Requesting generation");
        match self.post(&request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %self.url, %error, "Generation call failed");
                GenerationResponse::failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ModeId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> GenerationRequest {
        GenerationRequest {
            session_id: "s1".into(),
            mode: Some(ModeId::Flashcard),
            count: Some(3),
            topic: None,
            chunks: vec!["cells have walls".into()],
            summary: None,
        }
    }

    /// Serve one canned HTTP response and hand back the request body
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/generate", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let body_start = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending a full request");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..body_start]).to_ascii_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while buf.len() < body_start + length {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending a full request");
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(buf[body_start..].to_vec()).unwrap()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_posts_request_and_parses_response() {
        let (url, server) =
            serve_once("200 OK", r#"{"success": true, "payload": {"cards": 3}}"#).await;

        let response = HttpGenerator::new(url).generate(request()).await;
        assert!(response.success);
        assert_eq!(response.payload["cards"], 3);

        let sent: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent["mode"], "flashcard");
        assert_eq!(sent["chunks"][0], "cells have walls");
    }

    #[tokio::test]
    async fn test_error_status_becomes_failure() {
        let (url, _server) = serve_once("503 Service Unavailable", r#"{"detail": "busy"}"#).await;

        let response = HttpGenerator::new(url).generate(request()).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_canned_server_fails_when_client_hangs_up() {
        let (url, server) = serve_once("200 OK", "{}").await;
        let addr = url
            .trim_start_matches("http://")
            .trim_end_matches("/generate")
            .to_string();
        drop(tokio::net::TcpStream::connect(addr).await.unwrap());

        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server task hung after client closed");
        assert!(joined.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_connection_refused_becomes_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let response = HttpGenerator::new(format!("http://{addr}/generate"))
            .generate(request())
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("Generation request failed"));
    }
}
