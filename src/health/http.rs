// ABOUTME: HTTP/1.1 GET probe built on a raw hyper client connection.
// ABOUTME: Reports the status code; the response body is drained and ignored.

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::Uri;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

use super::{HealthProbe, ProbeError};

#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }
}

fn invalid(endpoint: &str, reason: impl Into<String>) -> ProbeError {
    ProbeError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> Result<u16, ProbeError> {
        let uri = endpoint
            .parse::<Uri>()
            .map_err(|e| invalid(endpoint, e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(endpoint, format!("unsupported scheme {}", other))),
            None => return Err(invalid(endpoint, "missing scheme")),
        }
        let host = uri
            .host()
            .ok_or_else(|| invalid(endpoint, "missing host"))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let path = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let request = async {
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| ProbeError::Connect(e.to_string()))?;
            let io = TokioIo::new(stream);

            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ProbeError::Http(format!("handshake failed: {}", e)))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!("health probe connection error: {}", e);
                }
            });

            let req = hyper::Request::builder()
                .method("GET")
                .uri(path.as_str())
                .header("Host", format!("{}:{}", host, port))
                .header("User-Agent", concat!("shipline/", env!("CARGO_PKG_VERSION")))
                .body(http_body_util::Empty::<bytes::Bytes>::new())
                .map_err(|e| ProbeError::Http(format!("failed to build request: {}", e)))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ProbeError::Http(format!("request failed: {}", e)))?;
            let status = resp.status().as_u16();

            // Drain so the server sees a complete exchange.
            let _ = resp.into_body().collect().await;
            Ok(status)
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
    }
}
