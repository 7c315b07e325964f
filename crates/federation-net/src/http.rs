//! HTTP/JSON sync transport

use crate::transport::{SyncTransport, TransportError};
use federation_core::{SyncAck, SyncMessage};
use std::time::Duration;
use tracing::debug;

/// Path every federation node serves sync messages on
pub const SYNC_PATH: &str = "/federation/sync";

/// Posts sync messages as JSON to `http://<address>/federation/sync`
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Sync endpoint for a peer address (`host:port` or a full base URL)
    pub fn sync_url(address: &str) -> String {
        let base = address.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}{SYNC_PATH}")
        } else {
            format!("http://{base}{SYNC_PATH}")
        }
    }
}

impl SyncTransport for HttpTransport {
    async fn send(&self, address: &str, message: SyncMessage) -> Result<SyncAck, TransportError> {
        let url = Self::sync_url(address);
        debug!("POST {} ({} to {})", url, message.sync_type(), message.to_node);

        let response = self.client.post(&url).json(&message).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use federation_core::{NodeId, SyncPayload, VectorClock};

    #[test]
    fn test_sync_url() {
        assert_eq!(
            HttpTransport::sync_url("10.0.0.1:8080"),
            "http://10.0.0.1:8080/federation/sync"
        );
        assert_eq!(
            HttpTransport::sync_url("https://peer.example/"),
            "https://peer.example/federation/sync"
        );
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn request() -> SyncMessage {
        SyncMessage::new(
            NodeId::from("a"),
            NodeId::from("b"),
            VectorClock::new(),
            SyncPayload::Request,
        )
    }

    #[tokio::test]
    async fn test_send_decodes_ack() {
        let router = Router::new().route(
            SYNC_PATH,
            post(|Json(msg): Json<SyncMessage>| async move {
                let version: VectorClock = [(msg.to_node.0.as_str(), 4)].into_iter().collect();
                Json(SyncAck::synced(version))
            }),
        );
        let addr = serve(router).await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let ack = transport.send(&addr, request()).await.unwrap();
        assert_eq!(ack.status, "synced");
        assert_eq!(ack.version.get(&NodeId::from("b")), 4);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let router = Router::new().route(
            SYNC_PATH,
            post(|| async { (StatusCode::BAD_REQUEST, "unknown peer") }),
        );
        let addr = serve(router).await;

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport.send(&addr, request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport.send(&addr, request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
