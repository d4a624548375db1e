//! Transport relay.
//!
//! Accepts a websocket upgrade carrying `?url=<target>`, opens a websocket
//! to the target and forwards frames verbatim in both directions. The relay
//! knows nothing about the chat protocol.

use std::time::Duration;

use axum::Router;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const BANNER: &str = "WebSocket proxy server";

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Upper bound on opening the upstream connection.
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing target URL")]
    MissingTarget,

    #[error("Failed to connect to target: {0}")]
    Upstream(#[from] tungstenite::Error),

    #[error("Failed to connect to target: timed out after {0:?}")]
    Timeout(Duration),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingTarget => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Timeout(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

pub fn router(config: RelayConfig) -> Router {
    Router::new()
        .route("/", get(proxy_handler))
        .route("/proxy", get(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(config)
}

async fn proxy_handler(
    State(config): State<RelayConfig>,
    Query(query): Query<ProxyQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return BANNER.into_response();
    };
    match open_upstream(query.url, config.connect_timeout).await {
        Ok((target, upstream)) => upgrade
            .on_upgrade(move |client| pipe(client, upstream, target))
            .into_response(),
        Err(e) => {
            warn!(error = %e, "refusing relay request");
            e.into_response()
        }
    }
}

async fn open_upstream(
    url: Option<String>,
    connect_timeout: Duration,
) -> Result<(String, Upstream), RelayError> {
    let target = url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(RelayError::MissingTarget)?;
    debug!(%target, "connecting upstream");
    let connecting = tokio_tungstenite::connect_async(target.as_str());
    let (upstream, _) = tokio::time::timeout(connect_timeout, connecting)
        .await
        .map_err(|_| RelayError::Timeout(connect_timeout))??;
    Ok((target, upstream))
}

/// Forward frames until either side closes or errors, then close both.
async fn pipe(client: WebSocket, upstream: Upstream, target: String) {
    info!(%target, "relay opened");
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(msg) = client_rx.next().await {
            match msg {
                Ok(ws::Message::Close(_)) => break,
                Ok(msg) => {
                    let Some(msg) = to_upstream(msg) else { continue };
                    if let Err(e) = upstream_tx.send(msg).await {
                        debug!(error = %e, "upstream send failed");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "client error");
                    break;
                }
            }
        }
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(msg) => {
                    let Some(msg) = to_client(msg) else { continue };
                    if let Err(e) = client_tx.send(msg).await {
                        debug!(error = %e, "client send failed");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "upstream error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => debug!(%target, "client side ended"),
        _ = upstream_to_client => debug!(%target, "upstream side ended"),
    }

    let _ = upstream_tx.close().await;
    let _ = client_tx.close().await;
    info!(%target, "relay closed");
}

/// Data frames only; each side answers its own pings.
fn to_upstream(msg: ws::Message) -> Option<Message> {
    match msg {
        ws::Message::Text(text) => Some(Message::Text(text.as_str().into())),
        ws::Message::Binary(bytes) => Some(Message::Binary(bytes)),
        _ => None,
    }
}

fn to_client(msg: Message) -> Option<ws::Message> {
    match msg {
        Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
        Message::Binary(bytes) => Some(ws::Message::Binary(bytes)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn plain_request_gets_banner() {
        let resp = router(RelayConfig::default())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], BANNER.as_bytes());
    }

    #[tokio::test]
    async fn preflight_is_answered() {
        let resp = router(RelayConfig::default())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/proxy")
                    .header("origin", "https://example.com")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn missing_target_is_rejected() {
        assert!(matches!(
            open_upstream(Some("  ".into()), DEFAULT_CONNECT_TIMEOUT).await,
            Err(RelayError::MissingTarget)
        ));
        assert_eq!(
            RelayError::MissingTarget.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert!(matches!(
            open_upstream(None, DEFAULT_CONNECT_TIMEOUT).await,
            Err(RelayError::MissingTarget)
        ));
    }

    #[test]
    fn frames_cross_unchanged() {
        let up = to_upstream(ws::Message::Text("{\"a\":1}".into())).unwrap();
        assert_eq!(up, Message::Text("{\"a\":1}".into()));
        let down = to_client(Message::Binary(vec![1u8, 2, 3].into())).unwrap();
        assert_eq!(down, ws::Message::Binary(vec![1u8, 2, 3].into()));
        assert!(to_client(Message::Ping(Default::default())).is_none());
    }
}
