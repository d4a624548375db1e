//! End-to-end: the session runtime talking to an in-process websocket backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use sfchat_session::{
    ConnectionState, Endpoint, Notice, Origin, PersistedState, PresentCommand, Presenter,
    RelayRoutes, Session, SessionConfig, SessionHandle, SettingsSink, Transcript, WsConnector,
    spawn_session,
};

const PASSWORD: &str = "secret";

#[derive(Clone, Default)]
struct Backend {
    /// Fired to make the server drop every open socket.
    kick: Arc<Notify>,
    connections: Arc<Mutex<u32>>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(backend): State<Backend>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, backend))
}

async fn serve_socket(mut socket: WebSocket, backend: Backend) {
    *backend.connections.lock().unwrap() += 1;
    loop {
        tokio::select! {
            _ = backend.kick.notified() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            msg = socket.recv() => {
                let Some(Ok(Message::Text(text))) = msg else { return };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                let reply = match frame["type"].as_str() {
                    Some("auth") => json!({"type": "auth", "success": frame["password"] == PASSWORD}),
                    Some("loadHistory") => json!({
                        "type": "history",
                        "messages": [
                            {"content": format!("earlier in {}", frame["mode"].as_str().unwrap()), "role": "user"},
                            {"content": "noted", "role": "assistant"},
                        ],
                    }),
                    Some(_) => json!({"content": format!("echo: {}", frame["content"].as_str().unwrap())}),
                    None => continue,
                };
                if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn start_backend() -> (u16, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/", get(ws_handler))
        .with_state(backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, backend)
}

#[derive(Clone, Default)]
struct Screen {
    transcript: Arc<Mutex<Transcript>>,
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl Presenter for Screen {
    fn present(&mut self, command: PresentCommand) {
        if let PresentCommand::Notice(notice) = &command {
            self.notices.lock().unwrap().push(notice.clone());
        }
        self.transcript.lock().unwrap().apply(&command);
    }
}

struct NoSettings;

impl SettingsSink for NoSettings {
    fn persist(&mut self, _state: &PersistedState) -> anyhow::Result<()> {
        Ok(())
    }
}

fn start_session(reconnect_interval: Duration) -> (SessionHandle, Screen) {
    let screen = Screen::default();
    let config = SessionConfig {
        routes: RelayRoutes::direct(),
        reconnect_interval,
        ..SessionConfig::default()
    };
    let (handle, _task) = spawn_session(
        Session::new(config),
        WsConnector,
        Box::new(screen.clone()),
        Box::new(NoSettings),
    );
    (handle, screen)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_state(handle: &SessionHandle, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.status().await.unwrap().state != state {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("state not reached in time");
}

#[tokio::test]
async fn connects_loads_history_and_chats() {
    let (port, _backend) = start_backend().await;
    let (handle, screen) = start_session(Duration::from_secs(5));

    handle
        .connect(Endpoint::new("127.0.0.1", Some(port)), PASSWORD.into())
        .await
        .unwrap();
    wait_for_state(&handle, ConnectionState::Ready).await;
    wait_until(|| screen.transcript.lock().unwrap().len() == 2).await;
    assert_eq!(
        screen.transcript.lock().unwrap().entries(),
        vec![(Origin::LocalUser, "earlier in ss"), (Origin::RemotePeer, "noted")]
    );
    assert_eq!(*screen.notices.lock().unwrap(), vec![Notice::Connected]);

    handle.send_chat("ping".into(), vec![]).await.unwrap();
    wait_until(|| screen.transcript.lock().unwrap().len() == 4).await;
    let transcript = screen.transcript.lock().unwrap().clone();
    assert_eq!(transcript.entries()[3], (Origin::RemotePeer, "echo: ping"));
    assert!(!transcript.is_pending());

    handle.switch_mode().await.unwrap();
    wait_until(|| {
        screen.transcript.lock().unwrap().entries().first().map(|e| e.1) == Some("earlier in gg")
    })
    .await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (port, _backend) = start_backend().await;
    let (handle, screen) = start_session(Duration::from_secs(60));

    handle
        .connect(Endpoint::new("127.0.0.1", Some(port)), "nope".into())
        .await
        .unwrap();
    wait_until(|| {
        screen
            .notices
            .lock()
            .unwrap()
            .contains(&Notice::CredentialRejected)
    })
    .await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.reconnecting);
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let (port, backend) = start_backend().await;
    let (handle, screen) = start_session(Duration::from_millis(200));

    handle
        .connect(Endpoint::new("127.0.0.1", Some(port)), PASSWORD.into())
        .await
        .unwrap();
    wait_for_state(&handle, ConnectionState::Ready).await;

    backend.kick.notify_waiters();
    wait_until(|| {
        screen
            .notices
            .lock()
            .unwrap()
            .contains(&Notice::ConnectionLost)
    })
    .await;

    wait_until(|| *backend.connections.lock().unwrap() >= 2).await;
    wait_for_state(&handle, ConnectionState::Ready).await;
}

#[tokio::test]
async fn unreachable_server_reports_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (handle, screen) = start_session(Duration::from_secs(60));
    handle
        .connect(Endpoint::new("127.0.0.1", Some(port)), PASSWORD.into())
        .await
        .unwrap();
    wait_until(|| {
        screen
            .notices
            .lock()
            .unwrap()
            .contains(&Notice::ConnectionFailed)
    })
    .await;
    assert_eq!(
        handle.status().await.unwrap().state,
        ConnectionState::Disconnected
    );
}
