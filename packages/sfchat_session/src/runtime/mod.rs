//! Async driver for [`Session`].
//!
//! One task owns the session and runs every event to completion before
//! taking the next. User commands arrive through [`SessionHandle`]; transport
//! and timer tasks feed an internal event channel.

mod tasks;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::mode::Mode;
use crate::session::{AttemptId, ConnectionState, Effect, Event, Session, SupervisorId};
use crate::transcript::{Presenter, SettingsSink};
use crate::transport::Connector;

/// Snapshot of the session, for status displays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub mode: Mode,
    pub endpoint: Option<Endpoint>,
    pub pending: bool,
    pub attempt: AttemptId,
    pub reconnecting: bool,
}

#[derive(Debug)]
enum SessionCommand {
    Apply {
        event: Event,
        respond_to: oneshot::Sender<()>,
    },
    /// Background connect to the stored endpoint, if any.
    Resume { respond_to: oneshot::Sender<()> },
    Status {
        respond_to: oneshot::Sender<SessionStatus>,
    },
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Gone)?;
        rx.await.map_err(|_| SessionError::NoResponse)
    }

    async fn apply(&self, event: Event) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Apply { event, respond_to })
            .await
    }

    /// User-initiated connect. Failures are reported to the presenter.
    pub async fn connect(
        &self,
        endpoint: Endpoint,
        credential: String,
    ) -> Result<(), SessionError> {
        self.apply(Event::Connect {
            endpoint,
            credential,
            explicit: true,
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.apply(Event::Disconnect).await
    }

    pub async fn switch_mode(&self) -> Result<(), SessionError> {
        self.apply(Event::SwitchMode).await
    }

    pub async fn send_chat(&self, body: String, media: Vec<String>) -> Result<(), SessionError> {
        self.apply(Event::SendChat { body, media }).await
    }

    /// Reconnect silently to the endpoint restored from settings.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Resume { respond_to })
            .await
    }

    /// [`SessionHandle::resume`] after `delay`, without blocking the caller.
    pub fn resume_after(&self, delay: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = handle.resume().await {
                debug!(error = %e, "startup connect skipped");
            }
        })
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|respond_to| SessionCommand::Status { respond_to })
            .await
    }

    /// Close the transport, stop all timers and end the actor task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Shutdown { respond_to })
            .await
    }
}

/// Start the session actor.
pub fn spawn_session<C: Connector>(
    session: Session,
    connector: C,
    presenter: Box<dyn Presenter>,
    settings: Box<dyn SettingsSink>,
) -> (SessionHandle, JoinHandle<()>) {
    let (sender, commands) = mpsc::channel(32);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let actor = SessionActor {
        session,
        connector: Arc::new(connector),
        presenter,
        settings,
        commands,
        events_tx,
        events_rx,
        link: None,
        connect_timer: None,
        supervisor: None,
        root: CancellationToken::new(),
    };
    let task = tokio::spawn(actor.run());
    (SessionHandle { sender }, task)
}

struct LinkSlot {
    attempt: AttemptId,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct SessionActor<C: Connector> {
    session: Session,
    connector: Arc<C>,
    presenter: Box<dyn Presenter>,
    settings: Box<dyn SettingsSink>,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    link: Option<LinkSlot>,
    connect_timer: Option<(AttemptId, CancellationToken)>,
    supervisor: Option<(SupervisorId, CancellationToken)>,
    /// Parent of every task token.
    root: CancellationToken,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self) {
        debug!("session actor started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.apply(event),
            }
        }
        self.root.cancel();
        debug!("session actor stopped");
    }

    /// Returns false when the actor should stop.
    fn command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Apply { event, respond_to } => {
                self.apply(event);
                let _ = respond_to.send(());
            }
            SessionCommand::Resume { respond_to } => {
                if let Some(endpoint) = self.session.endpoint().cloned() {
                    let credential = self.session.credential().to_string();
                    self.apply(Event::Connect {
                        endpoint,
                        credential,
                        explicit: false,
                    });
                }
                let _ = respond_to.send(());
            }
            SessionCommand::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            SessionCommand::Shutdown { respond_to } => {
                info!("session shutting down");
                self.apply(Event::Disconnect);
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.session.state(),
            mode: self.session.mode(),
            endpoint: self.session.endpoint().cloned(),
            pending: self.session.is_pending(),
            attempt: self.session.attempt(),
            reconnecting: self.session.supervisor().is_some(),
        }
    }

    fn apply(&mut self, event: Event) {
        for effect in self.session.handle(event) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { attempt, url } => {
                if let Some(old) = self.link.take() {
                    old.cancel.cancel();
                }
                let cancel = self.root.child_token();
                let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
                tokio::spawn(tasks::run_link(
                    self.connector.clone(),
                    url,
                    attempt,
                    outgoing_rx,
                    self.events_tx.clone(),
                    cancel.clone(),
                ));
                self.link = Some(LinkSlot {
                    attempt,
                    outgoing,
                    cancel,
                });
            }
            Effect::CloseTransport { attempt } => {
                if let Some(link) = self.link.take_if(|l| l.attempt == attempt) {
                    link.cancel.cancel();
                }
            }
            Effect::Send { attempt, frame } => {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%attempt, kind = frame.kind(), error = %e, "failed to encode frame");
                        return;
                    }
                };
                match &self.link {
                    Some(link) if link.attempt == attempt => {
                        if link.outgoing.send(text).is_err() {
                            debug!(%attempt, kind = frame.kind(), "link gone, frame dropped");
                        }
                    }
                    _ => debug!(%attempt, kind = frame.kind(), "no live link, frame dropped"),
                }
            }
            Effect::StartConnectTimer { attempt, after } => {
                if let Some((_, old)) = self.connect_timer.take() {
                    old.cancel();
                }
                let cancel = self.root.child_token();
                tasks::spawn_connect_timer(attempt, after, self.events_tx.clone(), cancel.clone());
                self.connect_timer = Some((attempt, cancel));
            }
            Effect::CancelConnectTimer { attempt } => {
                if let Some((_, cancel)) = self.connect_timer.take_if(|(a, _)| *a == attempt) {
                    cancel.cancel();
                }
            }
            Effect::StartSupervisor { supervisor, every } => {
                if let Some((_, old)) = self.supervisor.take() {
                    old.cancel();
                }
                let cancel = self.root.child_token();
                tasks::spawn_supervisor(supervisor, every, self.events_tx.clone(), cancel.clone());
                self.supervisor = Some((supervisor, cancel));
            }
            Effect::StopSupervisor { supervisor } => {
                if let Some((_, cancel)) = self.supervisor.take_if(|(s, _)| *s == supervisor) {
                    cancel.cancel();
                }
            }
            Effect::Present(command) => self.presenter.present(command),
            Effect::Persist(state) => {
                if let Err(e) = self.settings.persist(&state) {
                    warn!(error = %e, "failed to persist settings");
                }
            }
        }
    }
}
