//! Connection state machine.
//!
//! [`Session`] is a pure transition function: it takes one [`Event`] at a
//! time and returns the [`Effect`]s the caller must carry out. It never
//! touches a socket or a clock-driven timer itself, which keeps every
//! transition testable without a runtime.
//!
//! Timers and transports are keyed by generation. Every `connect` and every
//! `disconnect` advances the [`AttemptId`]; events carrying an older attempt
//! are dropped. Supervisors get their own [`SupervisorId`] so a tick from a
//! replaced supervisor is a no-op too.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::coordinator::{ModeCoordinator, TurnCounter};
use crate::endpoint::{Endpoint, RelayRoutes};
use crate::mode::Mode;
use crate::protocol::{self, InboundFrame, OutboundFrame};
use crate::transcript::{ChatTurn, Notice, Origin, PersistedState, PresentCommand, TurnId};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_ID: &str = "web_user";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingAuth,
    Ready,
}

impl ConnectionState {
    /// Whether a transport is open and frames can be sent.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::AwaitingAuth | ConnectionState::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAuth => "awaiting_auth",
            ConnectionState::Ready => "ready",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection attempt generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId(pub u64);

impl AttemptId {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reconnect supervisor instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SupervisorId(pub u64);

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a transport went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly close from the peer or relay.
    Closed,
    /// Socket error, or the connection never opened.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Connect {
        endpoint: Endpoint,
        credential: String,
        explicit: bool,
    },
    Disconnect,
    SwitchMode,
    SendChat {
        body: String,
        media: Vec<String>,
    },
    TransportOpened {
        attempt: AttemptId,
    },
    TransportClosed {
        attempt: AttemptId,
        reason: CloseReason,
    },
    FrameReceived {
        attempt: AttemptId,
        text: String,
    },
    ConnectTimedOut {
        attempt: AttemptId,
    },
    ReconnectTick {
        supervisor: SupervisorId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    OpenTransport { attempt: AttemptId, url: String },
    CloseTransport { attempt: AttemptId },
    Send { attempt: AttemptId, frame: OutboundFrame },
    StartConnectTimer { attempt: AttemptId, after: Duration },
    CancelConnectTimer { attempt: AttemptId },
    StartSupervisor { supervisor: SupervisorId, every: Duration },
    StopSupervisor { supervisor: SupervisorId },
    Present(PresentCommand),
    Persist(PersistedState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub user_id: String,
    pub routes: RelayRoutes,
    /// Stop background retries after this many rejected credentials.
    /// `None` keeps retrying forever.
    pub auth_failure_limit: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            user_id: DEFAULT_USER_ID.to_string(),
            routes: RelayRoutes::default(),
            auth_failure_limit: None,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    coordinator: ModeCoordinator,
    endpoint: Option<Endpoint>,
    credential: String,

    attempt: AttemptId,
    attempt_explicit: bool,
    transport_live: bool,
    connect_timer_armed: bool,

    supervisor: Option<SupervisorId>,
    next_supervisor: u64,

    response_pending: bool,
    auth_failures: u32,
    turns: TurnCounter,
    last_local_turn: Option<TurnId>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            coordinator: ModeCoordinator::default(),
            endpoint: None,
            credential: String::new(),
            attempt: AttemptId::default(),
            attempt_explicit: false,
            transport_live: false,
            connect_timer_armed: false,
            supervisor: None,
            next_supervisor: 0,
            response_pending: false,
            auth_failures: 0,
            turns: TurnCounter::default(),
            last_local_turn: None,
        }
    }

    /// A session seeded from persisted settings. Does not connect.
    pub fn restored(mut config: SessionConfig, saved: &PersistedState) -> Self {
        if !saved.user_id.trim().is_empty() {
            config.user_id = saved.user_id.trim().to_string();
        }
        let mut session = Self::new(config);
        session.coordinator = ModeCoordinator::new(saved.mode);
        session.endpoint = saved.endpoint.clone().filter(Endpoint::is_configured);
        session.credential = saved.credential.clone();
        session
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.coordinator.active()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn supervisor(&self) -> Option<SupervisorId> {
        self.supervisor
    }

    pub fn is_pending(&self) -> bool {
        self.response_pending
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            endpoint: self.endpoint.clone(),
            mode: self.coordinator.active(),
            credential: self.credential.clone(),
            user_id: self.config.user_id.clone(),
        }
    }

    /// Apply one event and return the effects to execute, in order.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            Event::Connect {
                endpoint,
                credential,
                explicit,
            } => self.connect(endpoint, credential, explicit, &mut fx),
            Event::Disconnect => self.disconnect(&mut fx),
            Event::SwitchMode => self.switch_mode(&mut fx),
            Event::SendChat { body, media } => self.send_chat(body, media, &mut fx),
            Event::TransportOpened { attempt } => self.transport_opened(attempt, &mut fx),
            Event::TransportClosed { attempt, reason } => {
                self.transport_closed(attempt, reason, &mut fx)
            }
            Event::FrameReceived { attempt, text } => self.frame_received(attempt, &text, &mut fx),
            Event::ConnectTimedOut { attempt } => self.connect_timed_out(attempt, &mut fx),
            Event::ReconnectTick { supervisor } => self.reconnect_tick(supervisor, &mut fx),
        }
        fx
    }

    fn connect(
        &mut self,
        endpoint: Endpoint,
        credential: String,
        explicit: bool,
        fx: &mut Vec<Effect>,
    ) {
        if !endpoint.is_configured() {
            if explicit {
                fx.push(notice(Notice::MissingEndpoint));
            } else {
                trace!("background connect skipped, no endpoint configured");
            }
            return;
        }

        self.teardown(fx);
        self.clear_pending(fx);
        if explicit {
            self.auth_failures = 0;
        }
        self.attempt = self.attempt.next();
        self.attempt_explicit = explicit;

        match endpoint.socket_url(&self.config.routes) {
            Ok(url) => {
                self.endpoint = Some(endpoint);
                self.credential = credential;
                info!(attempt = %self.attempt, %url, explicit, "connecting");
                self.set_state(ConnectionState::Connecting, fx);
                self.transport_live = true;
                fx.push(Effect::OpenTransport {
                    attempt: self.attempt,
                    url,
                });
                self.connect_timer_armed = true;
                fx.push(Effect::StartConnectTimer {
                    attempt: self.attempt,
                    after: self.config.connect_timeout,
                });
            }
            Err(e) => {
                warn!(attempt = %self.attempt, error = %e, "cannot derive socket url");
                if explicit {
                    fx.push(notice(Notice::InvalidEndpoint(e.to_string())));
                }
                self.set_state(ConnectionState::Disconnected, fx);
            }
        }
    }

    fn disconnect(&mut self, fx: &mut Vec<Effect>) {
        info!(attempt = %self.attempt, "disconnect requested");
        self.teardown(fx);
        self.stop_supervisor(fx);
        self.attempt = self.attempt.next();
        self.set_state(ConnectionState::Disconnected, fx);
        self.clear_pending(fx);
    }

    fn switch_mode(&mut self, fx: &mut Vec<Effect>) {
        let mode = self.coordinator.advance();
        debug!(%mode, "mode switched");
        fx.push(Effect::Present(PresentCommand::ModeChanged(mode)));
        fx.push(Effect::Persist(self.persisted_state()));
        if self.state == ConnectionState::Ready {
            fx.push(Effect::Send {
                attempt: self.attempt,
                frame: self.coordinator.history_request(&self.config.user_id),
            });
        }
    }

    fn send_chat(&mut self, body: String, media: Vec<String>, fx: &mut Vec<Effect>) {
        let message = body.trim();
        if message.is_empty() && media.is_empty() {
            return;
        }

        let mut shown = message.to_string();
        for (i, reference) in media.iter().enumerate() {
            if !shown.is_empty() {
                shown.push('\n');
            }
            shown.push_str(&format!("![image {}]({reference})", i + 1));
        }

        let id = self.turns.next_id();
        self.last_local_turn = Some(id);
        fx.push(Effect::Present(PresentCommand::AppendTurn {
            turn: ChatTurn {
                id,
                origin: Origin::LocalUser,
                body: shown,
                timestamp: Utc::now(),
            },
            scroll_anchor: Some(id),
        }));

        if !(self.transport_live && self.state.is_open()) {
            fx.push(notice(Notice::NotConnected));
            return;
        }

        fx.push(Effect::Send {
            attempt: self.attempt,
            frame: OutboundFrame::Chat {
                mode: self.coordinator.active(),
                content: message.to_string(),
                timestamp: Utc::now().timestamp_millis(),
                images: media,
                user_id: self.config.user_id.clone(),
            },
        });
        if !self.response_pending {
            self.response_pending = true;
            fx.push(Effect::Present(PresentCommand::Pending(true)));
        }
    }

    fn transport_opened(&mut self, attempt: AttemptId, fx: &mut Vec<Effect>) {
        if attempt != self.attempt || self.state != ConnectionState::Connecting {
            debug!(%attempt, current = %self.attempt, "ignoring stale transport open");
            return;
        }
        debug!(%attempt, "transport open, authenticating");
        self.set_state(ConnectionState::AwaitingAuth, fx);
        fx.push(Effect::Send {
            attempt,
            frame: OutboundFrame::Auth {
                password: self.credential.clone(),
            },
        });
        fx.push(Effect::Send {
            attempt,
            frame: self.coordinator.history_request(&self.config.user_id),
        });
    }

    fn transport_closed(&mut self, attempt: AttemptId, reason: CloseReason, fx: &mut Vec<Effect>) {
        if attempt != self.attempt || !self.transport_live {
            debug!(%attempt, current = %self.attempt, "ignoring stale transport close");
            return;
        }
        match &reason {
            CloseReason::Closed => info!(%attempt, "transport closed"),
            CloseReason::Failed(error) => warn!(%attempt, %error, "transport failed"),
        }
        self.transport_live = false;
        self.cancel_connect_timer(fx);
        self.set_state(ConnectionState::Disconnected, fx);
        self.clear_pending(fx);
        if self.attempt_explicit {
            fx.push(notice(match reason {
                CloseReason::Closed => Notice::ConnectionLost,
                CloseReason::Failed(_) => Notice::ConnectionFailed,
            }));
        }
        self.ensure_supervisor(fx);
    }

    fn connect_timed_out(&mut self, attempt: AttemptId, fx: &mut Vec<Effect>) {
        if attempt != self.attempt
            || !self.connect_timer_armed
            || self.state == ConnectionState::Ready
        {
            debug!(%attempt, current = %self.attempt, "ignoring stale connect timeout");
            return;
        }
        warn!(%attempt, "connect timed out");
        self.connect_timer_armed = false;
        if self.transport_live {
            self.transport_live = false;
            fx.push(Effect::CloseTransport { attempt });
        }
        self.set_state(ConnectionState::Disconnected, fx);
        self.clear_pending(fx);
        if self.attempt_explicit {
            fx.push(notice(Notice::ConnectTimeout));
        }
        self.ensure_supervisor(fx);
    }

    fn reconnect_tick(&mut self, supervisor: SupervisorId, fx: &mut Vec<Effect>) {
        if self.supervisor != Some(supervisor) {
            trace!(%supervisor, "ignoring tick from retired supervisor");
            return;
        }
        if self.state == ConnectionState::Ready {
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        debug!(%supervisor, "reconnecting in background");
        let credential = self.credential.clone();
        self.connect(endpoint, credential, false, fx);
    }

    fn frame_received(&mut self, attempt: AttemptId, text: &str, fx: &mut Vec<Effect>) {
        if attempt != self.attempt || !self.transport_live {
            trace!(%attempt, current = %self.attempt, "dropping frame from stale transport");
            return;
        }
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%attempt, error = %e, "dropping malformed frame");
                return;
            }
        };
        match frame {
            InboundFrame::AuthResult { success: true } => self.auth_accepted(fx),
            InboundFrame::AuthResult { success: false } => self.auth_rejected(fx),
            InboundFrame::Error { content } => {
                self.clear_pending(fx);
                fx.push(notice(Notice::ServerError(content)));
            }
            InboundFrame::History { messages } => {
                self.clear_pending(fx);
                debug!(%attempt, entries = messages.len(), "history snapshot");
                fx.extend(
                    self.coordinator
                        .apply_snapshot(messages, &mut self.turns, &mut self.last_local_turn)
                        .into_iter()
                        .map(Effect::Present),
                );
            }
            InboundFrame::Content { content } => {
                self.clear_pending(fx);
                fx.push(Effect::Present(PresentCommand::AppendTurn {
                    turn: ChatTurn {
                        id: self.turns.next_id(),
                        origin: Origin::RemotePeer,
                        body: content,
                        timestamp: Utc::now(),
                    },
                    scroll_anchor: self.last_local_turn,
                }));
            }
            InboundFrame::Ignored { kind } => {
                trace!(%attempt, kind = kind.as_deref().unwrap_or("-"), "ignoring frame");
            }
        }
    }

    fn auth_accepted(&mut self, fx: &mut Vec<Effect>) {
        if self.state != ConnectionState::AwaitingAuth {
            debug!(attempt = %self.attempt, state = %self.state, "ignoring repeated auth result");
            return;
        }
        info!(attempt = %self.attempt, "authenticated");
        self.set_state(ConnectionState::Ready, fx);
        self.auth_failures = 0;
        self.cancel_connect_timer(fx);
        self.stop_supervisor(fx);
        self.start_supervisor(fx);
        if self.attempt_explicit {
            fx.push(notice(Notice::Connected));
        }
        fx.push(Effect::Persist(self.persisted_state()));
    }

    fn auth_rejected(&mut self, fx: &mut Vec<Effect>) {
        self.auth_failures += 1;
        warn!(attempt = %self.attempt, failures = self.auth_failures, "credential rejected");
        fx.push(notice(Notice::CredentialRejected));
        self.teardown(fx);
        self.set_state(ConnectionState::Disconnected, fx);
        self.clear_pending(fx);

        match self.config.auth_failure_limit {
            Some(limit) if self.auth_failures >= limit => {
                warn!(limit, "giving up on background reconnects");
                self.stop_supervisor(fx);
                fx.push(notice(Notice::RetriesExhausted));
            }
            _ => self.ensure_supervisor(fx),
        }
    }

    fn set_state(&mut self, state: ConnectionState, fx: &mut Vec<Effect>) {
        if self.state != state {
            self.state = state;
            fx.push(Effect::Present(PresentCommand::Status(state)));
        }
    }

    /// Close the live transport and disarm the connect timer, if any.
    fn teardown(&mut self, fx: &mut Vec<Effect>) {
        if self.transport_live {
            self.transport_live = false;
            fx.push(Effect::CloseTransport {
                attempt: self.attempt,
            });
        }
        self.cancel_connect_timer(fx);
    }

    fn cancel_connect_timer(&mut self, fx: &mut Vec<Effect>) {
        if self.connect_timer_armed {
            self.connect_timer_armed = false;
            fx.push(Effect::CancelConnectTimer {
                attempt: self.attempt,
            });
        }
    }

    fn clear_pending(&mut self, fx: &mut Vec<Effect>) {
        if self.response_pending {
            self.response_pending = false;
            fx.push(Effect::Present(PresentCommand::Pending(false)));
        }
    }

    fn ensure_supervisor(&mut self, fx: &mut Vec<Effect>) {
        let configured = self.endpoint.as_ref().is_some_and(Endpoint::is_configured);
        if self.supervisor.is_none() && configured {
            self.start_supervisor(fx);
        }
    }

    fn start_supervisor(&mut self, fx: &mut Vec<Effect>) {
        self.next_supervisor += 1;
        let supervisor = SupervisorId(self.next_supervisor);
        debug!(%supervisor, "starting reconnect supervisor");
        self.supervisor = Some(supervisor);
        fx.push(Effect::StartSupervisor {
            supervisor,
            every: self.config.reconnect_interval,
        });
    }

    fn stop_supervisor(&mut self, fx: &mut Vec<Effect>) {
        if let Some(supervisor) = self.supervisor.take() {
            fx.push(Effect::StopSupervisor { supervisor });
        }
    }
}

fn notice(notice: Notice) -> Effect {
    Effect::Present(PresentCommand::Notice(notice))
}
