//! Session core for the sfchat client.
//!
//! [`session::Session`] is the connection state machine, written as a pure
//! event-to-effects function. [`runtime`] drives it over a real transport
//! with tokio; [`protocol`] owns the wire format.

pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod mode;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod transcript;
pub mod transport;

pub use endpoint::{Endpoint, RelayRoutes};
pub use error::{ConfigError, ProtocolError, SessionError, TransportError};
pub use mode::Mode;
pub use runtime::{SessionHandle, SessionStatus, spawn_session};
pub use session::{ConnectionState, Session, SessionConfig};
pub use transcript::{
    ChatTurn, Notice, Origin, PersistedState, PresentCommand, Presenter, SettingsSink, Transcript,
    TurnId,
};
pub use transport::{Connector, Link, WsConnector};
