//! Background tasks spawned by the session actor.
//!
//! Each task reports back through the actor's event channel and stops when
//! its token is cancelled. Every event carries the generation it was spawned
//! for, so a task that loses the race with cancellation can't affect a newer
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::session::{AttemptId, CloseReason, Event, SupervisorId};
use crate::transport::{Connector, Link};

/// Own one transport attempt: open it, pump frames both ways, report the close.
pub(super) async fn run_link<C: Connector>(
    connector: Arc<C>,
    url: String,
    attempt: AttemptId,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            trace!(%attempt, "link cancelled before open");
            return;
        }
        result = connector.open(url) => result,
    };

    let Link {
        mut sink,
        mut stream,
    } = match opened {
        Ok(link) => link,
        Err(e) => {
            let _ = events.send(Event::TransportClosed {
                attempt,
                reason: CloseReason::Failed(e.to_string()),
            });
            return;
        }
    };
    if events.send(Event::TransportOpened { attempt }).is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%attempt, "closing link");
                if let Err(e) = sink.close().await {
                    trace!(%attempt, error = %e, "close failed");
                }
                return;
            }
            Some(text) = outgoing.recv() => {
                if let Err(e) = sink.send(text).await {
                    warn!(%attempt, error = %e, "send failed");
                    break CloseReason::Failed(e.to_string());
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => {
                    if events.send(Event::FrameReceived { attempt, text }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break CloseReason::Failed(e.to_string()),
                None => break CloseReason::Closed,
            },
        }
    };
    let _ = events.send(Event::TransportClosed { attempt, reason });
}

pub(super) fn spawn_connect_timer(
    attempt: AttemptId,
    after: Duration,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                let _ = events.send(Event::ConnectTimedOut { attempt });
            }
        }
    });
}

/// Tick every `every`, first tick one full interval after start.
pub(super) fn spawn_supervisor(
    supervisor: SupervisorId,
    every: Duration,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    if events.send(Event::ReconnectTick { supervisor }).is_err() {
                        break;
                    }
                }
            }
        }
        trace!(%supervisor, "supervisor stopped");
    });
}
