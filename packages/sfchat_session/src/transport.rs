//! Transport seam.
//!
//! The runtime only ever sees a [`Link`]: a sink of outgoing frame text and a
//! stream of incoming frame text. [`WsConnector`] provides one over a real
//! websocket; tests plug in an in-memory connector instead.

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, Sink, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An open, bidirectional frame channel.
///
/// The stream ends on an orderly close and yields `Err` on socket errors.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: String) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// Websocket transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: String) -> BoxFuture<'static, Result<Link, TransportError>> {
        async move {
            let (ws, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            debug!(%url, status = %response.status(), "websocket handshake complete");
            let (write, read) = ws.split();

            let sink = write.with(|text: String| {
                future::ready(Ok::<_, TransportError>(Message::Text(text.into())))
            });

            let stream = read
                .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
                .filter_map(|msg| {
                    future::ready(match msg {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                        Ok(Message::Binary(bytes)) => {
                            Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                        }
                        Ok(_) => None,
                        Err(e) => Some(Err(TransportError::from(e))),
                    })
                });

            Ok(Link {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        }
        .boxed()
    }
}
