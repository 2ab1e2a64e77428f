//! Duplex transport abstraction under the gateway client.
//!
//! The client only sees [`TransportSession`]: an outbound text-frame sender
//! plus an inbound event receiver. Production uses the WebSocket transport;
//! tests use the in-memory [`pipe`] transport.

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::debug,
};

use crate::error::Error;

/// Inbound side of a transport session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    Message(String),
    /// The connection closed; no further events follow.
    Closed,
}

/// One live duplex connection. Dropping `outbound` closes the session.
pub struct TransportSession {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for duplex sessions to one gateway endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportSession, Error>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<TransportSession, Error> {
        let (ws_stream, _response) = connect_async(url).await?;
        let (mut ws_sink, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // One task owns both halves so pings can be answered in place.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = ws_reader.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(TransportEvent::Message(text.to_string())).is_err() {
                                    break;
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                if ws_sink.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("ws: closed by server");
                                break;
                            },
                            Some(Ok(_)) => {}, // binary, pong — ignore
                            Some(Err(e)) => {
                                debug!(error = %e, "ws: read error");
                                break;
                            },
                        }
                    },
                    out = out_rx.recv() => {
                        match out {
                            Some(text) => {
                                if ws_sink.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            },
                            None => {
                                // Session dropped by the client.
                                let _ = ws_sink.send(Message::Close(None)).await;
                                break;
                            },
                        }
                    },
                }
            }
            let _ = in_tx.send(TransportEvent::Closed);
        });

        Ok(TransportSession {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// In-memory transport for tests and local tooling.
pub mod pipe {
    use {
        async_trait::async_trait,
        std::sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        tokio::sync::mpsc,
    };

    use super::{Transport, TransportEvent, TransportSession};
    use crate::error::Error;

    /// The server half of one pipe session.
    pub struct ServerEnd {
        /// Frames the client sent.
        pub incoming: mpsc::UnboundedReceiver<String>,
        /// Inject frames or a close into the client.
        pub events: mpsc::UnboundedSender<TransportEvent>,
    }

    /// Channel-backed transport. Each `connect` hands a [`ServerEnd`] to the
    /// accept queue returned by [`PipeTransport::new`].
    pub struct PipeTransport {
        accept_tx: mpsc::UnboundedSender<ServerEnd>,
        refuse: AtomicBool,
        connect_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl PipeTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            (
                Self {
                    accept_tx,
                    refuse: AtomicBool::new(false),
                    connect_times: Mutex::new(Vec::new()),
                },
                accept_rx,
            )
        }

        /// Make subsequent connect attempts fail, as a downed gateway would.
        pub fn set_refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Instants at which connect attempts were made (tokio clock).
        pub fn connect_times(&self) -> Vec<tokio::time::Instant> {
            self.connect_times
                .lock()
                .map(|t| t.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for PipeTransport {
        async fn connect(&self, _url: &str) -> Result<TransportSession, Error> {
            if let Ok(mut times) = self.connect_times.lock() {
                times.push(tokio::time::Instant::now());
            }
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::Connection("connection refused".into()));
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.accept_tx
                .send(ServerEnd {
                    incoming: out_rx,
                    events: in_tx,
                })
                .map_err(|_| Error::Connection("pipe listener dropped".into()))?;
            Ok(TransportSession {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}
