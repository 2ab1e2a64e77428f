//! The gateway client: one logical connection, correlated RPC, typed event
//! fan-out, and backoff-driven reconnection.

use {
    futures::future::BoxFuture,
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::sync::{Mutex, mpsc, oneshot},
    tracing::{debug, info, warn},
};

use botdesk_protocol::{
    ClientInfo, ConnectAuth, ConnectParams, DEFAULT_REQUEST_TIMEOUT_MS, GatewayFrame,
    HANDSHAKE_TIMEOUT_MS, HelloOk, MAX_RECONNECT_ATTEMPTS, PROTOCOL_VERSION, Policy,
    RECONNECT_BASE_DELAY_MS, RequestFrame, ResponseFrameInner, roles, scopes,
};

use crate::{
    error::Error,
    events::{EventHandler, EventHub, EventKind, GatewayEvent},
    transport::{Transport, TransportEvent, TransportSession},
};

/// Connection lifecycle, visible to callers for status pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

/// What the handshake negotiated.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub protocol: u32,
    pub policy: Policy,
    pub conn_id: String,
    pub server_version: String,
}

/// Client configuration. Timeouts default to the protocol constants.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub client_id: String,
    pub display_name: Option<String>,
    pub token: Option<String>,
    pub role: String,
    pub scopes: Vec<String>,
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            display_name: None,
            token: None,
            role: roles::OPERATOR.into(),
            scopes: vec![scopes::READ.into(), scopes::WRITE.into(), scopes::AGENT.into()],
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reconnect_base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

struct ConnState {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<tokio::task::JoinHandle<()>>,
    negotiated: Option<Negotiated>,
    auto_reconnect: bool,
    reconnect_attempts: u32,
    reconnect_timer: Option<tokio::task::JoinHandle<()>>,
    last_error: Option<String>,
    /// Bumped on every (re)connect and on manual disconnect so a stale read
    /// task's close handler cannot clobber the state of a newer session.
    epoch: u64,
}

pub(crate) struct ClientInner {
    transport: Arc<dyn Transport>,
    opts: ClientOptions,
    conn: Mutex<ConnState>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<ResponseFrameInner, Error>>>>,
    next_id: AtomicU64,
    events: EventHub,
}

/// Handle to one logical gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    pub fn new(transport: Arc<dyn Transport>, opts: ClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                opts,
                conn: Mutex::new(ConnState {
                    state: ConnectionState::Disconnected,
                    outbound: None,
                    reader: None,
                    negotiated: None,
                    auto_reconnect: false,
                    reconnect_attempts: 0,
                    reconnect_timer: None,
                    last_error: None,
                    epoch: 0,
                }),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                events: EventHub::default(),
            }),
        }
    }

    /// Open the transport and complete the authenticated handshake.
    /// Enables auto-reconnect for subsequent unexpected closes.
    pub async fn connect(&self) -> Result<Negotiated, Error> {
        {
            let mut conn = self.inner.conn.lock().await;
            conn.auto_reconnect = true;
            conn.reconnect_attempts = 0;
        }
        self.inner.establish().await
    }

    /// Tear the connection down: auto-reconnect off, pending requests failed
    /// with [`Error::ClientDisconnected`], pending table cleared.
    pub async fn disconnect(&self) {
        {
            let mut conn = self.inner.conn.lock().await;
            conn.auto_reconnect = false;
            conn.epoch += 1; // orphan the live read task
            if let Some(timer) = conn.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(reader) = conn.reader.take() {
                reader.abort();
            }
            conn.outbound = None; // dropping the sender closes the transport
            conn.negotiated = None;
            conn.state = ConnectionState::Disconnected;
        }
        self.inner.fail_all_pending().await;
        info!("gateway client disconnected");
    }

    /// Issue a correlated RPC and await its response or deadline.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        self.inner
            .request_inner(method, params, self.inner.opts.request_timeout, true)
            .await
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.conn.lock().await.state
    }

    pub async fn negotiated(&self) -> Option<Negotiated> {
        self.inner.conn.lock().await.negotiated.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.conn.lock().await.last_error.clone()
    }

    /// Subscribe to every event.
    pub fn on_any(&self, handler: EventHandler) {
        self.inner.events.on_any(handler);
    }

    /// Subscribe to one event kind.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.inner.events.on(kind, handler);
    }
}

impl ClientInner {
    fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            min_protocol: self.opts.min_protocol,
            max_protocol: self.opts.max_protocol,
            client: ClientInfo {
                id: self.opts.client_id.clone(),
                display_name: self.opts.display_name.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
                platform: std::env::consts::OS.into(),
                instance_id: Some(uuid::Uuid::new_v4().to_string()),
            },
            role: Some(self.opts.role.clone()),
            scopes: Some(self.opts.scopes.clone()),
            auth: self
                .opts
                .token
                .clone()
                .map(|token| ConnectAuth { token: Some(token) }),
        }
    }

    /// One full connect attempt: transport, read task, handshake.
    pub(crate) async fn establish(self: &Arc<Self>) -> Result<Negotiated, Error> {
        let epoch = {
            let mut conn = self.conn.lock().await;
            conn.epoch += 1;
            conn.state = ConnectionState::Connecting;
            if let Some(reader) = conn.reader.take() {
                reader.abort();
            }
            conn.outbound = None;
            conn.epoch
        };

        info!(url = %self.opts.url, "connecting to gateway");
        let session = match self.transport.connect(&self.opts.url).await {
            Ok(session) => session,
            Err(e) => {
                let mut conn = self.conn.lock().await;
                if conn.epoch == epoch {
                    conn.state = ConnectionState::Disconnected;
                    conn.last_error = Some(e.to_string());
                }
                return Err(e);
            },
        };

        let TransportSession {
            outbound,
            mut inbound,
        } = session;

        {
            let mut conn = self.conn.lock().await;
            if conn.epoch != epoch {
                // disconnect() raced us while the transport was opening
                return Err(Error::ClientDisconnected);
            }
            conn.outbound = Some(outbound);
            conn.state = ConnectionState::Connected;
            let reader_inner = Arc::clone(self);
            conn.reader = Some(tokio::spawn(async move {
                while let Some(event) = inbound.recv().await {
                    match event {
                        TransportEvent::Message(text) => reader_inner.handle_frame(&text).await,
                        TransportEvent::Closed => break,
                    }
                }
                reader_inner.handle_close(epoch).await;
            }));
        }

        let params = serde_json::to_value(self.connect_params())?;
        let handshake = self
            .request_inner("connect", params, self.opts.handshake_timeout, false)
            .await;

        match handshake {
            Ok(payload) => {
                let hello: HelloOk = serde_json::from_value(payload)
                    .map_err(|e| Error::Protocol(format!("bad hello-ok payload: {e}")))?;
                if hello.protocol < self.opts.min_protocol
                    || hello.protocol > self.opts.max_protocol
                {
                    let err = Error::ProtocolMismatch(format!(
                        "server negotiated {}, client offered {}-{}",
                        hello.protocol, self.opts.min_protocol, self.opts.max_protocol
                    ));
                    self.teardown_session(epoch, &err).await;
                    return Err(err);
                }
                let negotiated = Negotiated {
                    protocol: hello.protocol,
                    policy: hello.policy,
                    conn_id: hello.server.conn_id.clone(),
                    server_version: hello.server.version.clone(),
                };
                let mut conn = self.conn.lock().await;
                if conn.epoch != epoch {
                    return Err(Error::ClientDisconnected);
                }
                conn.state = ConnectionState::Authenticated;
                conn.negotiated = Some(negotiated.clone());
                conn.reconnect_attempts = 0;
                conn.last_error = None;
                info!(
                    protocol = negotiated.protocol,
                    conn_id = %negotiated.conn_id,
                    server_version = %negotiated.server_version,
                    "gateway handshake complete"
                );
                Ok(negotiated)
            },
            Err(e) => {
                let e = match e {
                    // The handshake deadline is the connection timeout.
                    Error::RequestTimeout { .. } => Error::ConnectionTimeout,
                    other => other,
                };
                self.teardown_session(epoch, &e).await;
                Err(e)
            },
        }
    }

    async fn teardown_session(&self, epoch: u64, error: &Error) {
        let mut conn = self.conn.lock().await;
        if conn.epoch != epoch {
            return;
        }
        conn.epoch += 1; // orphan the read task
        if let Some(reader) = conn.reader.take() {
            reader.abort();
        }
        conn.outbound = None;
        conn.state = ConnectionState::Disconnected;
        conn.last_error = Some(error.to_string());
    }

    async fn request_inner(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
        require_auth: bool,
    ) -> Result<serde_json::Value, Error> {
        let outbound = {
            let conn = self.conn.lock().await;
            if require_auth && conn.state != ConnectionState::Authenticated {
                return Err(Error::ClientDisconnected);
            }
            conn.outbound.clone().ok_or(Error::ClientDisconnected)?
        };

        // Live correlation ids are never reused: the counter only grows.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = RequestFrame::new(id.to_string(), method, params);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let json = serde_json::to_string(&frame)?;
        if outbound.send(json).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ClientDisconnected);
        }
        debug!(request_id = id, method, "sent request frame");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => {
                if response.ok {
                    Ok(response.payload.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(Error::from_remote(response.error))
                }
            },
            // fail_all_pending delivered a terminal error
            Ok(Ok(Err(e))) => Err(e),
            // Sender dropped without a value — session died mid-flight.
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(Error::ClientDisconnected)
            },
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::RequestTimeout {
                    method: method.to_string(),
                })
            },
        }
    }

    async fn handle_frame(self: &Arc<Self>, text: &str) {
        let frame: GatewayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "invalid inbound frame");
                return;
            },
        };
        match frame {
            GatewayFrame::Response(response) => {
                let Ok(id) = response.id.parse::<u64>() else {
                    warn!(id = %response.id, "response with non-numeric id");
                    return;
                };
                let sender = self.pending.lock().await.remove(&id);
                if let Some(sender) = sender {
                    // The caller may have timed out and dropped the receiver.
                    let _ = sender.send(Ok(response));
                } else {
                    debug!(request_id = id, "response for unknown or expired request");
                }
            },
            GatewayFrame::Event(event) => {
                self.events.dispatch(&GatewayEvent::from_frame(event));
            },
            GatewayFrame::Request(request) => {
                debug!(method = %request.method, "ignoring inbound request frame");
            },
        }
    }

    /// Unexpected close of the session identified by `epoch`.
    async fn handle_close(self: &Arc<Self>, epoch: u64) {
        {
            let mut conn = self.conn.lock().await;
            if conn.epoch != epoch {
                return; // a newer session owns the state
            }
            conn.outbound = None;
            conn.reader = None;
            conn.negotiated = None;
            conn.state = ConnectionState::Disconnected;
        }
        debug!("gateway connection closed");
        self.fail_all_pending().await;
        self.maybe_schedule_reconnect().await;
    }

    /// Every pending request gets exactly one terminal outcome.
    async fn fail_all_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            pending.drain().collect()
        };
        for (id, sender) in drained {
            debug!(request_id = id, "failing pending request: disconnected");
            let _ = sender.send(Err(Error::ClientDisconnected));
        }
    }

    async fn maybe_schedule_reconnect(self: &Arc<Self>) {
        let mut conn = self.conn.lock().await;
        if !conn.auto_reconnect {
            return;
        }
        // Only one reconnect timer may be outstanding.
        if conn
            .reconnect_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
        {
            return;
        }
        if conn.reconnect_attempts >= self.opts.max_reconnect_attempts {
            conn.auto_reconnect = false;
            conn.last_error = Some(Error::ReconnectExhausted.to_string());
            drop(conn);
            warn!("reconnect attempts exhausted, giving up");
            self.events.dispatch(&GatewayEvent::ReconnectExhausted);
            return;
        }
        conn.reconnect_attempts += 1;
        let attempt = conn.reconnect_attempts;
        let delay = self.opts.reconnect_base_delay * 2u32.pow(attempt - 1);
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let inner = Arc::clone(self);
        conn.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match inner.establish_boxed().await {
                Ok(negotiated) => {
                    info!(conn_id = %negotiated.conn_id, "reconnected to gateway");
                },
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    // This task is the outstanding timer; release the slot
                    // before scheduling the next attempt.
                    inner.conn.lock().await.reconnect_timer = None;
                    inner.schedule_reconnect_boxed().await;
                },
            }
        }));
    }

    // The reconnect path is recursive through spawned tasks (establish →
    // reader → close handler → reconnect timer → establish). The timer task
    // awaits these boxed edges so the future types stay finite.
    fn establish_boxed(self: &Arc<Self>) -> BoxFuture<'static, Result<Negotiated, Error>> {
        let inner = Arc::clone(self);
        Box::pin(async move { inner.establish().await })
    }

    fn schedule_reconnect_boxed(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(self);
        Box::pin(async move { inner.maybe_schedule_reconnect().await })
    }
}
