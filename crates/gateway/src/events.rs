//! Typed server-push events and their fan-out.
//!
//! Inbound `event` frames map into a closed [`GatewayEvent`] enum so
//! consumers match exhaustively instead of comparing event-name strings.
//! Unrecognized names land in `Unknown` rather than being dropped.

use {
    serde_json::Value,
    std::{collections::HashMap, sync::Mutex},
    tracing::warn,
};

use botdesk_protocol::{EventFrameInner, GatewayMessage, RemoteGroup};

/// Everything the gateway can push at us, plus the client's own terminal
/// reconnect notification.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    GroupJoined {
        group: RemoteGroup,
    },
    GroupLeft {
        group_id: String,
        reason: Option<String>,
    },
    MessageReceived {
        message: GatewayMessage,
    },
    StatusChange {
        status: Value,
    },
    Tick,
    Health {
        payload: Value,
    },
    Presence {
        payload: Value,
    },
    Shutdown,
    /// Emitted once when the reconnect attempt cap is exhausted.
    ReconnectExhausted,
    Unknown {
        event: String,
        payload: Value,
    },
}

/// Discriminant used for per-kind subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GroupJoined,
    GroupLeft,
    MessageReceived,
    StatusChange,
    Tick,
    Health,
    Presence,
    Shutdown,
    ReconnectExhausted,
    Unknown,
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GroupJoined { .. } => EventKind::GroupJoined,
            Self::GroupLeft { .. } => EventKind::GroupLeft,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::StatusChange { .. } => EventKind::StatusChange,
            Self::Tick => EventKind::Tick,
            Self::Health { .. } => EventKind::Health,
            Self::Presence { .. } => EventKind::Presence,
            Self::Shutdown => EventKind::Shutdown,
            Self::ReconnectExhausted => EventKind::ReconnectExhausted,
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Decode an inbound event frame. Malformed payloads for known event
    /// names fall back to `Unknown` so the dispatch loop never fails.
    pub fn from_frame(frame: EventFrameInner) -> Self {
        let payload = frame.payload.unwrap_or(Value::Null);
        match frame.event.as_str() {
            "group.joined" => {
                match serde_json::from_value::<RemoteGroup>(payload["group"].clone()) {
                    Ok(group) => Self::GroupJoined { group },
                    Err(_) => Self::Unknown {
                        event: frame.event,
                        payload,
                    },
                }
            },
            "group.left" => match payload["groupId"].as_str() {
                Some(group_id) => Self::GroupLeft {
                    group_id: group_id.to_string(),
                    reason: payload["reason"].as_str().map(ToString::to_string),
                },
                None => Self::Unknown {
                    event: frame.event,
                    payload,
                },
            },
            "message.received" => {
                match serde_json::from_value::<GatewayMessage>(payload["message"].clone()) {
                    Ok(message) => Self::MessageReceived { message },
                    Err(_) => Self::Unknown {
                        event: frame.event,
                        payload,
                    },
                }
            },
            "status.change" => Self::StatusChange {
                status: payload["status"].clone(),
            },
            "tick" => Self::Tick,
            "health" => Self::Health { payload },
            "presence" => Self::Presence { payload },
            "shutdown" => Self::Shutdown,
            _ => Self::Unknown {
                event: frame.event,
                payload,
            },
        }
    }
}

/// A registered event callback. Fan-out is synchronous and never suspends.
pub type EventHandler = Box<dyn Fn(&GatewayEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    global: Vec<EventHandler>,
    by_kind: HashMap<EventKind, Vec<EventHandler>>,
}

/// Subscriber registry. A handler error is logged and never prevents the
/// remaining handlers from running.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Subscribers>,
}

impl EventHub {
    // A handler that panics mid-dispatch poisons the mutex; the registry
    // itself is still consistent, so recover rather than losing handlers.
    fn subscribers(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a handler for every event.
    pub fn on_any(&self, handler: EventHandler) {
        self.subscribers().global.push(handler);
    }

    /// Register a handler for one event kind.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.subscribers()
            .by_kind
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub fn dispatch(&self, event: &GatewayEvent) {
        let subs = self.subscribers();
        for handler in &subs.global {
            if let Err(e) = handler(event) {
                warn!(kind = ?event.kind(), error = %e, "event listener failed");
            }
        }
        if let Some(handlers) = subs.by_kind.get(&event.kind()) {
            for handler in handlers {
                if let Err(e) = handler(event) {
                    warn!(kind = ?event.kind(), error = %e, "event listener failed");
                }
            }
        }
    }
}
