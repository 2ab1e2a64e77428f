//! Inbound message routing.
//!
//! [`MessageRouter`] gates each message (self-authored, unknown channel,
//! disabled, mention required) before asking the gateway's agent for a
//! reply, falling back to a canned greeting when generation fails.

pub mod fallback;
pub mod router;

pub use {
    fallback::fallback_reply,
    router::{BotIdentity, ChannelContext, MessageRouter, RouteError, RouteOutcome, build_system_prompt},
};
