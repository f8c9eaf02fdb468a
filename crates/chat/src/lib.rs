//! Chat backend integration: REST client, user token minting, and the
//! realtime websocket listener.
//!
//! The REST side implements [`chatrelay_core::ChatApi`] for one channel;
//! the realtime side implements [`chatrelay_core::EventListener`] and feeds
//! decoded events to the owning agent over a bounded channel.

pub mod client;
pub mod listener;
pub mod token;

pub use client::{StreamChannel, StreamChatClient};
pub use listener::{Backoff, ListenerConfig, RealtimeListener};
pub use token::{create_server_token, create_user_token};
