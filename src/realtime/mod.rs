//! Realtime client for Supabase: row change notifications over a Phoenix websocket

mod channel;
mod client;
mod message;

pub use channel::{ChannelBuilder, DatabaseChanges, Subscription};
pub use client::{ConnectionState, RealtimeClient};
pub use message::{events, ChangeType, PostgresChange, RealtimeMessage};
