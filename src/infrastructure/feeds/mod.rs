//! Upstream feed adapters.
//!
//! A [`protocol::FeedProtocol`] implementation per upstream plus the
//! shared [`connection::UpstreamConnection`] loop that drives it.

pub mod connection;
pub mod crypto;
pub mod forex;
pub mod heartbeat;
pub mod messages;
pub mod protocol;
pub mod reconnect;
