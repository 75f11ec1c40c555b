//! Downstream client transports.

pub mod ws;
