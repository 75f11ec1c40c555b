//! Application layer: orchestration between downstream clients and
//! upstream feeds, independent of any concrete transport or wire format.

pub mod dispatcher;
pub mod ports;
pub mod router;
pub mod session;
