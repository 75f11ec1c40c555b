//! Domain Layer - Core relay types and routing state.
//!
//! Pure types with no I/O: symbol classification, candle intervals, the
//! refcounted subscription table, and the normalized tick record.

/// Symbol classification and canonicalization.
pub mod symbol;

/// Accepted candle intervals.
pub mod interval;

/// Refcounted symbol -> watcher table.
pub mod subscription;

/// Normalized inbound update records.
pub mod tick;
