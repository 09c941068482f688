//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types of the HTTP surface. Rows are plain
//! value types; every read declares exactly which related data it needs.

/// Driver position samples and nearby-driver queries
pub mod location;
/// Notification outbox rows
pub mod outbox;
/// Trip settlements
pub mod payment;
/// Wallet ledger rows
pub mod transaction;
/// Trip lifecycle entity
pub mod trip;
/// Passengers and drivers
pub mod user;
/// Per-user wallets
pub mod wallet;
