//! Business logic services.
//!
//! Services contain the core business logic separated from HTTP handlers:
//! the trip state machine, the wallet ledger, the settlement orchestrator,
//! and the driver matcher, plus the capabilities they depend on (geo
//! index, payment gateway, notification outbox).

pub mod gateway;
pub mod geo_index;
pub mod matching_service;
pub mod outbox_service;
pub mod settlement_service;
pub mod trip_service;
pub mod wallet_service;
