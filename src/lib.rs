//! Trip lifecycle and payment settlement core of a ride-hailing platform.
//!
//! The four components and their wiring:
//!
//! - **Trip State Machine** ([`services::trip_service`]): validates and
//!   applies lifecycle transitions under concurrent updates from
//!   passenger, driver, and system actors.
//! - **Wallet Ledger** ([`services::wallet_service`]): the only mutator of
//!   wallet balances; every movement is an atomic {balance update,
//!   ledger insert} pair.
//! - **Settlement Orchestrator** ([`services::settlement_service`]): moves
//!   money exactly once per completed trip, splitting the platform
//!   commission.
//! - **Driver Matcher** ([`services::matching_service`] over
//!   [`services::geo_index`]): answers "who is near this point right now"
//!   from a TTL cache with a durable-store fallback.
//!
//! External collaborators (notification delivery, payment gateways) sit
//! behind the outbox and the [`services::gateway::PaymentGateway`]
//! capability.

pub mod config;
pub mod db;
pub mod error;
pub mod fare;
pub mod geo;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod money;
pub mod services;
pub mod state;
