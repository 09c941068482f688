//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to the owning service
//! 3. Returns HTTP response (JSON, status code)

/// Liveness/readiness probe
pub mod health;
/// Location ingestion, nearby drivers, driver availability
pub mod locations;
/// Refunds
pub mod payments;
/// Trip lifecycle endpoints
pub mod trips;
/// Wallet and ledger endpoints
pub mod wallets;
