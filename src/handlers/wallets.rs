//! Wallet HTTP handlers.
//!
//! - GET  /api/v1/wallet - the authenticated user's wallet
//! - GET  /api/v1/wallet/transactions - their ledger, newest first
//! - POST /api/v1/wallet/topup - credit from an external payment

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::transaction::TransactionResponse,
    models::wallet::WalletResponse,
    services::wallet_service,
    state::AppState,
};

/// The authenticated user's wallet.
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = wallet_service::get_wallet(&state.pool, auth.user_id).await?;
    Ok(Json(wallet.into()))
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

/// The authenticated user's ledger, paginated.
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let rows =
        wallet_service::list_transactions(&state.pool, auth.user_id, query.page, query.per_page)
            .await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Request body for a wallet top-up.
///
/// `external_ref` is the payment gateway's reference for the charge that
/// funds this credit; repeating it never credits twice.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount_cents: i64,
    pub external_ref: String,
}

/// Top up the authenticated user's wallet.
pub async fn top_up(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TopUpRequest>,
) -> Result<Json<TransactionResponse>, AppError> {
    let row = wallet_service::top_up(
        &state.pool,
        auth.user_id,
        request.amount_cents,
        &request.external_ref,
    )
    .await?;
    Ok(Json(row.into()))
}
