//! Payment HTTP handlers.
//!
//! - POST /api/v1/payments/{id}/refund - refund a settled payment

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::payment::{PaymentResponse, RefundRequest},
    services::settlement_service,
    state::AppState,
};

/// Refund a completed payment, fully or partially.
///
/// Only the paying passenger (or an admin) may ask. The passenger side is
/// reversed through the ledger or the gateway; the driver is debited
/// their proportional share of the refunded amount.
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = settlement_service::refund_payment(
        &state,
        payment_id,
        auth.user_id,
        &auth.role,
        request,
    )
    .await?;
    Ok(Json(payment.into()))
}
