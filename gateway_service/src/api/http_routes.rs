use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::middleware::{ip_rate_limit, merchant_auth};
use crate::api::response::ApiResponse;
use crate::api::ws::payment_status_ws;
use crate::domain::entities::{Merchant, Payment, PaymentStatus};
use crate::domain::gateways::StatusFanout;
use crate::domain::repository::{AuditLogRepository, Ledger, MerchantRepository};
use crate::domain::types::PaymentId;
use crate::infrastructure::cache::rate_limiter::SlidingWindowLimiter;
use crate::use_cases::create_payment::CreatePaymentUseCase;
use crate::use_cases::get_payment::GetPaymentUseCase;
use crate::use_cases::payment_engine::PaymentEngine;

// Estado compartido de la aplicación
pub struct AppState {
    pub create_payment_use_case: CreatePaymentUseCase,
    pub get_payment_use_case: GetPaymentUseCase,
    pub engine: Arc<PaymentEngine>,
    pub merchant_repo: Arc<dyn MerchantRepository>,
    pub ledger: Arc<dyn Ledger>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub fanout: Arc<dyn StatusFanout>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub ip_rate_limit_per_minute: u32,
    pub key_rate_limit_per_minute: u32,
    pub db_pool: PgPool,
}

pub fn routes(state: Arc<AppState>) -> Router {
    let merchant_api = Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/{id}/events", get(get_payment_events))
        .route("/payments/{id}/ledger", get(get_payment_ledger))
        .route("/payments/{id}/cancel", post(cancel_payment))
        .route("/merchant/balance", get(get_merchant_balance))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            merchant_auth,
        ));

    Router::new()
        .merge(merchant_api)
        .route("/public/payments/{id}/status", get(get_public_status))
        .route("/ws/payments/{id}", get(payment_status_ws))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            ip_rate_limit,
        ))
        // X-Request-ID: generado si falta, propagado a la respuesta
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

// DTO de entrada para crear factura
#[derive(Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub amount_vnd: i64,
    pub order_id: Option<String>,
    #[allow(dead_code)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
pub struct CreatePaymentResponse {
    #[schema(value_type = String)]
    pub payment_id: PaymentId,
    pub reference: String,
    pub wallet_address: String,
    pub crypto_amount: String,
    pub token: String,
    pub chain: String,
    #[schema(value_type = String)]
    pub expires_at: DateTime<Utc>,
    pub qr_payload: String,
}

impl From<&Payment> for CreatePaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            reference: payment.reference.as_str().to_string(),
            wallet_address: payment.wallet_address.as_str().to_string(),
            crypto_amount: payment.crypto_amount.to_decimal().to_string(),
            token: payment.token.as_str().to_string(),
            chain: payment.chain.as_str().to_string(),
            expires_at: payment.expires_at,
            qr_payload: payment.qr_payload(),
        }
    }
}

// Handler: Crear factura
// POST /payments
#[utoipa::path(
    post,
    path = "/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Invoice created", body = ApiResponse<CreatePaymentResponse>),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unknown API key")
    ),
    security(("api_key" = []))
)]
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<ApiResponse<CreatePaymentResponse>>, ApiError> {
    let payment = state
        .create_payment_use_case
        .execute(&merchant, payload.amount_vnd, payload.order_id)
        .await?;

    if let Err(e) = state
        .audit
        .record(
            Some(merchant.id),
            "payment.create",
            serde_json::json!({ "payment_id": payment.id, "amount_vnd": payload.amount_vnd }),
        )
        .await
    {
        tracing::warn!("Audit write failed: {}", e);
    }

    Ok(Json(ApiResponse::success(CreatePaymentResponse::from(
        &payment,
    ))))
}

// Handler: Estado completo de un pago del comercio
// GET /payments/{id}
#[utoipa::path(
    get,
    path = "/payments/{id}",
    responses(
        (status = 200, description = "Payment detail"),
        (status = 404, description = "Not found")
    ),
    security(("api_key" = []))
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Payment>>, ApiError> {
    let payment = state
        .get_payment_use_case
        .execute(merchant.id, PaymentId(id))
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

// Handler: Stream de transiciones del pago (auditoría del comercio)
// GET /payments/{id}/events
pub async fn get_payment_events(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<crate::domain::entities::PaymentEvent>>>, ApiError> {
    let events = state
        .get_payment_use_case
        .events(merchant.id, PaymentId(id))
        .await?;
    Ok(Json(ApiResponse::success(events)))
}

// Handler: Asientos contables del pago completado
// GET /payments/{id}/ledger
pub async fn get_payment_ledger(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<crate::domain::ledger::LedgerEntry>>>, ApiError> {
    let payment = state
        .get_payment_use_case
        .execute(merchant.id, PaymentId(id))
        .await?;

    let Some(group_id) = payment.ledger_group_id else {
        return Ok(Json(ApiResponse::success(Vec::new())));
    };

    let entries = state.ledger.entries_for_group(group_id).await.map_err(|e| {
        tracing::error!("Ledger entries read failed for {}: {}", id, e);
        ApiError::internal()
    })?;
    Ok(Json(ApiResponse::success(entries)))
}

// Handler: Cancelación explícita pre-transacción
// POST /payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Payment>>, ApiError> {
    // La verificación de propiedad reutiliza el caso de uso de lectura
    state
        .get_payment_use_case
        .execute(merchant.id, PaymentId(id))
        .await?;

    let payment = state
        .engine
        .cancel(PaymentId(id), "cancelled by merchant".to_string())
        .await?;

    if let Err(e) = state
        .audit
        .record(
            Some(merchant.id),
            "payment.cancel",
            serde_json::json!({ "payment_id": payment.id }),
        )
        .await
    {
        tracing::warn!("Audit write failed: {}", e);
    }

    Ok(Json(ApiResponse::success(payment)))
}

#[derive(Serialize, ToSchema)]
pub struct MerchantBalanceResponse {
    pub available_vnd: i64,
    pub pending_vnd: i64,
}

// Handler: Saldo contable del comercio
// GET /merchant/balance
pub async fn get_merchant_balance(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
) -> Result<Json<ApiResponse<MerchantBalanceResponse>>, ApiError> {
    let balance = state
        .ledger
        .merchant_balance(merchant.id)
        .await
        .map_err(|e| {
            tracing::error!("Balance read failed for {}: {}", merchant.id, e);
            ApiError::internal()
        })?;

    Ok(Json(ApiResponse::success(MerchantBalanceResponse {
        available_vnd: balance.available.minor_units(),
        pending_vnd: balance.pending.minor_units(),
    })))
}

#[derive(Serialize, ToSchema)]
pub struct PublicStatusResponse {
    #[schema(value_type = String)]
    pub payment_id: PaymentId,
    #[schema(value_type = String)]
    pub status: PaymentStatus,
    pub tx_hash: Option<String>,
    #[schema(value_type = String)]
    pub expires_at: DateTime<Utc>,
}

// Handler: Estado mínimo sin autenticación (página del pagador)
// GET /public/payments/{id}/status
pub async fn get_public_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicStatusResponse>, ApiError> {
    let payment = state
        .get_payment_use_case
        .execute_public(PaymentId(id))
        .await?;

    Ok(Json(PublicStatusResponse {
        payment_id: payment.id,
        status: payment.status,
        tx_hash: payment.tx_hash.map(|h| h.as_str().to_string()),
        expires_at: payment.expires_at,
    }))
}

// Handler: Salud del proceso (DB alcanzable)
// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl axum::response::IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded" })),
            )
        }
    }
}
