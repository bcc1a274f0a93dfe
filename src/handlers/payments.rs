use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::payment::{PaymentPhase, PaymentView};
use crate::domain::ports::ReconciliationApplied;
use crate::domain::timeline::{Actor, TriggerSource};
use crate::errors::AppError;
use crate::AppState;

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub phase: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub created_at: String,
}

impl PaymentResponse {
    pub fn from_view(payment: &PaymentView) -> Self {
        PaymentResponse {
            id: payment.id,
            order_id: payment.order_id,
            phase: payment.phase.as_str().to_string(),
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            status: payment.status.as_str().to_string(),
            paid_at: payment.paid_at.map(|t| t.to_rfc3339()),
            stripe_payment_intent_id: payment.stripe_payment_intent_id.clone(),
            stripe_checkout_session_id: payment.stripe_checkout_session_id.clone(),
            stripe_charge_id: payment.stripe_charge_id.clone(),
            created_at: payment.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChargeRequest {
    /// Payment phase: deposit | balance | full | shipping_fee.
    pub phase: String,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub checkout_session_id: String,
    pub checkout_url: String,
    pub payment: PaymentResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvoiceResponse {
    pub invoice_id: String,
    pub hosted_invoice_url: String,
    pub payment: PaymentResponse,
}

/// Reconcile by provider session id, or by `(order_id, phase)` when the
/// session id is not at hand.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReconcileRequest {
    pub session_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub phase: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReconcileResponse {
    pub payment: PaymentResponse,
    pub order_status: String,
    pub payment_changed: bool,
    pub order_advanced: bool,
}

impl ReconcileResponse {
    fn from_applied(applied: &ReconciliationApplied) -> Self {
        ReconcileResponse {
            payment: PaymentResponse::from_view(&applied.payment),
            order_status: applied.order_status.as_str().to_string(),
            payment_changed: applied.payment_changed,
            order_advanced: applied.order_advanced,
        }
    }
}

fn parse_phase(phase: &str) -> Result<PaymentPhase, AppError> {
    PaymentPhase::parse(phase)
        .map_err(|_| AppError::Validation(format!("Unknown payment phase '{}'", phase)))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders/{id}/checkout-session
///
/// Creates a provider-hosted checkout session for the phase and upserts the
/// `(order, phase)` ledger row to `processing`. Safe to call repeatedly.
#[utoipa::path(
    post,
    path = "/orders/{id}/checkout-session",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = CreateChargeRequest,
    responses(
        (status = 201, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Phase not chargeable"),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Payment provider error"),
    ),
    tag = "payments"
)]
pub async fn create_checkout_session(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CreateChargeRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let body = body.into_inner();
    let phase = parse_phase(&body.phase)?;
    let actor = Actor {
        source: TriggerSource::Api,
        id: body.triggered_by,
    };

    let (checkout, payment) =
        web::block(move || state.payments.create_checkout_session(order_id, phase, actor))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(CheckoutSessionResponse {
        checkout_session_id: checkout.session_id,
        checkout_url: checkout.url,
        payment: PaymentResponse::from_view(&payment),
    }))
}

/// POST /orders/{id}/invoice
///
/// Alternate collection path: a provider-hosted invoice for the phase.
#[utoipa::path(
    post,
    path = "/orders/{id}/invoice",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = CreateChargeRequest,
    responses(
        (status = 201, description = "Invoice issued", body = InvoiceResponse),
        (status = 400, description = "Phase not invoiceable"),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Payment provider error"),
    ),
    tag = "payments"
)]
pub async fn create_invoice(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CreateChargeRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let body = body.into_inner();
    let phase = parse_phase(&body.phase)?;
    let actor = Actor {
        source: TriggerSource::Api,
        id: body.triggered_by,
    };

    let (invoice, payment) =
        web::block(move || state.payments.create_invoice(order_id, phase, actor))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(InvoiceResponse {
        invoice_id: invoice.invoice_id,
        hosted_invoice_url: invoice.hosted_invoice_url,
        payment: PaymentResponse::from_view(&payment),
    }))
}

/// GET /orders/{id}/payments
#[utoipa::path(
    get,
    path = "/orders/{id}/payments",
    params(("id" = Uuid, Path, description = "Order UUID")),
    responses(
        (status = 200, description = "Ledger rows for the order", body = [PaymentResponse]),
        (status = 404, description = "Order not found"),
    ),
    tag = "payments"
)]
pub async fn list_payments(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let payments = web::block(move || state.payments.list_payments(order_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let response: Vec<PaymentResponse> =
        payments.iter().map(PaymentResponse::from_view).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// POST /payments/reconcile
///
/// Client-triggered reconciliation for delayed or missed webhook deliveries.
/// Reads the provider's authoritative state and converges the ledger and the
/// order onto it; repeating the call is harmless.
#[utoipa::path(
    post,
    path = "/payments/reconcile",
    request_body = ReconcileRequest,
    responses(
        (status = 200, description = "Reconciled", body = ReconcileResponse),
        (status = 400, description = "Neither session id nor (order_id, phase) given"),
        (status = 404, description = "No such payment"),
        (status = 422, description = "Provider state cannot be correlated"),
        (status = 502, description = "Payment provider error"),
    ),
    tag = "payments"
)]
pub async fn reconcile(
    state: web::Data<AppState>,
    body: web::Json<ReconcileRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let actor = Actor {
        source: TriggerSource::Api,
        id: None,
    };

    let applied = match (body.session_id, body.order_id, body.phase) {
        (Some(session_id), _, _) => {
            web::block(move || state.reconciliation.reconcile_session(&session_id, actor))
                .await
                .map_err(|e| AppError::Internal(e.to_string()))??
        }
        (None, Some(order_id), Some(phase)) => {
            let phase = parse_phase(&phase)?;
            web::block(move || {
                state
                    .reconciliation
                    .reconcile_order_phase(order_id, phase, actor)
            })
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??
        }
        _ => {
            return Err(AppError::Validation(
                "Provide either session_id or order_id with phase".to_string(),
            ))
        }
    };

    Ok(HttpResponse::Ok().json(ReconcileResponse::from_applied(&applied)))
}
