use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::timeline::Actor;
use crate::errors::AppError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// False for event types this service does not consume.
    pub handled: bool,
}

/// POST /webhooks/stripe
///
/// Signature-verified provider events. Handled types:
/// `checkout.session.completed`, `payment_intent.succeeded`,
/// `payment_intent.payment_failed`. Processing reads the provider's
/// authoritative object state, so redeliveries are no-ops. Errors surface as
/// non-2xx so the provider redelivers on its own schedule.
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    request_body = String,
    responses(
        (status = 200, description = "Event processed (or ignored)", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature"),
        (status = 422, description = "Event cannot be correlated to a payment"),
        (status = 502, description = "Provider lookup failed"),
    ),
    tag = "webhooks"
)]
pub async fn stripe_webhook(
    state: web::Data<AppState>,
    request: HttpRequest,
    payload: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Validation(format!("Missing {} header", SIGNATURE_HEADER))
        })?;

    if !state.webhooks.verify(&payload, signature)? {
        log::warn!("Rejected webhook with invalid signature");
        return Err(AppError::Validation("Invalid webhook signature".to_string()));
    }

    let event: Value = serde_json::from_slice(&payload)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;
    let event_type = event["type"]
        .as_str()
        .ok_or_else(|| AppError::Validation("Webhook event has no type".to_string()))?
        .to_string();
    let object = event["data"]["object"].clone();

    log::info!("Processing webhook event '{}'", event_type);
    let handled = web::block(move || {
        state
            .reconciliation
            .handle_webhook_event(&event_type, &object, Actor::webhook())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(WebhookAck {
        received: true,
        handled: handled.is_some(),
    }))
}
