use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::payment::{
    CheckoutRequest, CheckoutSession, HostedInvoice, PaymentPhase, PaymentStatus,
    ProviderPaymentState,
};
use crate::domain::ports::PaymentProvider;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Stripe REST gateway. All calls are blocking and are expected to run on
/// the actix blocking pool next to the Diesel work.
pub struct StripeGateway {
    client: reqwest::blocking::Client,
    secret_key: String,
    api_base: String,
    success_url: String,
    cancel_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, success_url: String, cancel_url: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            secret_key,
            api_base: DEFAULT_API_BASE.to_string(),
            success_url,
            cancel_url,
        }
    }

    /// Point the gateway at a different host (stripe-mock and the like).
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    fn post_form(&self, path: &str, params: &[(String, String)]) -> Result<Value, DomainError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params)
            .send()
            .map_err(|e| DomainError::Provider(e.to_string()))?;
        read_json(response)
    }

    fn get(&self, path: &str) -> Result<Value, DomainError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .map_err(|e| DomainError::Provider(e.to_string()))?;
        read_json(response)
    }
}

fn read_json(response: reqwest::blocking::Response) -> Result<Value, DomainError> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|e| DomainError::Provider(format!("Invalid provider response: {}", e)))?;
    if !status.is_success() {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("Unknown provider error");
        return Err(DomainError::Provider(format!(
            "Stripe returned {}: {}",
            status, message
        )));
    }
    Ok(body)
}

impl PaymentProvider for StripeGateway {
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, DomainError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            ("client_reference_id".into(), request.order_id.to_string()),
            ("metadata[order_id]".into(), request.order_id.to_string()),
            ("metadata[phase]".into(), request.phase.as_str().into()),
            (
                "metadata[order_number]".into(),
                request.order_number.clone(),
            ),
            (
                "payment_intent_data[metadata][order_id]".into(),
                request.order_id.to_string(),
            ),
            (
                "payment_intent_data[metadata][phase]".into(),
                request.phase.as_str().into(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                request.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                request.product_name.clone(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            params.push(("customer_email".into(), email.clone()));
        }

        let body = self.post_form("/v1/checkout/sessions", &params)?;
        let session_id = body["id"]
            .as_str()
            .ok_or_else(|| DomainError::Provider("Session response missing id".to_string()))?
            .to_string();
        let url = body["url"]
            .as_str()
            .ok_or_else(|| DomainError::Provider("Session response missing url".to_string()))?
            .to_string();
        Ok(CheckoutSession {
            session_id,
            url,
            payment_intent_id: body["payment_intent"].as_str().map(str::to_string),
        })
    }

    fn create_invoice(&self, request: &CheckoutRequest) -> Result<HostedInvoice, DomainError> {
        let email = request.customer_email.as_deref().ok_or_else(|| {
            DomainError::Validation("A customer email is required for invoicing".to_string())
        })?;

        let customer = self.post_form(
            "/v1/customers",
            &[
                ("email".to_string(), email.to_string()),
                (
                    "metadata[order_id]".to_string(),
                    request.order_id.to_string(),
                ),
            ],
        )?;
        let customer_id = customer["id"]
            .as_str()
            .ok_or_else(|| DomainError::Provider("Customer response missing id".to_string()))?
            .to_string();

        self.post_form(
            "/v1/invoiceitems",
            &[
                ("customer".to_string(), customer_id.clone()),
                ("amount".to_string(), request.amount_cents.to_string()),
                ("currency".to_string(), request.currency.clone()),
                (
                    "description".to_string(),
                    format!("{} ({})", request.product_name, request.phase),
                ),
            ],
        )?;

        let invoice = self.post_form(
            "/v1/invoices",
            &[
                ("customer".to_string(), customer_id),
                ("collection_method".to_string(), "send_invoice".to_string()),
                ("days_until_due".to_string(), "30".to_string()),
                (
                    "metadata[order_id]".to_string(),
                    request.order_id.to_string(),
                ),
                (
                    "metadata[phase]".to_string(),
                    request.phase.as_str().to_string(),
                ),
            ],
        )?;
        let invoice_id = invoice["id"]
            .as_str()
            .ok_or_else(|| DomainError::Provider("Invoice response missing id".to_string()))?
            .to_string();

        let finalized =
            self.post_form(&format!("/v1/invoices/{}/finalize", invoice_id), &[])?;
        let hosted_invoice_url = finalized["hosted_invoice_url"]
            .as_str()
            .ok_or_else(|| {
                DomainError::Provider("Finalized invoice missing hosted url".to_string())
            })?
            .to_string();

        Ok(HostedInvoice {
            invoice_id,
            hosted_invoice_url,
        })
    }

    fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderPaymentState, DomainError> {
        let body = self.get(&format!("/v1/checkout/sessions/{}", session_id))?;
        session_state(&body)
    }

    fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<ProviderPaymentState, DomainError> {
        let body = self.get(&format!("/v1/payment_intents/{}", intent_id))?;
        intent_state(&body)
    }
}

/// Correlation metadata, if the provider object carries any. Unparsable
/// values degrade to `None`; the reconciliation service then falls back to
/// the ledger's stored references.
fn correlation(metadata: &Value) -> (Option<Uuid>, Option<PaymentPhase>) {
    let order_id = metadata["order_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok());
    let phase = metadata["phase"]
        .as_str()
        .and_then(|s| PaymentPhase::parse(s).ok());
    (order_id, phase)
}

/// Map a Checkout Session object to its authoritative payment state.
/// `payment_status` is the source of truth; an expired session that never
/// collected is a cancellation.
pub(crate) fn session_state(body: &Value) -> Result<ProviderPaymentState, DomainError> {
    let status = match body["payment_status"].as_str() {
        Some("paid") | Some("no_payment_required") => PaymentStatus::Succeeded,
        _ => match body["status"].as_str() {
            Some("expired") => PaymentStatus::Canceled,
            _ => PaymentStatus::Processing,
        },
    };
    let (order_id, phase) = correlation(&body["metadata"]);
    Ok(ProviderPaymentState {
        status,
        checkout_session_id: body["id"].as_str().map(str::to_string),
        payment_intent_id: body["payment_intent"].as_str().map(str::to_string),
        charge_id: None,
        order_id,
        phase,
        amount_cents: body["amount_total"].as_i64(),
        currency: body["currency"].as_str().map(str::to_string),
    })
}

/// Map a Payment Intent object to its authoritative payment state. Stripe
/// parks a failed intent back in `requires_payment_method` with
/// `last_payment_error` set; that combination is a failure, not a fresh
/// attempt.
pub(crate) fn intent_state(body: &Value) -> Result<ProviderPaymentState, DomainError> {
    let status = match body["status"].as_str() {
        Some("succeeded") => PaymentStatus::Succeeded,
        Some("processing") => PaymentStatus::Processing,
        Some("requires_action") | Some("requires_confirmation") | Some("requires_capture") => {
            PaymentStatus::RequiresAction
        }
        Some("requires_payment_method") => {
            if body["last_payment_error"].is_object() {
                PaymentStatus::Failed
            } else {
                PaymentStatus::RequiresPaymentMethod
            }
        }
        Some("canceled") => PaymentStatus::Canceled,
        other => {
            return Err(DomainError::Provider(format!(
                "Unexpected payment intent status {:?}",
                other
            )))
        }
    };
    let (order_id, phase) = correlation(&body["metadata"]);
    Ok(ProviderPaymentState {
        status,
        checkout_session_id: None,
        payment_intent_id: body["id"].as_str().map(str::to_string),
        charge_id: body["latest_charge"].as_str().map(str::to_string),
        order_id,
        phase,
        amount_cents: body["amount"].as_i64(),
        currency: body["currency"].as_str().map(str::to_string),
    })
}

// ── Webhook signature verification ───────────────────────────────────────────

/// Verifies `Stripe-Signature` headers: HMAC-SHA256 over `"{t}.{payload}"`
/// with the endpoint's shared secret, with a replay-protection window on
/// the timestamp.
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            tolerance_secs: 300,
        }
    }

    /// `Ok(false)` means a well-formed header that does not match (wrong
    /// secret, altered payload, or stale timestamp); malformed headers are
    /// errors.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<bool, DomainError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse().map_err(|_| {
                        DomainError::Validation(format!(
                            "Invalid webhook signature timestamp '{}'",
                            value
                        ))
                    })?);
                }
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| {
            DomainError::Validation("Webhook signature header is missing a timestamp".to_string())
        })?;
        if signatures.is_empty() {
            return Err(DomainError::Validation(
                "Webhook signature header is missing a v1 signature".to_string(),
            ));
        }

        if (chrono::Utc::now().timestamp() - timestamp).abs() > self.tolerance_secs {
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| DomainError::Internal(e.to_string()))?;
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        Ok(signatures.iter().any(|s| *s == expected))
    }
}
