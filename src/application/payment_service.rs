use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::OrderView;
use crate::domain::payment::{
    phase_amount_cents, CheckoutRequest, CheckoutSession, HostedInvoice, PaymentPhase,
    PaymentStatus, PaymentView,
};
use crate::domain::ports::{
    CheckoutRecord, OrderRepository, PaymentRepository, SharedProvider,
};
use crate::domain::timeline::{Actor, NewTimelineEvent, TimelineEventType};

pub struct PaymentService<R, PR> {
    orders: R,
    payments: PR,
    provider: SharedProvider,
    currency: String,
}

impl<R: OrderRepository, PR: PaymentRepository> PaymentService<R, PR> {
    pub fn new(orders: R, payments: PR, provider: SharedProvider, currency: String) -> Self {
        Self {
            orders,
            payments,
            provider,
            currency,
        }
    }

    /// Create a provider-hosted checkout session for one payment phase and
    /// record it on the ledger. Keyed by `(order, phase)`: repeated clicks
    /// reuse the ledger row and simply record the newest session.
    pub fn create_checkout_session(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
        actor: Actor,
    ) -> Result<(CheckoutSession, PaymentView), DomainError> {
        let (order, amount_cents) = self.prepare_charge(order_id, phase)?;
        let request = self.checkout_request(&order, phase, amount_cents);

        // Provider first: no ledger mutation unless the provider confirmed.
        let checkout = self.provider.create_checkout_session(&request)?;

        let payment = self.payments.record_checkout(CheckoutRecord {
            order_id: order.id,
            phase,
            amount_cents,
            currency: self.currency.clone(),
            checkout_session_id: Some(checkout.session_id.clone()),
            payment_intent_id: checkout.payment_intent_id.clone(),
            metadata: None,
            event: NewTimelineEvent {
                event_type: TimelineEventType::CheckoutSessionCreated,
                description: format!("Checkout session created for phase {}", phase),
                event_data: json!({
                    "phase": phase.as_str(),
                    "amount_cents": amount_cents,
                    "checkout_session_id": checkout.session_id,
                }),
                actor,
            },
        })?;
        log::info!(
            "Checkout session {} created for order {} phase {}",
            checkout.session_id,
            order.order_number,
            phase
        );
        Ok((checkout, payment))
    }

    /// Alternate collection path: a provider-hosted invoice instead of a
    /// checkout session. Same amount computation, same ledger upsert.
    pub fn create_invoice(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
        actor: Actor,
    ) -> Result<(HostedInvoice, PaymentView), DomainError> {
        let (order, amount_cents) = self.prepare_charge(order_id, phase)?;
        let request = self.checkout_request(&order, phase, amount_cents);

        let invoice = self.provider.create_invoice(&request)?;

        let payment = self.payments.record_checkout(CheckoutRecord {
            order_id: order.id,
            phase,
            amount_cents,
            currency: self.currency.clone(),
            checkout_session_id: None,
            payment_intent_id: None,
            metadata: Some(json!({ "stripe_invoice_id": invoice.invoice_id })),
            event: NewTimelineEvent {
                event_type: TimelineEventType::InvoiceCreated,
                description: format!("Invoice issued for phase {}", phase),
                event_data: json!({
                    "phase": phase.as_str(),
                    "amount_cents": amount_cents,
                    "invoice_id": invoice.invoice_id,
                }),
                actor,
            },
        })?;
        log::info!(
            "Invoice {} issued for order {} phase {}",
            invoice.invoice_id,
            order.order_number,
            phase
        );
        Ok((invoice, payment))
    }

    pub fn list_payments(&self, order_id: Uuid) -> Result<Vec<PaymentView>, DomainError> {
        self.orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?;
        self.payments.list_for_order(order_id)
    }

    fn prepare_charge(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
    ) -> Result<(OrderView, i64), DomainError> {
        let order = self
            .orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?;
        if let Some(existing) = self.payments.find(order_id, phase)? {
            if existing.status == PaymentStatus::Succeeded {
                return Err(DomainError::Validation(format!(
                    "Payment phase {} is already settled for order {}",
                    phase, order.order_number
                )));
            }
        }
        let amount_cents = phase_amount_cents(&order, phase)?;
        Ok((order, amount_cents))
    }

    fn checkout_request(
        &self,
        order: &OrderView,
        phase: PaymentPhase,
        amount_cents: i64,
    ) -> CheckoutRequest {
        let product_name = match phase {
            PaymentPhase::ShippingFee => {
                format!("Shipping fee for order {}", order.order_number)
            }
            _ => order.product_name.clone(),
        };
        CheckoutRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            phase,
            amount_cents,
            currency: self.currency.clone(),
            product_name,
            customer_email: order.identity.guest_email().map(str::to_string),
        }
    }
}
