use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::OrderPatch;
use crate::domain::payment::{PaymentPhase, PaymentStatus, ProviderPaymentState};
use crate::domain::ports::{
    OrderRepository, PaymentRepository, ReconciliationApplied, ReconciliationOutcome,
    SharedProvider,
};
use crate::domain::timeline::{Actor, NewTimelineEvent, TimelineEventType};

/// Converges the local ledger and order onto the provider's authoritative
/// payment state. Fed from two sides: provider webhooks and client-triggered
/// reconcile calls for delayed or missed deliveries. Applying the same
/// provider state twice changes nothing.
pub struct ReconciliationService<R, PR> {
    orders: R,
    payments: PR,
    provider: SharedProvider,
}

impl<R: OrderRepository, PR: PaymentRepository> ReconciliationService<R, PR> {
    pub fn new(orders: R, payments: PR, provider: SharedProvider) -> Self {
        Self {
            orders,
            payments,
            provider,
        }
    }

    pub fn reconcile_session(
        &self,
        session_id: &str,
        actor: Actor,
    ) -> Result<ReconciliationApplied, DomainError> {
        let state = self.provider.retrieve_checkout_session(session_id)?;
        let (order_id, phase) = self.correlate(&state)?;
        self.apply(state, order_id, phase, actor)
    }

    pub fn reconcile_intent(
        &self,
        intent_id: &str,
        actor: Actor,
    ) -> Result<ReconciliationApplied, DomainError> {
        let state = self.provider.retrieve_payment_intent(intent_id)?;
        let (order_id, phase) = self.correlate(&state)?;
        self.apply(state, order_id, phase, actor)
    }

    /// Client-triggered variant keyed by `(order, phase)` instead of a
    /// session id; resolves the provider reference from the ledger row.
    pub fn reconcile_order_phase(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
        actor: Actor,
    ) -> Result<ReconciliationApplied, DomainError> {
        let payment = self
            .payments
            .find(order_id, phase)?
            .ok_or(DomainError::NotFound)?;
        let state = if let Some(session_id) = payment.stripe_checkout_session_id.as_deref() {
            self.provider.retrieve_checkout_session(session_id)?
        } else if let Some(intent_id) = payment.stripe_payment_intent_id.as_deref() {
            self.provider.retrieve_payment_intent(intent_id)?
        } else {
            return Err(DomainError::Reconciliation(format!(
                "Payment for order {} phase {} has no provider reference to reconcile against",
                order_id, phase
            )));
        };
        self.apply(state, order_id, phase, actor)
    }

    /// Entry point for verified webhook payloads. Unknown event types are
    /// ignored so the provider does not redeliver them forever.
    pub fn handle_webhook_event(
        &self,
        event_type: &str,
        object: &Value,
        actor: Actor,
    ) -> Result<Option<ReconciliationApplied>, DomainError> {
        let object_id = || {
            object["id"].as_str().map(str::to_string).ok_or_else(|| {
                DomainError::Reconciliation(format!(
                    "Webhook event '{}' is missing the object id",
                    event_type
                ))
            })
        };
        match event_type {
            "checkout.session.completed" => {
                self.reconcile_session(&object_id()?, actor).map(Some)
            }
            "payment_intent.succeeded" | "payment_intent.payment_failed" => {
                self.reconcile_intent(&object_id()?, actor).map(Some)
            }
            other => {
                log::debug!("Ignoring webhook event type '{}'", other);
                Ok(None)
            }
        }
    }

    /// Resolve the `(order, phase)` a provider state belongs to: metadata
    /// first, then the ledger's stored session/intent references.
    fn correlate(
        &self,
        state: &ProviderPaymentState,
    ) -> Result<(Uuid, PaymentPhase), DomainError> {
        if let (Some(order_id), Some(phase)) = (state.order_id, state.phase) {
            return Ok((order_id, phase));
        }
        if let Some(session_id) = state.checkout_session_id.as_deref() {
            if let Some(payment) = self.payments.find_by_session(session_id)? {
                return Ok((payment.order_id, payment.phase));
            }
        }
        if let Some(intent_id) = state.payment_intent_id.as_deref() {
            if let Some(payment) = self.payments.find_by_intent(intent_id)? {
                return Ok((payment.order_id, payment.phase));
            }
        }
        Err(DomainError::Reconciliation(
            "Provider state carries no order/phase metadata and matches no ledger row"
                .to_string(),
        ))
    }

    fn apply(
        &self,
        state: ProviderPaymentState,
        order_id: Uuid,
        phase: PaymentPhase,
        actor: Actor,
    ) -> Result<ReconciliationApplied, DomainError> {
        let order = self
            .orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?;
        let now = Utc::now();

        let mut paid_at = None;
        let mut order_transition = None;
        let mut order_patch = OrderPatch::default();
        let event_type = match state.status {
            PaymentStatus::Succeeded => {
                paid_at = Some(now);
                order_transition = phase.settles_transition();
                match phase {
                    PaymentPhase::Full => {
                        order_patch.total_paid_amount = Some(order.total_amount.clone());
                        order_patch.paid_at = Some(now);
                    }
                    PaymentPhase::ShippingFee => {
                        order_patch.shipping_paid_at = Some(now);
                    }
                    PaymentPhase::Deposit | PaymentPhase::Balance => {}
                }
                TimelineEventType::PaymentSucceeded
            }
            PaymentStatus::Failed | PaymentStatus::Canceled => TimelineEventType::PaymentFailed,
            _ => TimelineEventType::PaymentStatusChanged,
        };

        let mut event_data = json!({
            "phase": phase.as_str(),
            "status": state.status.as_str(),
        });
        if let Some(session_id) = state.checkout_session_id.as_deref() {
            event_data["checkout_session_id"] = json!(session_id);
        }
        if let Some((from, to)) = order_transition {
            event_data["from"] = json!(from.as_str());
            event_data["to"] = json!(to.as_str());
        }

        let outcome = ReconciliationOutcome {
            order_id,
            phase,
            payment_status: state.status,
            paid_at,
            amount_cents: state.amount_cents,
            currency: state.currency.clone(),
            checkout_session_id: state.checkout_session_id.clone(),
            payment_intent_id: state.payment_intent_id.clone(),
            charge_id: state.charge_id.clone(),
            order_transition,
            order_patch,
            event: NewTimelineEvent {
                event_type,
                description: format!("Payment for phase {} reported {}", phase, state.status),
                event_data,
                actor,
            },
        };

        let applied = self.payments.apply_outcome(outcome)?;
        if applied.payment_changed || applied.order_advanced {
            log::info!(
                "Reconciled order {} phase {}: payment {}, order status {}",
                order.order_number,
                phase,
                applied.payment.status,
                applied.order_status
            );
        } else {
            log::debug!(
                "Reconciliation for order {} phase {} was a no-op",
                order.order_number,
                phase
            );
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use std::sync::Arc;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::application::lifecycle::{LifecycleService, TransitionOutcome};
    use crate::application::order_service::{CreateOrderInput, OrderService};
    use crate::application::payment_service::PaymentService;
    use crate::application::testing::{InMemoryStore, StubProvider};
    use crate::domain::order::{Customization, OrderStatus, PrintPlacement};
    use crate::domain::timeline::TriggerSource;

    struct Fixture {
        store: InMemoryStore,
        provider: StubProvider,
        orders: OrderService<InMemoryStore>,
        payments: PaymentService<InMemoryStore, InMemoryStore>,
        lifecycle: LifecycleService<InMemoryStore, InMemoryStore>,
        reconciliation: ReconciliationService<InMemoryStore, InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let provider = StubProvider::new();
        let shared: SharedProvider = Arc::new(provider.clone());
        Fixture {
            store: store.clone(),
            provider,
            orders: OrderService::new(store.clone(), "usd".to_string()),
            payments: PaymentService::new(
                store.clone(),
                store.clone(),
                shared.clone(),
                "usd".to_string(),
            ),
            lifecycle: LifecycleService::new(
                store.clone(),
                store.clone(),
                shared.clone(),
                "usd".to_string(),
            ),
            reconciliation: ReconciliationService::new(store.clone(), store, shared),
        }
    }

    fn api() -> Actor {
        Actor {
            source: TriggerSource::Api,
            id: None,
        }
    }

    fn create_order(fixture: &Fixture, shipping_fee_cents: Option<i64>) -> Uuid {
        fixture
            .orders
            .create_order(CreateOrderInput {
                user_id: Some(Uuid::new_v4()),
                guest_email: None,
                product_name: "Polo Shirt".to_string(),
                product_category: "polos".to_string(),
                quantity: 50,
                unit_price: BigDecimal::from_str("7.99").unwrap(),
                total_amount: None,
                customization: Customization {
                    placements: vec![PrintPlacement {
                        location: "chest".to_string(),
                        method: "embroidery".to_string(),
                        colors: vec![],
                        artwork_url: None,
                    }],
                    sizes: BTreeMap::from([("M".to_string(), 50)]),
                },
                shipping_address: None,
                shipping_fee_cents,
                actor: api(),
            })
            .unwrap()
            .id
    }

    #[test]
    fn successful_session_settles_payment_and_advances_order() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.complete_session(&checkout.session_id);

        let applied = f
            .reconciliation
            .reconcile_session(&checkout.session_id, Actor::webhook())
            .unwrap();

        assert!(applied.payment_changed);
        assert!(applied.order_advanced);
        assert_eq!(applied.order_status, OrderStatus::Paid);
        assert_eq!(applied.payment.status, PaymentStatus::Succeeded);
        assert!(applied.payment.paid_at.is_some());

        let order = f.orders.get_order(order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.total_paid_amount, Some(order.total_amount.clone()));
    }

    #[test]
    fn redelivered_success_event_is_a_noop() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.complete_session(&checkout.session_id);

        f.reconciliation
            .reconcile_session(&checkout.session_id, Actor::webhook())
            .unwrap();
        let events_before = f.store.events_for(order_id).len();

        let applied = f
            .reconciliation
            .reconcile_session(&checkout.session_id, Actor::webhook())
            .unwrap();

        assert!(!applied.payment_changed);
        assert!(!applied.order_advanced);
        assert_eq!(applied.order_status, OrderStatus::Paid);
        // still exactly one payment row, no extra audit entries
        assert_eq!(f.payments.list_payments(order_id).unwrap().len(), 1);
        assert_eq!(f.store.events_for(order_id).len(), events_before);
    }

    #[test]
    fn processing_state_updates_ledger_without_touching_order() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();

        let applied = f
            .reconciliation
            .reconcile_session(&checkout.session_id, api())
            .unwrap();

        assert_eq!(applied.payment.status, PaymentStatus::Processing);
        assert!(!applied.order_advanced);
        assert_eq!(
            f.orders.get_order(order_id).unwrap().status,
            OrderStatus::Submitted
        );
    }

    #[test]
    fn failed_payment_leaves_order_open_for_retry() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.fail_session(&checkout.session_id);

        let applied = f
            .reconciliation
            .reconcile_session(&checkout.session_id, Actor::webhook())
            .unwrap();

        assert_eq!(applied.payment.status, PaymentStatus::Failed);
        assert!(!applied.order_advanced);
        assert_eq!(
            f.orders.get_order(order_id).unwrap().status,
            OrderStatus::Submitted
        );

        // the customer can start a fresh attempt on the same ledger row
        let (retry, payment) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(
            payment.stripe_checkout_session_id.as_deref(),
            Some(retry.session_id.as_str())
        );
    }

    #[test]
    fn shipping_fee_success_releases_the_shipping_gate() {
        let f = fixture();
        let order_id = create_order(&f, Some(500));
        f.lifecycle.pay(order_id, Actor::system()).unwrap();
        f.lifecycle
            .transition(
                order_id,
                OrderStatus::InProduction,
                api(),
                Default::default(),
            )
            .unwrap();

        let outcome = f
            .lifecycle
            .transition(order_id, OrderStatus::Shipping, api(), Default::default())
            .unwrap();
        let checkout = match outcome {
            TransitionOutcome::ShippingFeeDue { checkout, .. } => checkout,
            other => panic!("expected shipping fee gate, got {:?}", other),
        };

        f.provider.complete_session(&checkout.session_id);
        let applied = f
            .reconciliation
            .reconcile_session(&checkout.session_id, Actor::webhook())
            .unwrap();

        assert!(applied.order_advanced);
        assert_eq!(applied.order_status, OrderStatus::Shipping);
        let order = f.orders.get_order(order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Shipping);
        assert!(order.shipping_paid_at.is_some());
    }

    #[test]
    fn reconcile_by_order_and_phase_resolves_stored_session() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.complete_session(&checkout.session_id);

        let applied = f
            .reconciliation
            .reconcile_order_phase(order_id, PaymentPhase::Full, api())
            .unwrap();

        assert_eq!(applied.order_status, OrderStatus::Paid);
    }

    #[test]
    fn reconcile_without_provider_reference_fails() {
        let f = fixture();
        let order_id = create_order(&f, None);

        // the initial ledger row has never been sent to the provider
        assert!(matches!(
            f.reconciliation
                .reconcile_order_phase(order_id, PaymentPhase::Full, api()),
            Err(DomainError::Reconciliation(_))
        ));
    }

    #[test]
    fn webhook_event_checkout_completed_reconciles() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, _) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.complete_session(&checkout.session_id);

        let applied = f
            .reconciliation
            .handle_webhook_event(
                "checkout.session.completed",
                &json!({ "id": checkout.session_id }),
                Actor::webhook(),
            )
            .unwrap()
            .expect("event should be handled");

        assert_eq!(applied.order_status, OrderStatus::Paid);
    }

    #[test]
    fn webhook_event_unknown_type_is_ignored() {
        let f = fixture();
        let handled = f
            .reconciliation
            .handle_webhook_event(
                "customer.subscription.updated",
                &json!({ "id": "sub_123" }),
                Actor::webhook(),
            )
            .unwrap();
        assert!(handled.is_none());
    }

    #[test]
    fn webhook_event_without_object_id_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.reconciliation.handle_webhook_event(
                "checkout.session.completed",
                &json!({}),
                Actor::webhook(),
            ),
            Err(DomainError::Reconciliation(_))
        ));
    }

    #[test]
    fn webhook_payment_intent_succeeded_reconciles_via_intent() {
        let f = fixture();
        let order_id = create_order(&f, None);
        let (checkout, payment) = f
            .payments
            .create_checkout_session(order_id, PaymentPhase::Full, api())
            .unwrap();
        f.provider.complete_session(&checkout.session_id);

        let intent_id = payment.stripe_payment_intent_id.expect("intent recorded");
        let applied = f
            .reconciliation
            .handle_webhook_event(
                "payment_intent.succeeded",
                &json!({ "id": intent_id }),
                Actor::webhook(),
            )
            .unwrap()
            .expect("event should be handled");

        assert_eq!(applied.order_status, OrderStatus::Paid);
    }
}
