use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{amount_to_cents, OrderPatch, OrderStatus, OrderView};
use crate::domain::payment::{CheckoutRequest, CheckoutSession, PaymentPhase, PaymentStatus, PaymentView};
use crate::domain::ports::{
    CheckoutRecord, OrderRepository, PaymentMark, PaymentRepository, SharedProvider,
    TransitionRecord,
};
use crate::domain::timeline::{Actor, NewTimelineEvent, TimelineEventType};

/// Extra fields an admin may set while advancing an order.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Result of a transition request. Advancing into `shipping` with an unpaid
/// configured shipping fee does not move the order; it charges the fee and
/// hands back the checkout session instead. The status advances when that
/// payment reconciles to `succeeded`.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Advanced(OrderView),
    ShippingFeeDue {
        order: OrderView,
        payment: PaymentView,
        checkout: CheckoutSession,
    },
}

pub struct LifecycleService<R, PR> {
    orders: R,
    payments: PR,
    provider: SharedProvider,
    currency: String,
}

impl<R: OrderRepository, PR: PaymentRepository> LifecycleService<R, PR> {
    pub fn new(orders: R, payments: PR, provider: SharedProvider, currency: String) -> Self {
        Self {
            orders,
            payments,
            provider,
            currency,
        }
    }

    /// Customer pay action: settles the `full` payment and moves the order
    /// `submitted -> paid` in one transaction.
    pub fn pay(&self, order_id: Uuid, actor: Actor) -> Result<OrderView, DomainError> {
        let order = self
            .orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?;
        self.apply_paid(order, actor)
    }

    pub fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Actor,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome, DomainError> {
        let order = self
            .orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?;

        if !order.status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        match target {
            OrderStatus::Paid => self.apply_paid(order, actor).map(TransitionOutcome::Advanced),
            OrderStatus::Shipping => self.advance_to_shipping(order, actor, options),
            OrderStatus::Delivered => {
                let now = Utc::now();
                let patch = OrderPatch {
                    actual_delivery: Some(now),
                    ..Default::default()
                };
                self.apply(order, OrderStatus::Delivered, patch, None, actor)
                    .map(TransitionOutcome::Advanced)
            }
            _ => self
                .apply(order, target, OrderPatch::default(), None, actor)
                .map(TransitionOutcome::Advanced),
        }
    }

    fn apply_paid(&self, order: OrderView, actor: Actor) -> Result<OrderView, DomainError> {
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(DomainError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }
        let now = Utc::now();
        let total_cents = amount_to_cents(&order.total_amount)?;
        let patch = OrderPatch {
            total_paid_amount: Some(order.total_amount.clone()),
            paid_at: Some(now),
            ..Default::default()
        };
        let mark = PaymentMark {
            phase: PaymentPhase::Full,
            status: PaymentStatus::Succeeded,
            paid_at: Some(now),
            amount_cents: total_cents,
            currency: self.currency.clone(),
        };
        self.apply(order, OrderStatus::Paid, patch, Some(mark), actor)
    }

    /// The one transition with a side-effect gate: a configured, unpaid
    /// shipping fee must be charged before the order may ship.
    fn advance_to_shipping(
        &self,
        order: OrderView,
        actor: Actor,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome, DomainError> {
        if let Some(fee_cents) = order.shipping_fee_unpaid() {
            let request = CheckoutRequest {
                order_id: order.id,
                order_number: order.order_number.clone(),
                phase: PaymentPhase::ShippingFee,
                amount_cents: fee_cents,
                currency: self.currency.clone(),
                product_name: format!("Shipping fee for order {}", order.order_number),
                customer_email: order.identity.guest_email().map(str::to_string),
            };
            // Provider first; the ledger row is touched only once the
            // provider has confirmed the session.
            let checkout = self.provider.create_checkout_session(&request)?;
            let payment = self.payments.record_checkout(CheckoutRecord {
                order_id: order.id,
                phase: PaymentPhase::ShippingFee,
                amount_cents: fee_cents,
                currency: self.currency.clone(),
                checkout_session_id: Some(checkout.session_id.clone()),
                payment_intent_id: checkout.payment_intent_id.clone(),
                metadata: None,
                event: NewTimelineEvent {
                    event_type: TimelineEventType::CheckoutSessionCreated,
                    description: format!(
                        "Shipping fee of {} cents charged before shipment",
                        fee_cents
                    ),
                    event_data: json!({
                        "phase": PaymentPhase::ShippingFee.as_str(),
                        "amount_cents": fee_cents,
                        "checkout_session_id": checkout.session_id,
                    }),
                    actor,
                },
            })?;
            log::info!(
                "Order {} held in {}: shipping fee session {} created",
                order.order_number,
                order.status,
                checkout.session_id
            );
            return Ok(TransitionOutcome::ShippingFeeDue {
                order,
                payment,
                checkout,
            });
        }

        let patch = OrderPatch {
            tracking_number: options.tracking_number,
            estimated_delivery: options.estimated_delivery,
            ..Default::default()
        };
        self.apply(order, OrderStatus::Shipping, patch, None, actor)
            .map(TransitionOutcome::Advanced)
    }

    fn apply(
        &self,
        order: OrderView,
        target: OrderStatus,
        patch: OrderPatch,
        settle_payment: Option<PaymentMark>,
        actor: Actor,
    ) -> Result<OrderView, DomainError> {
        let from = order.status;
        let event = NewTimelineEvent {
            event_type: TimelineEventType::StatusChanged,
            description: format!("Order status changed from {} to {}", from, target),
            event_data: json!({
                "from": from.as_str(),
                "to": target.as_str(),
            }),
            actor,
        };
        let updated = self.orders.transition(TransitionRecord {
            order_id: order.id,
            from,
            to: target,
            patch,
            settle_payment,
            event,
        })?;
        log::info!(
            "Order {} advanced {} -> {}",
            updated.order_number,
            from,
            target
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use std::sync::Arc;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::application::order_service::{CreateOrderInput, OrderService};
    use crate::application::testing::{InMemoryStore, StubProvider};
    use crate::domain::order::{Customization, PrintPlacement};
    use crate::domain::ports::PaymentRepository as _;
    use crate::domain::timeline::TriggerSource;

    struct Fixture {
        store: InMemoryStore,
        provider: StubProvider,
        orders: OrderService<InMemoryStore>,
        lifecycle: LifecycleService<InMemoryStore, InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let provider = StubProvider::new();
        Fixture {
            store: store.clone(),
            provider: provider.clone(),
            orders: OrderService::new(store.clone(), "usd".to_string()),
            lifecycle: LifecycleService::new(
                store.clone(),
                store,
                Arc::new(provider),
                "usd".to_string(),
            ),
        }
    }

    fn admin() -> Actor {
        Actor {
            source: TriggerSource::Admin,
            id: Some("ops@example.com".to_string()),
        }
    }

    fn create_order(fixture: &Fixture, shipping_fee_cents: Option<i64>) -> OrderView {
        fixture
            .orders
            .create_order(CreateOrderInput {
                user_id: None,
                guest_email: Some("buyer@example.com".to_string()),
                product_name: "Crewneck Tee".to_string(),
                product_category: "t-shirts".to_string(),
                quantity: 50,
                unit_price: BigDecimal::from_str("7.99").unwrap(),
                total_amount: None,
                customization: Customization {
                    placements: vec![PrintPlacement {
                        location: "front".to_string(),
                        method: "screen_print".to_string(),
                        colors: vec![],
                        artwork_url: None,
                    }],
                    sizes: BTreeMap::from([("M".to_string(), 50)]),
                },
                shipping_address: None,
                shipping_fee_cents,
                actor: Actor {
                    source: TriggerSource::Api,
                    id: None,
                },
            })
            .unwrap()
    }

    #[test]
    fn pay_settles_full_payment_and_advances_order() {
        let f = fixture();
        let order = create_order(&f, None);

        let paid = f.lifecycle.pay(order.id, Actor::system()).unwrap();

        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.total_paid_amount, Some(paid.total_amount.clone()));
        assert!(paid.paid_at.is_some());

        let payment = f.store.find(order.id, PaymentPhase::Full).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.amount_cents, 39950);
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn pay_twice_is_rejected() {
        let f = fixture();
        let order = create_order(&f, None);
        f.lifecycle.pay(order.id, Actor::system()).unwrap();

        assert!(matches!(
            f.lifecycle.pay(order.id, Actor::system()),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn skipping_to_delivered_is_rejected_and_leaves_status_unchanged() {
        let f = fixture();
        let order = create_order(&f, None);

        let result =
            f.lifecycle
                .transition(order.id, OrderStatus::Delivered, admin(), Default::default());

        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                from: OrderStatus::Submitted,
                to: OrderStatus::Delivered,
            })
        ));
        let reloaded = f.orders.get_order(order.id).unwrap();
        assert_eq!(reloaded.status, OrderStatus::Submitted);
    }

    #[test]
    fn paid_order_advances_to_production() {
        let f = fixture();
        let order = create_order(&f, None);
        f.lifecycle.pay(order.id, Actor::system()).unwrap();

        let outcome = f
            .lifecycle
            .transition(order.id, OrderStatus::InProduction, admin(), Default::default())
            .unwrap();

        match outcome {
            TransitionOutcome::Advanced(view) => {
                assert_eq!(view.status, OrderStatus::InProduction)
            }
            other => panic!("expected plain advance, got {:?}", other),
        }
    }

    #[test]
    fn shipping_with_unpaid_fee_charges_instead_of_advancing() {
        let f = fixture();
        let order = create_order(&f, Some(500));
        f.lifecycle.pay(order.id, Actor::system()).unwrap();
        f.lifecycle
            .transition(order.id, OrderStatus::InProduction, admin(), Default::default())
            .unwrap();

        let outcome = f
            .lifecycle
            .transition(order.id, OrderStatus::Shipping, admin(), Default::default())
            .unwrap();

        let (payment, checkout) = match outcome {
            TransitionOutcome::ShippingFeeDue {
                payment, checkout, ..
            } => (payment, checkout),
            other => panic!("expected shipping fee gate, got {:?}", other),
        };
        assert_eq!(payment.phase, PaymentPhase::ShippingFee);
        assert_eq!(payment.amount_cents, 500);
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(
            payment.stripe_checkout_session_id.as_deref(),
            Some(checkout.session_id.as_str())
        );

        // the order has not shipped yet
        let reloaded = f.orders.get_order(order.id).unwrap();
        assert_eq!(reloaded.status, OrderStatus::InProduction);
    }

    #[test]
    fn shipping_without_fee_advances_with_tracking() {
        let f = fixture();
        let order = create_order(&f, None);
        f.lifecycle.pay(order.id, Actor::system()).unwrap();
        f.lifecycle
            .transition(order.id, OrderStatus::InProduction, admin(), Default::default())
            .unwrap();

        let outcome = f
            .lifecycle
            .transition(
                order.id,
                OrderStatus::Shipping,
                admin(),
                TransitionOptions {
                    tracking_number: Some("1Z999AA10123456784".to_string()),
                    estimated_delivery: None,
                },
            )
            .unwrap();

        match outcome {
            TransitionOutcome::Advanced(view) => {
                assert_eq!(view.status, OrderStatus::Shipping);
                assert_eq!(
                    view.tracking_number.as_deref(),
                    Some("1Z999AA10123456784")
                );
            }
            other => panic!("expected plain advance, got {:?}", other),
        }
        // provider was never called
        assert!(f.provider.last_session_id().is_none());
    }

    #[test]
    fn delivery_records_actual_delivery_time() {
        let f = fixture();
        let order = create_order(&f, None);
        f.lifecycle.pay(order.id, Actor::system()).unwrap();
        f.lifecycle
            .transition(order.id, OrderStatus::InProduction, admin(), Default::default())
            .unwrap();
        f.lifecycle
            .transition(order.id, OrderStatus::Shipping, admin(), Default::default())
            .unwrap();

        let outcome = f
            .lifecycle
            .transition(order.id, OrderStatus::Delivered, admin(), Default::default())
            .unwrap();

        match outcome {
            TransitionOutcome::Advanced(view) => {
                assert_eq!(view.status, OrderStatus::Delivered);
                assert!(view.actual_delivery.is_some());
            }
            other => panic!("expected plain advance, got {:?}", other),
        }
    }

    #[test]
    fn every_transition_appends_a_timeline_event() {
        let f = fixture();
        let order = create_order(&f, None);
        f.lifecycle.pay(order.id, Actor::system()).unwrap();
        f.lifecycle
            .transition(order.id, OrderStatus::InProduction, admin(), Default::default())
            .unwrap();

        let events = f.store.events_for(order.id);
        let status_changes: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == "status_changed")
            .collect();
        assert_eq!(status_changes.len(), 2);
        assert_eq!(
            status_changes[1].event_data["from"].as_str(),
            Some("paid")
        );
        assert_eq!(
            status_changes[1].event_data["to"].as_str(),
            Some("in_production")
        );
    }
}
