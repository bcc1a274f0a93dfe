//! In-memory test doubles for the repository and provider ports. They mirror
//! the transactional semantics of the Diesel implementations (status CAS,
//! upsert by `(order, phase)`, no audit entry when nothing changed) so the
//! services can be exercised without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{ListResult, NewOrderRecord, OrderFilter, OrderStatus, OrderView};
use crate::domain::payment::{
    CheckoutRequest, CheckoutSession, HostedInvoice, NewPaymentRecord, PaymentPhase,
    PaymentStatus, PaymentView, ProviderPaymentState,
};
use crate::domain::ports::{
    CheckoutRecord, OrderRepository, PaymentProvider, PaymentRepository, ReconciliationApplied,
    ReconciliationOutcome, TransitionRecord,
};
use crate::domain::production::{NewProductionUpdate, ProductionUpdate};
use crate::domain::timeline::{NewTimelineEvent, TimelineEvent};

#[derive(Default)]
struct StoreInner {
    orders: HashMap<Uuid, OrderView>,
    payments: HashMap<(Uuid, PaymentPhase), PaymentView>,
    events: Vec<TimelineEvent>,
    production: Vec<ProductionUpdate>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, order_id: Uuid) -> Vec<TimelineEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect()
    }

    fn append_event(inner: &mut StoreInner, order_id: Uuid, event: NewTimelineEvent) {
        inner.events.push(TimelineEvent {
            id: Uuid::new_v4(),
            order_id,
            event_type: event.event_type.as_str().to_string(),
            description: event.description,
            event_data: event.event_data,
            trigger_source: event.actor.source,
            triggered_by: event.actor.id,
            created_at: Utc::now(),
        });
    }
}

impl OrderRepository for InMemoryStore {
    fn create(
        &self,
        order: NewOrderRecord,
        payments: Vec<NewPaymentRecord>,
        event: NewTimelineEvent,
    ) -> Result<OrderView, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let view = OrderView {
            id: order.id,
            order_number: order.order_number,
            identity: order.identity,
            product_name: order.product_name,
            product_category: order.product_category,
            quantity: order.quantity,
            unit_price: order.unit_price,
            total_amount: order.total_amount,
            customization: order.customization,
            status: OrderStatus::Submitted,
            total_paid_amount: None,
            paid_at: None,
            shipping_address: order.shipping_address,
            tracking_number: None,
            estimated_delivery: None,
            actual_delivery: None,
            shipping_fee_cents: order.shipping_fee_cents,
            shipping_paid_at: None,
            created_at: now,
            updated_at: now,
        };
        for payment in payments {
            inner.payments.insert(
                (view.id, payment.phase),
                PaymentView {
                    id: Uuid::new_v4(),
                    order_id: view.id,
                    phase: payment.phase,
                    amount_cents: payment.amount_cents,
                    currency: payment.currency,
                    status: PaymentStatus::Pending,
                    paid_at: None,
                    stripe_payment_intent_id: None,
                    stripe_checkout_session_id: None,
                    stripe_charge_id: None,
                    metadata: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Self::append_event(&mut inner, view.id, event);
        inner.orders.insert(view.id, view.clone());
        Ok(view)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        Ok(self.inner.lock().unwrap().orders.get(&id).cloned())
    }

    fn list(
        &self,
        filter: OrderFilter,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, DomainError> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<OrderView> = inner
            .orders
            .values()
            .filter(|o| match &filter.user_id {
                Some(uid) => o.identity.user_id() == Some(*uid),
                None => true,
            })
            .filter(|o| match &filter.guest_email {
                Some(email) => o.identity.guest_email() == Some(email.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as i64;
        let offset = ((page - 1) * limit).max(0) as usize;
        let items = items
            .into_iter()
            .skip(offset)
            .take(limit.max(0) as usize)
            .collect();
        Ok(ListResult { items, total })
    }

    fn transition(&self, record: TransitionRecord) -> Result<OrderView, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(&record.order_id)
            .ok_or(DomainError::NotFound)?;
        if order.status != record.from {
            return Err(DomainError::Conflict(format!(
                "Expected status {}, found {}",
                record.from, order.status
            )));
        }
        order.status = record.to;
        order.updated_at = Utc::now();
        let patch = record.patch;
        if let Some(v) = patch.total_paid_amount {
            order.total_paid_amount = Some(v);
        }
        if let Some(v) = patch.paid_at {
            order.paid_at = Some(v);
        }
        if let Some(v) = patch.tracking_number {
            order.tracking_number = Some(v);
        }
        if let Some(v) = patch.estimated_delivery {
            order.estimated_delivery = Some(v);
        }
        if let Some(v) = patch.actual_delivery {
            order.actual_delivery = Some(v);
        }
        if let Some(v) = patch.shipping_paid_at {
            order.shipping_paid_at = Some(v);
        }
        let view = order.clone();
        if let Some(mark) = record.settle_payment {
            let now = Utc::now();
            let entry = inner
                .payments
                .entry((record.order_id, mark.phase))
                .or_insert_with(|| PaymentView {
                    id: Uuid::new_v4(),
                    order_id: record.order_id,
                    phase: mark.phase,
                    amount_cents: mark.amount_cents,
                    currency: mark.currency.clone(),
                    status: PaymentStatus::Pending,
                    paid_at: None,
                    stripe_payment_intent_id: None,
                    stripe_checkout_session_id: None,
                    stripe_charge_id: None,
                    metadata: None,
                    created_at: now,
                    updated_at: now,
                });
            entry.status = mark.status;
            entry.paid_at = mark.paid_at;
            entry.updated_at = now;
        }
        Self::append_event(&mut inner, record.order_id, record.event);
        Ok(view)
    }

    fn timeline(&self, order_id: Uuid) -> Result<Vec<TimelineEvent>, DomainError> {
        let mut events = self.events_for(order_id);
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    fn add_production_update(
        &self,
        order_id: Uuid,
        update: NewProductionUpdate,
        event: NewTimelineEvent,
    ) -> Result<ProductionUpdate, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let row = ProductionUpdate {
            id: Uuid::new_v4(),
            order_id,
            stage: update.stage,
            status: update.status,
            description: update.description,
            photos: update.photos,
            visible_to_customer: update.visible_to_customer,
            created_by: update.created_by,
            created_at: Utc::now(),
        };
        inner.production.push(row.clone());
        Self::append_event(&mut inner, order_id, event);
        Ok(row)
    }

    fn production_updates(
        &self,
        order_id: Uuid,
        customer_view: bool,
    ) -> Result<Vec<ProductionUpdate>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .production
            .iter()
            .filter(|u| u.order_id == order_id)
            .filter(|u| !customer_view || u.visible_to_customer)
            .cloned()
            .collect())
    }
}

impl PaymentRepository for InMemoryStore {
    fn list_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentView>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    fn find(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
    ) -> Result<Option<PaymentView>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.payments.get(&(order_id, phase)).cloned())
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentView>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .find(|p| p.stripe_checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    fn find_by_intent(&self, intent_id: &str) -> Result<Option<PaymentView>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .find(|p| p.stripe_payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    fn record_checkout(&self, record: CheckoutRecord) -> Result<PaymentView, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let entry = inner
            .payments
            .entry((record.order_id, record.phase))
            .or_insert_with(|| PaymentView {
                id: Uuid::new_v4(),
                order_id: record.order_id,
                phase: record.phase,
                amount_cents: record.amount_cents,
                currency: record.currency.clone(),
                status: PaymentStatus::Pending,
                paid_at: None,
                stripe_payment_intent_id: None,
                stripe_checkout_session_id: None,
                stripe_charge_id: None,
                metadata: None,
                created_at: now,
                updated_at: now,
            });
        if entry.status == PaymentStatus::Succeeded {
            return Err(DomainError::Conflict(format!(
                "Payment phase {} is already settled",
                record.phase
            )));
        }
        entry.status = PaymentStatus::Processing;
        entry.amount_cents = record.amount_cents;
        entry.stripe_checkout_session_id = record.checkout_session_id;
        if record.payment_intent_id.is_some() {
            entry.stripe_payment_intent_id = record.payment_intent_id;
        }
        entry.metadata = record.metadata;
        entry.updated_at = now;
        let view = entry.clone();
        Self::append_event(&mut inner, record.order_id, record.event);
        Ok(view)
    }

    fn apply_outcome(
        &self,
        outcome: ReconciliationOutcome,
    ) -> Result<ReconciliationApplied, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let key = (outcome.order_id, outcome.phase);
        if !inner.payments.contains_key(&key) {
            let amount = outcome.amount_cents.ok_or_else(|| {
                DomainError::Reconciliation(format!(
                    "No ledger row for order {} phase {} and no provider amount",
                    outcome.order_id, outcome.phase
                ))
            })?;
            inner.payments.insert(
                key,
                PaymentView {
                    id: Uuid::new_v4(),
                    order_id: outcome.order_id,
                    phase: outcome.phase,
                    amount_cents: amount,
                    currency: outcome.currency.clone().unwrap_or_else(|| "usd".to_string()),
                    status: PaymentStatus::Pending,
                    paid_at: None,
                    stripe_payment_intent_id: None,
                    stripe_checkout_session_id: None,
                    stripe_charge_id: None,
                    metadata: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        let payment = inner.payments.get_mut(&key).expect("row just ensured");
        let payment_changed = payment.status.can_become(outcome.payment_status);
        if payment_changed {
            payment.status = outcome.payment_status;
            if outcome.paid_at.is_some() {
                payment.paid_at = outcome.paid_at;
            }
            if outcome.payment_intent_id.is_some() {
                payment.stripe_payment_intent_id = outcome.payment_intent_id.clone();
            }
            if outcome.charge_id.is_some() {
                payment.stripe_charge_id = outcome.charge_id.clone();
            }
            if outcome.checkout_session_id.is_some() {
                payment.stripe_checkout_session_id = outcome.checkout_session_id.clone();
            }
            payment.updated_at = now;
        }
        let payment_view = payment.clone();

        let mut order_advanced = false;
        let mut order_status = None;
        if outcome.payment_status == PaymentStatus::Succeeded {
            if let Some((from, to)) = outcome.order_transition {
                if let Some(order) = inner.orders.get_mut(&outcome.order_id) {
                    if order.status == from {
                        order.status = to;
                        let patch = outcome.order_patch.clone();
                        if let Some(v) = patch.total_paid_amount {
                            order.total_paid_amount = Some(v);
                        }
                        if let Some(v) = patch.paid_at {
                            order.paid_at = Some(v);
                        }
                        if let Some(v) = patch.shipping_paid_at {
                            order.shipping_paid_at = Some(v);
                        }
                        order.updated_at = now;
                        order_advanced = true;
                    }
                    order_status = Some(order.status);
                }
            }
        }
        let order_status = match order_status {
            Some(status) => status,
            None => inner
                .orders
                .get(&outcome.order_id)
                .map(|o| o.status)
                .ok_or(DomainError::NotFound)?,
        };

        if payment_changed || order_advanced {
            Self::append_event(&mut inner, outcome.order_id, outcome.event);
        }

        Ok(ReconciliationApplied {
            payment: payment_view,
            payment_changed,
            order_advanced,
            order_status,
        })
    }
}

// ── Stub payment provider ────────────────────────────────────────────────────

#[derive(Default)]
struct StubProviderInner {
    next: u32,
    sessions: HashMap<String, ProviderPaymentState>,
}

/// Scriptable provider double. Sessions start `processing`; tests flip them
/// with [`StubProvider::complete_session`] / [`StubProvider::fail_session`].
#[derive(Clone, Default)]
pub struct StubProvider {
    inner: Arc<Mutex<StubProviderInner>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete_session(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.sessions.get_mut(session_id) {
            state.status = PaymentStatus::Succeeded;
            state.charge_id = Some(format!("ch_stub_{}", session_id));
        }
    }

    pub fn fail_session(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.sessions.get_mut(session_id) {
            state.status = PaymentStatus::Failed;
        }
    }

    pub fn last_session_id(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        (inner.next > 0).then(|| format!("cs_stub_{}", inner.next))
    }
}

impl PaymentProvider for StubProvider {
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next += 1;
        let session_id = format!("cs_stub_{}", inner.next);
        let intent_id = format!("pi_stub_{}", inner.next);
        inner.sessions.insert(
            session_id.clone(),
            ProviderPaymentState {
                status: PaymentStatus::Processing,
                checkout_session_id: Some(session_id.clone()),
                payment_intent_id: Some(intent_id.clone()),
                charge_id: None,
                order_id: Some(request.order_id),
                phase: Some(request.phase),
                amount_cents: Some(request.amount_cents),
                currency: Some(request.currency.clone()),
            },
        );
        Ok(CheckoutSession {
            session_id: session_id.clone(),
            url: format!("https://checkout.stripe.test/pay/{}", session_id),
            payment_intent_id: Some(intent_id),
        })
    }

    fn create_invoice(&self, request: &CheckoutRequest) -> Result<HostedInvoice, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next += 1;
        let invoice_id = format!("in_stub_{}", inner.next);
        let _ = request;
        Ok(HostedInvoice {
            invoice_id: invoice_id.clone(),
            hosted_invoice_url: format!("https://invoice.stripe.test/{}", invoice_id),
        })
    }

    fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderPaymentState, DomainError> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| DomainError::Provider(format!("Unknown session '{}'", session_id)))
    }

    fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<ProviderPaymentState, DomainError> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .find(|s| s.payment_intent_id.as_deref() == Some(intent_id))
            .cloned()
            .ok_or_else(|| DomainError::Provider(format!("Unknown intent '{}'", intent_id)))
    }
}
