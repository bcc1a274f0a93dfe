use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;
use super::order::{ListResult, NewOrderRecord, OrderFilter, OrderPatch, OrderStatus, OrderView};
use super::payment::{
    CheckoutRequest, CheckoutSession, HostedInvoice, NewPaymentRecord, PaymentPhase,
    PaymentStatus, PaymentView, ProviderPaymentState,
};
use super::production::{NewProductionUpdate, ProductionUpdate};
use super::timeline::{NewTimelineEvent, TimelineEvent};

/// Ledger mark applied together with an order transition (e.g. the customer
/// pay action settles the `full` payment in the same transaction).
#[derive(Debug, Clone)]
pub struct PaymentMark {
    pub phase: PaymentPhase,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub amount_cents: i64,
    pub currency: String,
}

/// A validated status transition ready to be written. The repository applies
/// it as a compare-and-swap on `status` (`UPDATE .. WHERE status = from`);
/// losing the race fails with [`DomainError::Conflict`].
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub patch: OrderPatch,
    pub settle_payment: Option<PaymentMark>,
    pub event: NewTimelineEvent,
}

/// Checkout/invoice attempt to record against the `(order, phase)` ledger
/// row. Upsert: repeated attempts reuse the row.
#[derive(Debug, Clone)]
pub struct CheckoutRecord {
    pub order_id: Uuid,
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub currency: String,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub metadata: Option<Value>,
    pub event: NewTimelineEvent,
}

/// Provider-authoritative result to converge the ledger (and, for phases
/// that settle an order transition, the order) onto.
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub order_id: Uuid,
    pub phase: PaymentPhase,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub order_transition: Option<(OrderStatus, OrderStatus)>,
    pub order_patch: OrderPatch,
    pub event: NewTimelineEvent,
}

/// What actually changed when an outcome was applied. Re-applying the same
/// outcome reports no change and appends nothing.
#[derive(Debug, Clone)]
pub struct ReconciliationApplied {
    pub payment: PaymentView,
    pub payment_changed: bool,
    pub order_advanced: bool,
    pub order_status: OrderStatus,
}

pub trait OrderRepository: Send + Sync + 'static {
    /// Persist the order, its initial ledger rows and the creation audit
    /// entry in a single transaction.
    fn create(
        &self,
        order: NewOrderRecord,
        payments: Vec<NewPaymentRecord>,
        event: NewTimelineEvent,
    ) -> Result<OrderView, DomainError>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError>;

    fn list(&self, filter: OrderFilter, page: i64, limit: i64)
        -> Result<ListResult, DomainError>;

    fn transition(&self, record: TransitionRecord) -> Result<OrderView, DomainError>;

    fn timeline(&self, order_id: Uuid) -> Result<Vec<TimelineEvent>, DomainError>;

    fn add_production_update(
        &self,
        order_id: Uuid,
        update: NewProductionUpdate,
        event: NewTimelineEvent,
    ) -> Result<ProductionUpdate, DomainError>;

    fn production_updates(
        &self,
        order_id: Uuid,
        customer_view: bool,
    ) -> Result<Vec<ProductionUpdate>, DomainError>;
}

pub trait PaymentRepository: Send + Sync + 'static {
    fn list_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentView>, DomainError>;

    fn find(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
    ) -> Result<Option<PaymentView>, DomainError>;

    fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentView>, DomainError>;

    fn find_by_intent(&self, intent_id: &str) -> Result<Option<PaymentView>, DomainError>;

    /// Upsert the `(order, phase)` row to `processing` with the provider
    /// reference and append the audit entry, in one transaction.
    fn record_checkout(&self, record: CheckoutRecord) -> Result<PaymentView, DomainError>;

    /// Converge ledger row and order onto the provider's state. Idempotent:
    /// an outcome that changes nothing appends no audit entry.
    fn apply_outcome(
        &self,
        outcome: ReconciliationOutcome,
    ) -> Result<ReconciliationApplied, DomainError>;
}

/// External payment provider (Stripe in production, a stub in tests).
pub trait PaymentProvider: Send + Sync + 'static {
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, DomainError>;

    fn create_invoice(&self, request: &CheckoutRequest) -> Result<HostedInvoice, DomainError>;

    fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderPaymentState, DomainError>;

    fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<ProviderPaymentState, DomainError>;
}

pub type SharedProvider = Arc<dyn PaymentProvider>;
