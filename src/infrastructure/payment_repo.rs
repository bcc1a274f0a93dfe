use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::order::OrderStatus;
use crate::domain::payment::{PaymentPhase, PaymentStatus, PaymentView};
use crate::domain::ports::{
    CheckoutRecord, PaymentRepository, ReconciliationApplied, ReconciliationOutcome,
};
use crate::schema::{order_timeline_events, orders, payments};

use super::models::{NewPaymentRow, PaymentRow};
use super::order_repo::timeline_event_row;

#[derive(Clone)]
pub struct DieselPaymentRepository {
    pool: DbPool,
}

impl DieselPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn load_payment(
    conn: &mut PgConnection,
    order_id: Uuid,
    phase: PaymentPhase,
) -> Result<Option<PaymentRow>, DomainError> {
    Ok(payments::table
        .filter(payments::order_id.eq(order_id))
        .filter(payments::phase.eq(phase.as_str()))
        .select(PaymentRow::as_select())
        .first(conn)
        .optional()?)
}

impl PaymentRepository for DieselPaymentRepository {
    fn list_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentView>, DomainError> {
        let mut conn = self.pool.get()?;

        let rows: Vec<PaymentRow> = payments::table
            .filter(payments::order_id.eq(order_id))
            .select(PaymentRow::as_select())
            .order(payments::created_at.asc())
            .load(&mut conn)?;

        rows.into_iter().map(PaymentRow::into_view).collect()
    }

    fn find(
        &self,
        order_id: Uuid,
        phase: PaymentPhase,
    ) -> Result<Option<PaymentView>, DomainError> {
        let mut conn = self.pool.get()?;
        load_payment(&mut conn, order_id, phase)?
            .map(PaymentRow::into_view)
            .transpose()
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentView>, DomainError> {
        let mut conn = self.pool.get()?;

        let row = payments::table
            .filter(payments::stripe_checkout_session_id.eq(session_id))
            .select(PaymentRow::as_select())
            .first(&mut conn)
            .optional()?;

        row.map(PaymentRow::into_view).transpose()
    }

    fn find_by_intent(&self, intent_id: &str) -> Result<Option<PaymentView>, DomainError> {
        let mut conn = self.pool.get()?;

        let row = payments::table
            .filter(payments::stripe_payment_intent_id.eq(intent_id))
            .select(PaymentRow::as_select())
            .first(&mut conn)
            .optional()?;

        row.map(PaymentRow::into_view).transpose()
    }

    fn record_checkout(&self, record: CheckoutRecord) -> Result<PaymentView, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let existing = load_payment(conn, record.order_id, record.phase)?;

            let row: PaymentRow = match existing {
                Some(row) => {
                    if PaymentStatus::parse(&row.status)? == PaymentStatus::Succeeded {
                        return Err(DomainError::Conflict(format!(
                            "Payment phase {} is already settled",
                            record.phase
                        )));
                    }
                    diesel::update(payments::table.filter(payments::id.eq(row.id)))
                        .set((
                            payments::status.eq(PaymentStatus::Processing.as_str()),
                            payments::amount_cents.eq(record.amount_cents),
                            payments::stripe_checkout_session_id
                                .eq(record.checkout_session_id.clone()),
                            record
                                .payment_intent_id
                                .clone()
                                .map(|v| payments::stripe_payment_intent_id.eq(v)),
                            record.metadata.clone().map(|v| payments::metadata.eq(v)),
                        ))
                        .returning(PaymentRow::as_returning())
                        .get_result(conn)?
                }
                None => diesel::insert_into(payments::table)
                    .values(&NewPaymentRow {
                        id: Uuid::new_v4(),
                        order_id: record.order_id,
                        phase: record.phase.as_str().to_string(),
                        amount_cents: record.amount_cents,
                        currency: record.currency.clone(),
                        status: PaymentStatus::Processing.as_str().to_string(),
                        paid_at: None,
                        stripe_payment_intent_id: record.payment_intent_id.clone(),
                        stripe_checkout_session_id: record.checkout_session_id.clone(),
                        stripe_charge_id: None,
                        metadata: record.metadata.clone(),
                    })
                    .returning(PaymentRow::as_returning())
                    .get_result(conn)?,
            };

            diesel::insert_into(order_timeline_events::table)
                .values(&timeline_event_row(record.order_id, record.event))
                .execute(conn)?;

            row.into_view()
        })
    }

    fn apply_outcome(
        &self,
        outcome: ReconciliationOutcome,
    ) -> Result<ReconciliationApplied, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let existing = load_payment(conn, outcome.order_id, outcome.phase)?;

            // A missing row means the provider knows about a charge we never
            // recorded; accept it only if the provider reported an amount.
            let row = match existing {
                Some(row) => row,
                None => {
                    let amount = outcome.amount_cents.ok_or_else(|| {
                        DomainError::Reconciliation(format!(
                            "No ledger row for order {} phase {} and no provider amount",
                            outcome.order_id, outcome.phase
                        ))
                    })?;
                    diesel::insert_into(payments::table)
                        .values(&NewPaymentRow {
                            id: Uuid::new_v4(),
                            order_id: outcome.order_id,
                            phase: outcome.phase.as_str().to_string(),
                            amount_cents: amount,
                            currency: outcome
                                .currency
                                .clone()
                                .unwrap_or_else(|| "usd".to_string()),
                            status: PaymentStatus::Pending.as_str().to_string(),
                            paid_at: None,
                            stripe_payment_intent_id: None,
                            stripe_checkout_session_id: None,
                            stripe_charge_id: None,
                            metadata: None,
                        })
                        .returning(PaymentRow::as_returning())
                        .get_result(conn)?
                }
            };

            let current = PaymentStatus::parse(&row.status)?;
            let payment_changed = current.can_become(outcome.payment_status);
            let row: PaymentRow = if payment_changed {
                diesel::update(payments::table.filter(payments::id.eq(row.id)))
                    .set((
                        payments::status.eq(outcome.payment_status.as_str()),
                        outcome.paid_at.map(|v| payments::paid_at.eq(v)),
                        outcome
                            .payment_intent_id
                            .clone()
                            .map(|v| payments::stripe_payment_intent_id.eq(v)),
                        outcome
                            .charge_id
                            .clone()
                            .map(|v| payments::stripe_charge_id.eq(v)),
                        outcome
                            .checkout_session_id
                            .clone()
                            .map(|v| payments::stripe_checkout_session_id.eq(v)),
                    ))
                    .returning(PaymentRow::as_returning())
                    .get_result(conn)?
            } else {
                row
            };

            // Advance the order on success even when the ledger row was
            // already settled: a crash after the payment update but before
            // the order update heals on the next reconciliation.
            let mut order_advanced = false;
            if outcome.payment_status == PaymentStatus::Succeeded {
                if let Some((from, to)) = outcome.order_transition {
                    let patch = outcome.order_patch.clone();
                    let n = diesel::update(
                        orders::table
                            .filter(orders::id.eq(outcome.order_id))
                            .filter(orders::status.eq(from.as_str())),
                    )
                    .set((
                        orders::status.eq(to.as_str()),
                        patch
                            .total_paid_amount
                            .map(|v| orders::total_paid_amount.eq(v)),
                        patch.paid_at.map(|v| orders::paid_at.eq(v)),
                        patch.shipping_paid_at.map(|v| orders::shipping_paid_at.eq(v)),
                    ))
                    .execute(conn)?;
                    order_advanced = n > 0;
                }
            }

            let order_status: String = orders::table
                .filter(orders::id.eq(outcome.order_id))
                .select(orders::status)
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound)?;

            if payment_changed || order_advanced {
                diesel::insert_into(order_timeline_events::table)
                    .values(&timeline_event_row(outcome.order_id, outcome.event))
                    .execute(conn)?;
            }

            Ok(ReconciliationApplied {
                payment: row.into_view()?,
                payment_changed,
                order_advanced,
                order_status: OrderStatus::parse(&order_status)?,
            })
        })
    }
}
