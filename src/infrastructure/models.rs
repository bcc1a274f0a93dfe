use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{Customization, OrderIdentity, OrderStatus, OrderView, ShippingAddress};
use crate::domain::payment::{PaymentPhase, PaymentStatus, PaymentView};
use crate::domain::production::ProductionUpdate;
use crate::domain::timeline::{TimelineEvent, TriggerSource};
use crate::schema::{order_timeline_events, orders, payments, production_updates};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub customization: Value,
    pub status: String,
    pub total_paid_amount: Option<BigDecimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipping_address: Option<Value>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub shipping_fee_cents: Option<i64>,
    pub shipping_paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_view(self) -> Result<OrderView, DomainError> {
        let identity = match (self.user_id, self.guest_email) {
            (Some(user_id), None) => OrderIdentity::Registered(user_id),
            (None, Some(email)) => OrderIdentity::Guest(email),
            _ => {
                return Err(DomainError::Internal(format!(
                    "Order {} violates the single-identity constraint",
                    self.id
                )))
            }
        };
        let customization: Customization = serde_json::from_value(self.customization)
            .map_err(|e| DomainError::Internal(format!("Bad customization payload: {}", e)))?;
        let shipping_address: Option<ShippingAddress> = self
            .shipping_address
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| DomainError::Internal(format!("Bad shipping address payload: {}", e)))?;
        Ok(OrderView {
            id: self.id,
            order_number: self.order_number,
            identity,
            product_name: self.product_name,
            product_category: self.product_category,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_amount: self.total_amount,
            customization,
            status: OrderStatus::parse(&self.status)?,
            total_paid_amount: self.total_paid_amount,
            paid_at: self.paid_at,
            shipping_address,
            tracking_number: self.tracking_number,
            estimated_delivery: self.estimated_delivery,
            actual_delivery: self.actual_delivery,
            shipping_fee_cents: self.shipping_fee_cents,
            shipping_paid_at: self.shipping_paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub customization: Value,
    pub status: String,
    pub shipping_address: Option<Value>,
    pub shipping_fee_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = payments)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub phase: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRow {
    pub fn into_view(self) -> Result<PaymentView, DomainError> {
        Ok(PaymentView {
            id: self.id,
            order_id: self.order_id,
            phase: PaymentPhase::parse(&self.phase)?,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status: PaymentStatus::parse(&self.status)?,
            paid_at: self.paid_at,
            stripe_payment_intent_id: self.stripe_payment_intent_id,
            stripe_checkout_session_id: self.stripe_checkout_session_id,
            stripe_charge_id: self.stripe_charge_id,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = payments)]
pub struct NewPaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub phase: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = order_timeline_events)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TimelineEventRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub description: String,
    pub event_data: Value,
    pub trigger_source: String,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimelineEventRow {
    pub fn into_view(self) -> Result<TimelineEvent, DomainError> {
        Ok(TimelineEvent {
            id: self.id,
            order_id: self.order_id,
            event_type: self.event_type,
            description: self.description,
            event_data: self.event_data,
            trigger_source: TriggerSource::parse(&self.trigger_source)?,
            triggered_by: self.triggered_by,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = order_timeline_events)]
pub struct NewTimelineEventRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub description: String,
    pub event_data: Value,
    pub trigger_source: String,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = production_updates)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductionUpdateRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage: String,
    pub status: String,
    pub description: String,
    pub photos: Value,
    pub visible_to_customer: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ProductionUpdateRow {
    pub fn into_view(self) -> Result<ProductionUpdate, DomainError> {
        let photos: Vec<String> = serde_json::from_value(self.photos)
            .map_err(|e| DomainError::Internal(format!("Bad photos payload: {}", e)))?;
        Ok(ProductionUpdate {
            id: self.id,
            order_id: self.order_id,
            stage: self.stage,
            status: self.status,
            description: self.description,
            photos,
            visible_to_customer: self.visible_to_customer,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = production_updates)]
pub struct NewProductionUpdateRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage: String,
    pub status: String,
    pub description: String,
    pub photos: Value,
    pub visible_to_customer: bool,
    pub created_by: String,
}
