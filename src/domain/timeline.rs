use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;

/// What kind of actor triggered a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Manual,
    System,
    Webhook,
    Api,
    Admin,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::System => "system",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Api => "api",
            TriggerSource::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "system" => Ok(TriggerSource::System),
            "webhook" => Ok(TriggerSource::Webhook),
            "api" => Ok(TriggerSource::Api),
            "admin" => Ok(TriggerSource::Admin),
            other => Err(DomainError::Validation(format!(
                "Unknown trigger source '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting party recorded on every audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub source: TriggerSource,
    pub id: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Actor {
            source: TriggerSource::System,
            id: None,
        }
    }

    pub fn webhook() -> Self {
        Actor {
            source: TriggerSource::Webhook,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEventType {
    OrderCreated,
    StatusChanged,
    PaymentSucceeded,
    PaymentFailed,
    PaymentStatusChanged,
    CheckoutSessionCreated,
    InvoiceCreated,
    ProductionUpdateAdded,
}

impl TimelineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineEventType::OrderCreated => "order_created",
            TimelineEventType::StatusChanged => "status_changed",
            TimelineEventType::PaymentSucceeded => "payment_succeeded",
            TimelineEventType::PaymentFailed => "payment_failed",
            TimelineEventType::PaymentStatusChanged => "payment_status_changed",
            TimelineEventType::CheckoutSessionCreated => "checkout_session_created",
            TimelineEventType::InvoiceCreated => "invoice_created",
            TimelineEventType::ProductionUpdateAdded => "production_update_added",
        }
    }
}

/// Audit entry to append. Written in the same database transaction as the
/// state change it records.
#[derive(Debug, Clone)]
pub struct NewTimelineEvent {
    pub event_type: TimelineEventType,
    pub description: String,
    pub event_data: Value,
    pub actor: Actor,
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_type: String,
    pub description: String,
    pub event_data: Value,
    pub trigger_source: TriggerSource,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_source_round_trips() {
        for source in [
            TriggerSource::Manual,
            TriggerSource::System,
            TriggerSource::Webhook,
            TriggerSource::Api,
            TriggerSource::Admin,
        ] {
            assert_eq!(TriggerSource::parse(source.as_str()).unwrap(), source);
        }
    }

    #[test]
    fn unknown_trigger_source_is_rejected() {
        assert!(TriggerSource::parse("cron").is_err());
    }
}
