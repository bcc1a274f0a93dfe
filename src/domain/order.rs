use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Minimum order quantity for any B2B apparel order.
pub const MINIMUM_ORDER_QUANTITY: i32 = 50;

/// Order lifecycle states. Transitions only move forward along the chain
/// `submitted -> paid -> in_production -> shipping -> delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Submitted,
    Paid,
    InProduction,
    Shipping,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::Paid => "paid",
            OrderStatus::InProduction => "in_production",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "submitted" => Ok(OrderStatus::Submitted),
            "paid" => Ok(OrderStatus::Paid),
            "in_production" => Ok(OrderStatus::InProduction),
            "shipping" => Ok(OrderStatus::Shipping),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(DomainError::Internal(format!(
                "Unknown order status '{}'",
                other
            ))),
        }
    }

    /// The single direct successor in the lifecycle chain, if any.
    pub fn successor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Submitted => Some(OrderStatus::Paid),
            OrderStatus::Paid => Some(OrderStatus::InProduction),
            OrderStatus::InProduction => Some(OrderStatus::Shipping),
            OrderStatus::Shipping => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }

    /// A transition is legal only along a direct edge of the chain.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.successor() == Some(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.successor().is_none()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns the order: a registered user or a guest checkout contact.
/// Exactly one of the two is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderIdentity {
    Registered(Uuid),
    Guest(String),
}

impl OrderIdentity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            OrderIdentity::Registered(id) => Some(*id),
            OrderIdentity::Guest(_) => None,
        }
    }

    pub fn guest_email(&self) -> Option<&str> {
        match self {
            OrderIdentity::Registered(_) => None,
            OrderIdentity::Guest(email) => Some(email.as_str()),
        }
    }
}

/// A single print placement on the garment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintPlacement {
    pub location: String,
    pub method: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// Customization snapshot captured at order time. `sizes` maps size labels
/// to per-size quantities; values must sum to the order quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    pub placements: Vec<PrintPlacement>,
    pub sizes: BTreeMap<String, i32>,
}

impl Customization {
    pub fn total_units(&self) -> i64 {
        self.sizes.values().map(|q| *q as i64).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub identity: OrderIdentity,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub customization: Customization,
    pub status: OrderStatus,
    pub total_paid_amount: Option<BigDecimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipping_address: Option<ShippingAddress>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub shipping_fee_cents: Option<i64>,
    pub shipping_paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn shipping_fee_unpaid(&self) -> Option<i64> {
        match (self.shipping_fee_cents, self.shipping_paid_at) {
            (Some(cents), None) if cents > 0 => Some(cents),
            _ => None,
        }
    }
}

/// Fully validated order record handed to the repository for persistence.
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub identity: OrderIdentity,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub customization: Customization,
    pub shipping_address: Option<ShippingAddress>,
    pub shipping_fee_cents: Option<i64>,
}

/// Optional column updates applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub total_paid_amount: Option<BigDecimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub shipping_paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub items: Vec<OrderView>,
    pub total: i64,
}

/// Convert a decimal amount in major currency units to integer cents,
/// rounding half-up. Cents are the authoritative unit on the ledger.
pub fn amount_to_cents(amount: &BigDecimal) -> Result<i64, DomainError> {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| DomainError::Internal(format!("Amount out of range: {}", amount)))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Submitted,
            OrderStatus::Paid,
            OrderStatus::InProduction,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(OrderStatus::parse("quote_requested").is_err());
    }

    #[test]
    fn chain_allows_only_direct_successors() {
        let chain = [
            OrderStatus::Submitted,
            OrderStatus::Paid,
            OrderStatus::InProduction,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
        ];
        for (i, from) in chain.iter().enumerate() {
            for (j, to) in chain.iter().enumerate() {
                let allowed = from.can_transition_to(*to);
                assert_eq!(allowed, j == i + 1, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!OrderStatus::Submitted.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Submitted.can_transition_to(OrderStatus::InProduction));
    }

    #[test]
    fn backward_transitions_are_rejected() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Submitted));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipping));
    }

    #[test]
    fn delivered_is_terminal() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(!OrderStatus::Shipping.is_terminal());
    }

    #[test]
    fn amount_to_cents_rounds_half_up() {
        let amount = BigDecimal::from_str("399.50").unwrap();
        assert_eq!(amount_to_cents(&amount).unwrap(), 39950);

        let amount = BigDecimal::from_str("0.005").unwrap();
        assert_eq!(amount_to_cents(&amount).unwrap(), 1);
    }

    #[test]
    fn sizes_total_sums_all_entries() {
        let customization = Customization {
            placements: vec![],
            sizes: BTreeMap::from([
                ("S".to_string(), 10),
                ("M".to_string(), 20),
                ("L".to_string(), 15),
                ("XL".to_string(), 5),
            ]),
        };
        assert_eq!(customization.total_units(), 50);
    }

    #[test]
    fn shipping_fee_unpaid_only_when_configured_and_not_paid() {
        let mut order = sample_order();
        assert_eq!(order.shipping_fee_unpaid(), None);

        order.shipping_fee_cents = Some(500);
        assert_eq!(order.shipping_fee_unpaid(), Some(500));

        order.shipping_paid_at = Some(Utc::now());
        assert_eq!(order.shipping_fee_unpaid(), None);
    }

    fn sample_order() -> OrderView {
        let now = Utc::now();
        OrderView {
            id: Uuid::new_v4(),
            order_number: "APO-20260712-ABC123".to_string(),
            identity: OrderIdentity::Guest("buyer@example.com".to_string()),
            product_name: "Crewneck Tee".to_string(),
            product_category: "t-shirts".to_string(),
            quantity: 50,
            unit_price: BigDecimal::from_str("7.99").unwrap(),
            total_amount: BigDecimal::from_str("399.50").unwrap(),
            customization: Customization {
                placements: vec![PrintPlacement {
                    location: "front".to_string(),
                    method: "screen_print".to_string(),
                    colors: vec!["black".to_string()],
                    artwork_url: None,
                }],
                sizes: BTreeMap::from([("M".to_string(), 50)]),
            },
            status: OrderStatus::Submitted,
            total_paid_amount: None,
            paid_at: None,
            shipping_address: None,
            tracking_number: None,
            estimated_delivery: None,
            actual_delivery: None,
            shipping_fee_cents: None,
            shipping_paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
