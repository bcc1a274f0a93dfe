use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;
use super::order::{amount_to_cents, OrderStatus, OrderView};

/// Named portion of an order's payment obligation. The canonical model is a
/// single `full` payment plus an optional itemized `shipping_fee`; `deposit`
/// and `balance` survive as ledger-only phases for the legacy 40/60 split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentPhase {
    Deposit,
    Balance,
    Full,
    ShippingFee,
}

impl PaymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPhase::Deposit => "deposit",
            PaymentPhase::Balance => "balance",
            PaymentPhase::Full => "full",
            PaymentPhase::ShippingFee => "shipping_fee",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "deposit" => Ok(PaymentPhase::Deposit),
            "balance" => Ok(PaymentPhase::Balance),
            "full" | "full_payment" => Ok(PaymentPhase::Full),
            "shipping_fee" => Ok(PaymentPhase::ShippingFee),
            other => Err(DomainError::Validation(format!(
                "Unknown payment phase '{}'",
                other
            ))),
        }
    }

    /// The order transition a successful payment of this phase settles.
    /// Deposit/balance are ledger-only and never move the order.
    pub fn settles_transition(&self) -> Option<(OrderStatus, OrderStatus)> {
        match self {
            PaymentPhase::Full => Some((OrderStatus::Submitted, OrderStatus::Paid)),
            PaymentPhase::ShippingFee => {
                Some((OrderStatus::InProduction, OrderStatus::Shipping))
            }
            PaymentPhase::Deposit | PaymentPhase::Balance => None,
        }
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger payment status. Mirrors the provider's payment-intent states plus
/// the local `pending` (row created, no provider attempt yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    RequiresPaymentMethod,
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "requires_payment_method" => Ok(PaymentStatus::RequiresPaymentMethod),
            "requires_action" => Ok(PaymentStatus::RequiresAction),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            "refunded" => Ok(PaymentStatus::Refunded),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            other => Err(DomainError::Internal(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }

    /// Forward-only status rule. `succeeded` is terminal except for
    /// provider-driven refunds; a failed or canceled attempt may be retried
    /// (the `(order, phase)` row is reused for the new attempt).
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        if *self == next {
            return false;
        }
        match self {
            Pending => !matches!(next, Refunded | PartiallyRefunded),
            RequiresPaymentMethod | RequiresAction | Processing => matches!(
                next,
                RequiresPaymentMethod
                    | RequiresAction
                    | Processing
                    | Succeeded
                    | Failed
                    | Canceled
            ),
            // A new attempt reuses the row; the provider may also report the
            // retry's success before we observe its processing state.
            Failed | Canceled => matches!(
                next,
                RequiresPaymentMethod | RequiresAction | Processing | Succeeded
            ),
            Succeeded => matches!(next, Refunded | PartiallyRefunded),
            Refunded | PartiallyRefunded => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PaymentView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Initial ledger row created together with the order.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub currency: String,
}

/// Compute the amount owed for a phase, in cents. Deposit and balance split
/// the total 40/60 and always sum exactly to the total; the shipping fee is
/// whatever is configured on the order.
pub fn phase_amount_cents(order: &OrderView, phase: PaymentPhase) -> Result<i64, DomainError> {
    let total_cents = amount_to_cents(&order.total_amount)?;
    match phase {
        PaymentPhase::Full => Ok(total_cents),
        PaymentPhase::Deposit => Ok((total_cents * 40 + 50) / 100),
        PaymentPhase::Balance => Ok(total_cents - (total_cents * 40 + 50) / 100),
        PaymentPhase::ShippingFee => order.shipping_fee_cents.filter(|c| *c > 0).ok_or_else(|| {
            DomainError::Validation("No shipping fee configured for this order".to_string())
        }),
    }
}

// ── Provider-facing value objects ────────────────────────────────────────────

/// What we ask the provider to collect.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    pub customer_email: Option<String>,
}

/// Provider-hosted checkout page reference.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
    pub payment_intent_id: Option<String>,
}

/// Provider-hosted invoice reference (alternate collection path).
#[derive(Debug, Clone)]
pub struct HostedInvoice {
    pub invoice_id: String,
    pub hosted_invoice_url: String,
}

/// Authoritative payment state read back from the provider, with whatever
/// correlation the provider carried in metadata.
#[derive(Debug, Clone)]
pub struct ProviderPaymentState {
    pub status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub phase: Option<PaymentPhase>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::domain::order::{Customization, OrderIdentity, PrintPlacement};

    fn order_with_total(total: &str, shipping_fee_cents: Option<i64>) -> OrderView {
        let now = Utc::now();
        OrderView {
            id: Uuid::new_v4(),
            order_number: "APO-20260712-TEST01".to_string(),
            identity: OrderIdentity::Registered(Uuid::new_v4()),
            product_name: "Hoodie".to_string(),
            product_category: "hoodies".to_string(),
            quantity: 50,
            unit_price: BigDecimal::from_str("7.99").unwrap(),
            total_amount: BigDecimal::from_str(total).unwrap(),
            customization: Customization {
                placements: vec![PrintPlacement {
                    location: "back".to_string(),
                    method: "embroidery".to_string(),
                    colors: vec![],
                    artwork_url: None,
                }],
                sizes: BTreeMap::from([("L".to_string(), 50)]),
            },
            status: OrderStatus::Submitted,
            total_paid_amount: None,
            paid_at: None,
            shipping_address: None,
            tracking_number: None,
            estimated_delivery: None,
            actual_delivery: None,
            shipping_fee_cents,
            shipping_paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn full_phase_charges_the_entire_total() {
        let order = order_with_total("399.50", None);
        assert_eq!(phase_amount_cents(&order, PaymentPhase::Full).unwrap(), 39950);
    }

    #[test]
    fn deposit_and_balance_sum_to_total() {
        // 40% of 39950 = 15980, balance 23970
        let order = order_with_total("399.50", None);
        let deposit = phase_amount_cents(&order, PaymentPhase::Deposit).unwrap();
        let balance = phase_amount_cents(&order, PaymentPhase::Balance).unwrap();
        assert_eq!(deposit, 15980);
        assert_eq!(balance, 23970);
        assert_eq!(deposit + balance, 39950);
    }

    #[test]
    fn deposit_and_balance_sum_to_total_with_odd_cents() {
        // 40% of 10001 = 4000.4, rounds to 4000; balance absorbs the remainder
        let order = order_with_total("100.01", None);
        let deposit = phase_amount_cents(&order, PaymentPhase::Deposit).unwrap();
        let balance = phase_amount_cents(&order, PaymentPhase::Balance).unwrap();
        assert_eq!(deposit + balance, 10001);
    }

    #[test]
    fn shipping_fee_requires_configuration() {
        let order = order_with_total("399.50", None);
        assert!(matches!(
            phase_amount_cents(&order, PaymentPhase::ShippingFee),
            Err(DomainError::Validation(_))
        ));

        let order = order_with_total("399.50", Some(500));
        assert_eq!(
            phase_amount_cents(&order, PaymentPhase::ShippingFee).unwrap(),
            500
        );
    }

    #[test]
    fn phase_round_trips_through_strings() {
        for phase in [
            PaymentPhase::Deposit,
            PaymentPhase::Balance,
            PaymentPhase::Full,
            PaymentPhase::ShippingFee,
        ] {
            assert_eq!(PaymentPhase::parse(phase.as_str()).unwrap(), phase);
        }
    }

    #[test]
    fn legacy_full_payment_alias_parses() {
        assert_eq!(
            PaymentPhase::parse("full_payment").unwrap(),
            PaymentPhase::Full
        );
    }

    #[test]
    fn full_and_shipping_fee_settle_order_transitions() {
        assert_eq!(
            PaymentPhase::Full.settles_transition(),
            Some((OrderStatus::Submitted, OrderStatus::Paid))
        );
        assert_eq!(
            PaymentPhase::ShippingFee.settles_transition(),
            Some((OrderStatus::InProduction, OrderStatus::Shipping))
        );
        assert_eq!(PaymentPhase::Deposit.settles_transition(), None);
        assert_eq!(PaymentPhase::Balance.settles_transition(), None);
    }

    #[test]
    fn succeeded_is_terminal_except_refunds() {
        let succeeded = PaymentStatus::Succeeded;
        assert!(!succeeded.can_become(PaymentStatus::Processing));
        assert!(!succeeded.can_become(PaymentStatus::Failed));
        assert!(!succeeded.can_become(PaymentStatus::Pending));
        assert!(succeeded.can_become(PaymentStatus::Refunded));
        assert!(succeeded.can_become(PaymentStatus::PartiallyRefunded));
    }

    #[test]
    fn failed_attempt_can_be_retried() {
        assert!(PaymentStatus::Failed.can_become(PaymentStatus::Processing));
        assert!(PaymentStatus::Canceled.can_become(PaymentStatus::Processing));
        assert!(PaymentStatus::Failed.can_become(PaymentStatus::Succeeded));
        assert!(!PaymentStatus::Failed.can_become(PaymentStatus::Pending));
    }

    #[test]
    fn same_status_is_not_a_transition() {
        assert!(!PaymentStatus::Succeeded.can_become(PaymentStatus::Succeeded));
        assert!(!PaymentStatus::Processing.can_become(PaymentStatus::Processing));
    }
}
