use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{
    amount_to_cents, Customization, ListResult, NewOrderRecord, OrderFilter, OrderIdentity,
    OrderView, ShippingAddress, MINIMUM_ORDER_QUANTITY,
};
use crate::domain::payment::{NewPaymentRecord, PaymentPhase};
use crate::domain::ports::OrderRepository;
use crate::domain::production::{NewProductionUpdate, ProductionUpdate};
use crate::domain::timeline::{Actor, NewTimelineEvent, TimelineEvent, TimelineEventType};

/// Tolerance for a pricing-calculator-supplied total against the computed
/// `quantity * unit_price`.
const TOTAL_TOLERANCE: &str = "0.01";

#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    /// Pre-computed total from the pricing calculator, if the client sent
    /// one. Must match the computed total within $0.01.
    pub total_amount: Option<BigDecimal>,
    pub customization: Customization,
    pub shipping_address: Option<ShippingAddress>,
    pub shipping_fee_cents: Option<i64>,
    pub actor: Actor,
}

pub struct OrderService<R> {
    repo: R,
    currency: String,
}

impl<R: OrderRepository> OrderService<R> {
    pub fn new(repo: R, currency: String) -> Self {
        Self { repo, currency }
    }

    /// Validate and persist a new order with its initial ledger row and the
    /// creation audit entry, all in one transaction.
    pub fn create_order(&self, input: CreateOrderInput) -> Result<OrderView, DomainError> {
        let identity = validate_identity(&input)?;
        validate_quantities(&input)?;

        if input.unit_price <= BigDecimal::from(0) {
            return Err(DomainError::Validation(
                "Unit price must be positive".to_string(),
            ));
        }
        if let Some(fee) = input.shipping_fee_cents {
            if fee <= 0 {
                return Err(DomainError::Validation(
                    "Shipping fee must be positive when configured".to_string(),
                ));
            }
        }

        let computed_total = &input.unit_price * BigDecimal::from(input.quantity);
        let total_amount = match &input.total_amount {
            Some(supplied) => {
                let tolerance: BigDecimal = TOTAL_TOLERANCE.parse().expect("constant decimal");
                if (supplied - &computed_total).abs() > tolerance {
                    return Err(DomainError::Validation(format!(
                        "Supplied total {} does not match quantity * unit price ({})",
                        supplied, computed_total
                    )));
                }
                computed_total
            }
            None => computed_total,
        };

        let id = Uuid::new_v4();
        let order_number = generate_order_number(id);
        let total_cents = amount_to_cents(&total_amount)?;

        let record = NewOrderRecord {
            id,
            order_number: order_number.clone(),
            identity,
            product_name: input.product_name,
            product_category: input.product_category,
            quantity: input.quantity,
            unit_price: input.unit_price,
            total_amount: total_amount.clone(),
            customization: input.customization,
            shipping_address: input.shipping_address,
            shipping_fee_cents: input.shipping_fee_cents,
        };

        // Canonical full-payment model: one pending ledger row covering the
        // whole total. The shipping fee, if configured, is charged later on
        // the in_production -> shipping transition.
        let payments = vec![NewPaymentRecord {
            phase: PaymentPhase::Full,
            amount_cents: total_cents,
            currency: self.currency.clone(),
        }];

        let event = NewTimelineEvent {
            event_type: TimelineEventType::OrderCreated,
            description: format!("Order {} created", order_number),
            event_data: json!({
                "order_number": order_number,
                "quantity": record.quantity,
                "total_amount": total_amount.to_string(),
            }),
            actor: input.actor,
        };

        let order = self.repo.create(record, payments, event)?;
        log::info!(
            "Created order {} ({} units, total {})",
            order.order_number,
            order.quantity,
            order.total_amount
        );
        Ok(order)
    }

    pub fn get_order(&self, id: Uuid) -> Result<OrderView, DomainError> {
        self.repo.find_by_id(id)?.ok_or(DomainError::NotFound)
    }

    pub fn list_orders(
        &self,
        filter: OrderFilter,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, DomainError> {
        self.repo.list(filter, page, limit)
    }

    pub fn get_timeline(&self, order_id: Uuid) -> Result<Vec<TimelineEvent>, DomainError> {
        self.get_order(order_id)?;
        self.repo.timeline(order_id)
    }

    pub fn add_production_update(
        &self,
        order_id: Uuid,
        update: NewProductionUpdate,
        actor: Actor,
    ) -> Result<ProductionUpdate, DomainError> {
        let order = self.get_order(order_id)?;
        if update.stage.trim().is_empty() {
            return Err(DomainError::Validation(
                "Production stage must not be empty".to_string(),
            ));
        }
        let event = NewTimelineEvent {
            event_type: TimelineEventType::ProductionUpdateAdded,
            description: format!("Production update: {}", update.stage),
            event_data: json!({
                "stage": update.stage,
                "status": update.status,
                "visible_to_customer": update.visible_to_customer,
            }),
            actor,
        };
        self.repo.add_production_update(order.id, update, event)
    }

    pub fn production_updates(
        &self,
        order_id: Uuid,
        customer_view: bool,
    ) -> Result<Vec<ProductionUpdate>, DomainError> {
        self.get_order(order_id)?;
        self.repo.production_updates(order_id, customer_view)
    }
}

fn validate_identity(input: &CreateOrderInput) -> Result<OrderIdentity, DomainError> {
    match (input.user_id, input.guest_email.as_deref()) {
        (Some(_), Some(_)) => Err(DomainError::Validation(
            "Provide either a user id or a guest email, not both".to_string(),
        )),
        (None, None) => Err(DomainError::Validation(
            "An authenticated user or guest contact is required".to_string(),
        )),
        (Some(user_id), None) => Ok(OrderIdentity::Registered(user_id)),
        (None, Some(email)) => {
            if email.trim().is_empty() || !email.contains('@') {
                return Err(DomainError::Validation(format!(
                    "Invalid guest email '{}'",
                    email
                )));
            }
            Ok(OrderIdentity::Guest(email.trim().to_string()))
        }
    }
}

fn validate_quantities(input: &CreateOrderInput) -> Result<(), DomainError> {
    if input.quantity < MINIMUM_ORDER_QUANTITY {
        return Err(DomainError::Validation(format!(
            "Quantity {} is below the minimum order quantity of {}",
            input.quantity, MINIMUM_ORDER_QUANTITY
        )));
    }
    if input.customization.placements.is_empty() {
        return Err(DomainError::Validation(
            "At least one print placement is required".to_string(),
        ));
    }
    if input.customization.sizes.values().any(|q| *q < 0) {
        return Err(DomainError::Validation(
            "Size quantities must not be negative".to_string(),
        ));
    }
    let sized_units = input.customization.total_units();
    if sized_units != input.quantity as i64 {
        return Err(DomainError::Validation(format!(
            "Size quantities sum to {} but the order quantity is {}",
            sized_units, input.quantity
        )));
    }
    Ok(())
}

/// Human-readable order number: APO-YYYYMMDD-XXXXXX, suffix taken from the
/// order id so the two always correlate.
fn generate_order_number(id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: String = id
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase();
    format!("APO-{}-{}", date, suffix)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use super::*;
    use crate::application::testing::InMemoryStore;
    use crate::domain::order::{OrderStatus, PrintPlacement};
    use crate::domain::payment::PaymentStatus;
    use crate::domain::ports::PaymentRepository;
    use crate::domain::timeline::TriggerSource;

    fn service() -> (OrderService<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        (OrderService::new(store.clone(), "usd".to_string()), store)
    }

    fn base_input() -> CreateOrderInput {
        CreateOrderInput {
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
                    colors: vec!["black".to_string()],
                    artwork_url: None,
                }],
                sizes: BTreeMap::from([
                    ("S".to_string(), 10),
                    ("M".to_string(), 20),
                    ("L".to_string(), 15),
                    ("XL".to_string(), 5),
                ]),
            },
            shipping_address: None,
            shipping_fee_cents: None,
            actor: Actor {
                source: TriggerSource::Api,
                id: None,
            },
        }
    }

    #[test]
    fn creates_submitted_order_with_computed_total() {
        let (service, _store) = service();
        let order = service.create_order(base_input()).unwrap();

        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.total_amount, BigDecimal::from_str("399.50").unwrap());
        assert!(order.order_number.starts_with("APO-"));
    }

    #[test]
    fn initializes_full_payment_ledger_row() {
        let (service, store) = service();
        let order = service.create_order(base_input()).unwrap();

        let payments = store.list_for_order(order.id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].phase, PaymentPhase::Full);
        assert_eq!(payments[0].status, PaymentStatus::Pending);
        assert_eq!(payments[0].amount_cents, 39950);

        // ledger completeness: the pending ledger covers the full total
        let ledger_total: i64 = payments.iter().map(|p| p.amount_cents).sum();
        assert_eq!(ledger_total, amount_to_cents(&order.total_amount).unwrap());
    }

    #[test]
    fn appends_order_created_event() {
        let (service, store) = service();
        let order = service.create_order(base_input()).unwrap();

        let events = store.events_for(order.id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "order_created");
    }

    #[test]
    fn rejects_quantity_below_moq() {
        let (service, _store) = service();
        let mut input = base_input();
        input.quantity = 49;
        input.customization.sizes = BTreeMap::from([("M".to_string(), 49)]);

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_sizes_not_summing_to_quantity() {
        let (service, _store) = service();
        let mut input = base_input();
        input.customization.sizes = BTreeMap::from([("M".to_string(), 49)]);

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_missing_placements() {
        let (service, _store) = service();
        let mut input = base_input();
        input.customization.placements.clear();

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_missing_identity() {
        let (service, _store) = service();
        let mut input = base_input();
        input.guest_email = None;

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_both_identities() {
        let (service, _store) = service();
        let mut input = base_input();
        input.user_id = Some(Uuid::new_v4());

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn accepts_supplied_total_within_tolerance() {
        let (service, _store) = service();
        let mut input = base_input();
        input.total_amount = Some(BigDecimal::from_str("399.51").unwrap());

        let order = service.create_order(input).unwrap();
        // the computed total wins; the supplied one only has to agree
        assert_eq!(order.total_amount, BigDecimal::from_str("399.50").unwrap());
    }

    #[test]
    fn rejects_supplied_total_outside_tolerance() {
        let (service, _store) = service();
        let mut input = base_input();
        input.total_amount = Some(BigDecimal::from_str("400.00").unwrap());

        assert!(matches!(
            service.create_order(input),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn get_order_unknown_id_is_not_found() {
        let (service, _store) = service();
        assert!(matches!(
            service.get_order(Uuid::new_v4()),
            Err(DomainError::NotFound)
        ));
    }

    #[test]
    fn production_updates_filter_customer_view() {
        let (service, _store) = service();
        let order = service.create_order(base_input()).unwrap();
        let actor = Actor {
            source: TriggerSource::Admin,
            id: Some("ops@example.com".to_string()),
        };

        service
            .add_production_update(
                order.id,
                NewProductionUpdate {
                    stage: "printing".to_string(),
                    status: "in_progress".to_string(),
                    description: "First run on press".to_string(),
                    photos: vec![],
                    visible_to_customer: true,
                    created_by: "ops@example.com".to_string(),
                },
                actor.clone(),
            )
            .unwrap();
        service
            .add_production_update(
                order.id,
                NewProductionUpdate {
                    stage: "qc".to_string(),
                    status: "internal".to_string(),
                    description: "Ink mismatch on sample".to_string(),
                    photos: vec![],
                    visible_to_customer: false,
                    created_by: "ops@example.com".to_string(),
                },
                actor,
            )
            .unwrap();

        let all = service.production_updates(order.id, false).unwrap();
        let customer = service.production_updates(order.id, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(customer.len(), 1);
        assert_eq!(customer[0].stage, "printing");
    }
}
