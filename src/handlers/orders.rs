use std::collections::BTreeMap;
use std::str::FromStr;

use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::lifecycle::{TransitionOptions, TransitionOutcome};
use crate::application::order_service::CreateOrderInput;
use crate::domain::errors::DomainError;
use crate::domain::order::{
    Customization, OrderFilter, OrderStatus, OrderView, PrintPlacement, ShippingAddress,
};
use crate::domain::production::{NewProductionUpdate, ProductionUpdate};
use crate::domain::timeline::{Actor, TimelineEvent, TriggerSource};
use crate::errors::AppError;
use crate::AppState;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrintPlacementDto {
    pub location: String,
    pub method: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CustomizationDto {
    pub placements: Vec<PrintPlacementDto>,
    /// Size label to per-size quantity; values must sum to `quantity`.
    pub sizes: BTreeMap<String, i32>,
}

impl CustomizationDto {
    fn into_domain(self) -> Customization {
        Customization {
            placements: self
                .placements
                .into_iter()
                .map(|p| PrintPlacement {
                    location: p.location,
                    method: p.method,
                    colors: p.colors,
                    artwork_url: p.artwork_url,
                })
                .collect(),
            sizes: self.sizes,
        }
    }

    fn from_domain(customization: &Customization) -> Self {
        CustomizationDto {
            placements: customization
                .placements
                .iter()
                .map(|p| PrintPlacementDto {
                    location: p.location.clone(),
                    method: p.method.clone(),
                    colors: p.colors.clone(),
                    artwork_url: p.artwork_url.clone(),
                })
                .collect(),
            sizes: customization.sizes.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddressDto {
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

impl ShippingAddressDto {
    fn into_domain(self) -> ShippingAddress {
        ShippingAddress {
            recipient: self.recipient,
            line1: self.line1,
            line2: self.line2,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            country: self.country,
        }
    }

    fn from_domain(address: &ShippingAddress) -> Self {
        ShippingAddressDto {
            recipient: address.recipient.clone(),
            line1: address.line1.clone(),
            line2: address.line2.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone(),
            country: address.country.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    /// Registered owner. Exactly one of `user_id` / `guest_email` is required.
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    /// Decimal price as a string to avoid floating-point issues, e.g. "7.99"
    pub unit_price: String,
    /// Optional pricing-calculator total; must agree with the computed total.
    pub total_amount: Option<String>,
    pub customization: CustomizationDto,
    pub shipping_address: Option<ShippingAddressDto>,
    pub shipping_fee_cents: Option<i64>,
}

impl CreateOrderRequest {
    fn into_input(self, actor: Actor) -> Result<CreateOrderInput, DomainError> {
        let unit_price = parse_amount(&self.unit_price, "unit_price")?;
        let total_amount = self
            .total_amount
            .as_deref()
            .map(|v| parse_amount(v, "total_amount"))
            .transpose()?;
        Ok(CreateOrderInput {
            user_id: self.user_id,
            guest_email: self.guest_email,
            product_name: self.product_name,
            product_category: self.product_category,
            quantity: self.quantity,
            unit_price,
            total_amount,
            customization: self.customization.into_domain(),
            shipping_address: self.shipping_address.map(ShippingAddressDto::into_domain),
            shipping_fee_cents: self.shipping_fee_cents,
            actor,
        })
    }
}

fn parse_amount(value: &str, field: &str) -> Result<BigDecimal, DomainError> {
    BigDecimal::from_str(value)
        .map_err(|e| DomainError::Validation(format!("Invalid {} '{}': {}", field, value, e)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub product_name: String,
    pub product_category: String,
    pub quantity: i32,
    pub unit_price: String,
    pub total_amount: String,
    pub customization: CustomizationDto,
    pub status: String,
    pub total_paid_amount: Option<String>,
    pub paid_at: Option<String>,
    pub shipping_address: Option<ShippingAddressDto>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<String>,
    pub actual_delivery: Option<String>,
    pub shipping_fee_cents: Option<i64>,
    pub shipping_paid_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl OrderResponse {
    pub fn from_view(order: &OrderView) -> Self {
        OrderResponse {
            id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.identity.user_id(),
            guest_email: order.identity.guest_email().map(str::to_string),
            product_name: order.product_name.clone(),
            product_category: order.product_category.clone(),
            quantity: order.quantity,
            unit_price: order.unit_price.to_string(),
            total_amount: order.total_amount.to_string(),
            customization: CustomizationDto::from_domain(&order.customization),
            status: order.status.as_str().to_string(),
            total_paid_amount: order.total_paid_amount.as_ref().map(|v| v.to_string()),
            paid_at: order.paid_at.map(|t| t.to_rfc3339()),
            shipping_address: order
                .shipping_address
                .as_ref()
                .map(ShippingAddressDto::from_domain),
            tracking_number: order.tracking_number.clone(),
            estimated_delivery: order.estimated_delivery.map(|t| t.to_rfc3339()),
            actual_delivery: order.actual_delivery.map(|t| t.to_rfc3339()),
            shipping_fee_cents: order.shipping_fee_cents,
            shipping_paid_at: order.shipping_paid_at.map(|t| t.to_rfc3339()),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

// ── Pagination ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListOrdersParams {
    /// Page number (1-based). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page. Defaults to 20, maximum 100.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Scope the listing to a registered owner.
    pub user_id: Option<Uuid>,
    /// Scope the listing to a guest checkout email.
    pub guest_email: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListOrdersResponse {
    pub items: Vec<OrderResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

// ── Transitions ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct PayOrderRequest {
    #[serde(default)]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// Target lifecycle status; must be the direct successor of the current
    /// one.
    pub status: String,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShippingFeeDueResponse {
    pub checkout_session_id: String,
    pub checkout_url: String,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateStatusResponse {
    pub order: OrderResponse,
    /// Set when the transition is gated on an unpaid shipping fee; the order
    /// status is unchanged until the fee payment reconciles.
    pub shipping_fee_due: Option<ShippingFeeDueResponse>,
}

// ── Timeline / production ────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub event_data: serde_json::Value,
    pub trigger_source: String,
    pub triggered_by: Option<String>,
    pub created_at: String,
}

impl TimelineEventResponse {
    fn from_view(event: TimelineEvent) -> Self {
        TimelineEventResponse {
            id: event.id,
            event_type: event.event_type,
            description: event.description,
            event_data: event.event_data,
            trigger_source: event.trigger_source.as_str().to_string(),
            triggered_by: event.triggered_by,
            created_at: event.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductionUpdateRequest {
    pub stage: String,
    pub status: String,
    pub description: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default = "default_visible")]
    pub visible_to_customer: bool,
    pub created_by: String,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductionUpdateResponse {
    pub id: Uuid,
    pub stage: String,
    pub status: String,
    pub description: String,
    pub photos: Vec<String>,
    pub visible_to_customer: bool,
    pub created_by: String,
    pub created_at: String,
}

impl ProductionUpdateResponse {
    fn from_view(update: ProductionUpdate) -> Self {
        ProductionUpdateResponse {
            id: update.id,
            stage: update.stage,
            status: update.status,
            description: update.description,
            photos: update.photos,
            visible_to_customer: update.visible_to_customer,
            created_by: update.created_by,
            created_at: update.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductionUpdatesParams {
    /// When true, only entries flagged visible to the customer are returned.
    #[serde(default)]
    pub customer: bool,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders
///
/// Validates the payload (minimum order quantity, size quantities summing to
/// the order quantity, at least one placement, a single owner identity) and
/// persists the order, its initial payment ledger row and the creation audit
/// entry in one transaction.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Validation failed"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = Actor {
        source: TriggerSource::Api,
        id: None,
    };
    let input = body.into_inner().into_input(actor)?;

    let order = web::block(move || state.orders.create_order(input))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(OrderResponse::from_view(&order)))
}

/// GET /orders/{id}
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order UUID")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let order = web::block(move || state.orders.get_order(order_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(OrderResponse::from_view(&order)))
}

/// GET /orders
///
/// Paginated listing, optionally scoped to one owner (registered user id or
/// guest email).
#[utoipa::path(
    get,
    path = "/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number (1-based, default 1)"),
        ("limit" = Option<i64>, Query, description = "Items per page (default 20, max 100)"),
        ("user_id" = Option<Uuid>, Query, description = "Scope to a registered owner"),
        ("guest_email" = Option<String>, Query, description = "Scope to a guest email"),
    ),
    responses(
        (status = 200, description = "Paginated list of orders", body = ListOrdersResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    state: web::Data<AppState>,
    query: web::Query<ListOrdersParams>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let page = params.page.max(1);
    let limit = params.limit.clamp(1, 100);
    let filter = OrderFilter {
        user_id: params.user_id,
        guest_email: params.guest_email,
    };

    let result = web::block(move || state.orders.list_orders(filter, page, limit))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(ListOrdersResponse {
        items: result.items.iter().map(OrderResponse::from_view).collect(),
        total: result.total,
        page,
        limit,
    }))
}

/// POST /orders/{id}/pay
///
/// Customer payment completion: settles the full-payment ledger row and
/// advances the order `submitted -> paid`.
#[utoipa::path(
    post,
    path = "/orders/{id}/pay",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = PayOrderRequest,
    responses(
        (status = 200, description = "Order paid", body = OrderResponse),
        (status = 404, description = "Order not found"),
        (status = 422, description = "Order is not payable in its current status"),
    ),
    tag = "orders"
)]
pub async fn pay_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PayOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let actor = Actor {
        source: TriggerSource::Api,
        id: body.into_inner().triggered_by,
    };

    let order = web::block(move || state.lifecycle.pay(order_id, actor))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(OrderResponse::from_view(&order)))
}

/// PATCH /orders/{id}/status
///
/// Admin-driven lifecycle transition. Only the direct successor status is
/// accepted. Advancing into `shipping` with a configured, unpaid shipping
/// fee does not change the status; the response carries the checkout session
/// for the fee instead.
#[utoipa::path(
    patch,
    path = "/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Transition applied or fee charged", body = UpdateStatusResponse),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order changed concurrently"),
        (status = 422, description = "Transition not allowed"),
    ),
    tag = "orders"
)]
pub async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let body = body.into_inner();
    let target = OrderStatus::parse(&body.status)
        .map_err(|_| AppError::Validation(format!("Unknown order status '{}'", body.status)))?;
    let actor = Actor {
        source: TriggerSource::Admin,
        id: body.triggered_by,
    };
    let options = TransitionOptions {
        tracking_number: body.tracking_number,
        estimated_delivery: body.estimated_delivery,
    };

    let outcome = web::block(move || state.lifecycle.transition(order_id, target, actor, options))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let response = match outcome {
        TransitionOutcome::Advanced(order) => UpdateStatusResponse {
            order: OrderResponse::from_view(&order),
            shipping_fee_due: None,
        },
        TransitionOutcome::ShippingFeeDue {
            order,
            payment,
            checkout,
        } => UpdateStatusResponse {
            order: OrderResponse::from_view(&order),
            shipping_fee_due: Some(ShippingFeeDueResponse {
                checkout_session_id: checkout.session_id,
                checkout_url: checkout.url,
                amount_cents: payment.amount_cents,
            }),
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

/// GET /orders/{id}/timeline
///
/// Full audit trail for the order, newest first.
#[utoipa::path(
    get,
    path = "/orders/{id}/timeline",
    params(("id" = Uuid, Path, description = "Order UUID")),
    responses(
        (status = 200, description = "Timeline events", body = [TimelineEventResponse]),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders"
)]
pub async fn get_timeline(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let events = web::block(move || state.orders.get_timeline(order_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let response: Vec<TimelineEventResponse> = events
        .into_iter()
        .map(TimelineEventResponse::from_view)
        .collect();
    Ok(HttpResponse::Ok().json(response))
}

/// POST /orders/{id}/production-updates
#[utoipa::path(
    post,
    path = "/orders/{id}/production-updates",
    params(("id" = Uuid, Path, description = "Order UUID")),
    request_body = CreateProductionUpdateRequest,
    responses(
        (status = 201, description = "Production update recorded", body = ProductionUpdateResponse),
        (status = 404, description = "Order not found"),
    ),
    tag = "production"
)]
pub async fn add_production_update(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CreateProductionUpdateRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let body = body.into_inner();
    let actor = Actor {
        source: TriggerSource::Admin,
        id: Some(body.created_by.clone()),
    };
    let update = NewProductionUpdate {
        stage: body.stage,
        status: body.status,
        description: body.description,
        photos: body.photos,
        visible_to_customer: body.visible_to_customer,
        created_by: body.created_by,
    };

    let created = web::block(move || state.orders.add_production_update(order_id, update, actor))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Created().json(ProductionUpdateResponse::from_view(created)))
}

/// GET /orders/{id}/production-updates
///
/// `?customer=true` restricts the listing to customer-visible entries.
#[utoipa::path(
    get,
    path = "/orders/{id}/production-updates",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
        ("customer" = Option<bool>, Query, description = "Customer-visible entries only"),
    ),
    responses(
        (status = 200, description = "Production updates", body = [ProductionUpdateResponse]),
        (status = 404, description = "Order not found"),
    ),
    tag = "production"
)]
pub async fn list_production_updates(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ProductionUpdatesParams>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let customer_view = query.into_inner().customer;

    let updates = web::block(move || state.orders.production_updates(order_id, customer_view))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let response: Vec<ProductionUpdateResponse> = updates
        .into_iter()
        .map(ProductionUpdateResponse::from_view)
        .collect();
    Ok(HttpResponse::Ok().json(response))
}
