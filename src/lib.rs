pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod infrastructure;
pub mod schema;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use application::lifecycle::LifecycleService;
use application::order_service::OrderService;
use application::payment_service::PaymentService;
use application::reconciliation::ReconciliationService;
use domain::ports::SharedProvider;
use infrastructure::order_repo::DieselOrderRepository;
use infrastructure::payment_repo::DieselPaymentRepository;
use infrastructure::stripe::WebhookVerifier;

pub use config::AppConfig;
pub use db::{create_pool, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) {
    let mut conn = pool.get().expect("Failed to get DB connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run database migrations");
}

/// Shared service wiring handed to every handler.
pub struct AppState {
    pub orders: OrderService<DieselOrderRepository>,
    pub lifecycle: LifecycleService<DieselOrderRepository, DieselPaymentRepository>,
    pub payments: PaymentService<DieselOrderRepository, DieselPaymentRepository>,
    pub reconciliation: ReconciliationService<DieselOrderRepository, DieselPaymentRepository>,
    pub webhooks: WebhookVerifier,
}

impl AppState {
    pub fn new(pool: DbPool, provider: SharedProvider, config: &AppConfig) -> Self {
        let order_repo = DieselOrderRepository::new(pool.clone());
        let payment_repo = DieselPaymentRepository::new(pool);
        AppState {
            orders: OrderService::new(order_repo.clone(), config.currency.clone()),
            lifecycle: LifecycleService::new(
                order_repo.clone(),
                payment_repo.clone(),
                provider.clone(),
                config.currency.clone(),
            ),
            payments: PaymentService::new(
                order_repo.clone(),
                payment_repo.clone(),
                provider.clone(),
                config.currency.clone(),
            ),
            reconciliation: ReconciliationService::new(order_repo, payment_repo, provider),
            webhooks: WebhookVerifier::new(config.stripe_webhook_secret.clone()),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::pay_order,
        handlers::orders::update_status,
        handlers::orders::get_timeline,
        handlers::orders::add_production_update,
        handlers::orders::list_production_updates,
        handlers::payments::create_checkout_session,
        handlers::payments::create_invoice,
        handlers::payments::list_payments,
        handlers::payments::reconcile,
        handlers::webhooks::stripe_webhook,
    ),
    components(schemas(
        handlers::orders::PrintPlacementDto,
        handlers::orders::CustomizationDto,
        handlers::orders::ShippingAddressDto,
        handlers::orders::CreateOrderRequest,
        handlers::orders::OrderResponse,
        handlers::orders::ListOrdersResponse,
        handlers::orders::PayOrderRequest,
        handlers::orders::UpdateStatusRequest,
        handlers::orders::UpdateStatusResponse,
        handlers::orders::ShippingFeeDueResponse,
        handlers::orders::TimelineEventResponse,
        handlers::orders::CreateProductionUpdateRequest,
        handlers::orders::ProductionUpdateResponse,
        handlers::payments::PaymentResponse,
        handlers::payments::CreateChargeRequest,
        handlers::payments::CheckoutSessionResponse,
        handlers::payments::InvoiceResponse,
        handlers::payments::ReconcileRequest,
        handlers::payments::ReconcileResponse,
        handlers::webhooks::WebhookAck,
    )),
    tags(
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Payment ledger and reconciliation"),
        (name = "production", description = "Production tracking"),
        (name = "webhooks", description = "Payment provider webhooks"),
    )
)]
struct ApiDoc;

/// Build and return an actix-web `Server` bound to the configured host/port.
///
/// The payment provider is injected so tests can run the full HTTP surface
/// against a stub. The caller is responsible for `.await`-ing (or
/// `tokio::spawn`-ing) the returned server.
pub fn build_server(
    pool: DbPool,
    provider: SharedProvider,
    config: &AppConfig,
) -> std::io::Result<actix_web::dev::Server> {
    let state = web::Data::new(AppState::new(pool, provider, config));
    let host = config.host.clone();
    let port = config.port;

    Ok(HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
            .service(
                web::scope("/orders")
                    .route("", web::post().to(handlers::orders::create_order))
                    .route("", web::get().to(handlers::orders::list_orders))
                    .route("/{id}", web::get().to(handlers::orders::get_order))
                    .route("/{id}/pay", web::post().to(handlers::orders::pay_order))
                    .route("/{id}/status", web::patch().to(handlers::orders::update_status))
                    .route("/{id}/timeline", web::get().to(handlers::orders::get_timeline))
                    .route(
                        "/{id}/payments",
                        web::get().to(handlers::payments::list_payments),
                    )
                    .route(
                        "/{id}/checkout-session",
                        web::post().to(handlers::payments::create_checkout_session),
                    )
                    .route(
                        "/{id}/invoice",
                        web::post().to(handlers::payments::create_invoice),
                    )
                    .route(
                        "/{id}/production-updates",
                        web::post().to(handlers::orders::add_production_update),
                    )
                    .route(
                        "/{id}/production-updates",
                        web::get().to(handlers::orders::list_production_updates),
                    ),
            )
            .service(
                web::scope("/payments")
                    .route("/reconcile", web::post().to(handlers::payments::reconcile)),
            )
            .service(
                web::scope("/webhooks")
                    .route("/stripe", web::post().to(handlers::webhooks::stripe_webhook)),
            )
    })
    .bind((host, port))?
    .run())
}
