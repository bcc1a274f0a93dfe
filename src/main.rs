use std::sync::Arc;

use apparel_order_service::infrastructure::stripe::StripeGateway;
use apparel_order_service::{build_server, create_pool, run_migrations, AppConfig};
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env();

    let pool = create_pool(&config.database_url);
    run_migrations(&pool);

    let provider = Arc::new(StripeGateway::new(
        config.stripe_secret_key.clone(),
        config.checkout_success_url.clone(),
        config.checkout_cancel_url.clone(),
    ));

    log::info!(
        "Starting server at http://{}:{}",
        config.host,
        config.port
    );

    build_server(pool, provider, &config)?.await
}
