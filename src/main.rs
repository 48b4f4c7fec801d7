use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use duka_orderservice::{
    app_state::AppState,
    bootstrap, config,
    gateway::{DarajaGateway, PaymentGateway},
    routes,
    store::Documents,
};
use tower_http::trace::TraceLayer;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;

    let routes = routes::payments::routes_with_openapi()
        .merge(routes::health::routes_with_openapi());

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Duka OrderService API")
        .version("1.0.0")
        .build();
    let swagger_ui = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(DarajaGateway::new(
        config.daraja.clone(),
        reqwest::Client::new(),
    ));
    let state = AppState::new(Documents::in_memory(), gateway);

    let app = Router::new()
        .merge(routes)
        .merge(swagger_ui)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    bootstrap::serve("OrderService", app, config.port).await
}
