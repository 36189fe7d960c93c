//! Orderhub - order fulfillment and returns service
//!
//! Thin JSON surface over the lifecycle services. Callers arrive with a
//! pre-verified identity in `x-actor-id` / `x-actor-role` / `x-warehouse-ids`
//! headers; authentication itself happens upstream.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderhub::config::AppConfig;
use orderhub::domain::aggregates::{Order, OrderStatus, Return, ReturnStatus};
use orderhub::error::ServiceError;
use orderhub::identity::{ActorContext, Role};
use orderhub::inventory::InventoryLedger;
use orderhub::lifecycle::order::{
    AgentDetails, CreateOrderRequest, DeliveryOtpIssued, OrderOutcome, TransitionRequest,
    VerifyPaymentRequest,
};
use orderhub::lifecycle::returns::{
    CreateReturnRequest, PickupAction, ProcessRefundRequest, RefundOutcome,
    ReturnOutcome, ReturnTransitionRequest,
};
use orderhub::lifecycle::{OrderLifecycle, ReturnLifecycle};
use orderhub::notify::LogNotifier;
use orderhub::otp::OtpGate;
use orderhub::payment::UnconfiguredPaymentBridge;
use orderhub::publisher::EventPublisher;
use orderhub::store::memory::InMemoryStore;
use orderhub::store::postgres::PgStore;
use orderhub::store::{OrderFilter, OrderStore, ProductStore, ReturnFilter, ReturnStore};

#[derive(Clone)]
struct AppState {
    orders: OrderLifecycle,
    returns: ReturnLifecycle,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let (order_store, return_store, product_store): (
        Arc<dyn OrderStore>,
        Arc<dyn ReturnStore>,
        Arc<dyn ProductStore>,
    ) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            let store = Arc::new(PgStore::new(pool));
            (store.clone(), store.clone(), store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS connection failed, events disabled");
                None
            }
        },
        None => None,
    };

    let ledger = InventoryLedger::new(product_store.clone());
    let otp = Arc::new(OtpGate::new());
    let payments = Arc::new(UnconfiguredPaymentBridge);
    let notifier = Arc::new(LogNotifier);
    let publisher = Arc::new(EventPublisher::new(nats));

    let state = AppState {
        orders: OrderLifecycle::new(
            order_store.clone(),
            product_store.clone(),
            ledger.clone(),
            otp.clone(),
            payments.clone(),
            notifier.clone(),
            publisher.clone(),
            config.clone(),
        ),
        returns: ReturnLifecycle::new(
            return_store,
            order_store,
            product_store,
            ledger,
            otp,
            payments,
            notifier,
            publisher,
            config.clone(),
        ),
    };

    let app = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "orderhub"})) }),
        )
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", post(transition_order))
        .route("/api/v1/orders/:id/payment/verify", post(verify_payment))
        .route("/api/v1/orders/:id/agent", post(assign_agent))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/otp", post(generate_delivery_otp))
        .route("/api/v1/orders/:id/deliver", post(deliver_order))
        .route("/api/v1/returns", get(list_returns).post(create_return))
        .route("/api/v1/returns/:id", get(get_return))
        .route("/api/v1/returns/:id/status", post(transition_return))
        .route("/api/v1/returns/:id/pickup", post(update_pickup))
        .route("/api/v1/returns/:id/otp/verify", post(verify_pickup_otp))
        .route("/api/v1/returns/:id/refund", post(process_refund))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("orderhub listening on {}", config.bind_addr);
    axum::serve(tokio::net::TcpListener::bind(&config.bind_addr).await?, app).await?;
    Ok(())
}

/// Parse the pre-verified identity headers into an actor context.
fn actor_from_headers(headers: &HeaderMap) -> Result<ActorContext, ServiceError> {
    let actor_id = header_str(headers, "x-actor-id")?
        .ok_or_else(|| ServiceError::Forbidden("missing x-actor-id header".to_string()))?;
    let role = header_str(headers, "x-actor-role")?
        .and_then(|r| Role::parse(&r))
        .ok_or_else(|| {
            ServiceError::Forbidden("missing or unknown x-actor-role header".to_string())
        })?;
    let warehouse_ids = header_str(headers, "x-warehouse-ids")?
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Ok(ActorContext::new(actor_id, role, warehouse_ids))
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, ServiceError> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|_| ServiceError::Validation(format!("invalid {} header", name))),
    }
}

#[derive(Debug, Deserialize)]
struct OrderListParams {
    page: Option<u64>,
    per_page: Option<u64>,
    status: Option<OrderStatus>,
    warehouse_id: Option<String>,
    customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReturnListParams {
    page: Option<u64>,
    per_page: Option<u64>,
    status: Option<ReturnStatus>,
    order_id: Option<String>,
    customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DeliverRequest {
    session_id: String,
    code: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PickupRequest {
    action: PickupAction,
}

#[derive(Debug, Deserialize)]
struct VerifyPickupOtpRequest {
    code: String,
}

async fn create_order(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderOutcome>), ServiceError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = s.orders.create_order(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_order(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Order>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.get_order(&id, &actor).await?))
}

async fn list_orders(
    State(s): State<AppState>,
    headers: HeaderMap,
    Query(p): Query<OrderListParams>,
) -> Result<Json<Vec<Order>>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    let filter = OrderFilter {
        status: p.status,
        warehouse_id: p.warehouse_id,
        customer_id: p.customer_id,
    };
    let orders = s
        .orders
        .list_orders(filter, p.page.unwrap_or(1), p.per_page.unwrap_or(20), &actor)
        .await?;
    Ok(Json(orders))
}

async fn transition_order(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<OrderOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.transition_status(&id, req, &actor).await?))
}

async fn verify_payment(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<OrderOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.verify_online_payment(&id, req, &actor).await?))
}

async fn assign_agent(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AgentDetails>,
) -> Result<Json<OrderOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.assign_delivery_agent(&id, req, &actor).await?))
}

async fn cancel_order(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<OrderOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.cancel_order(&id, req.reason, &actor).await?))
}

async fn generate_delivery_otp(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeliveryOtpIssued>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.orders.generate_delivery_otp(&id, &actor).await?))
}

async fn deliver_order(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<DeliverRequest>,
) -> Result<Json<OrderOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = s
        .orders
        .verify_delivery_otp_and_deliver(&id, &req.session_id, &req.code, &actor, req.note)
        .await?;
    Ok(Json(outcome))
}

async fn create_return(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<ReturnOutcome>), ServiceError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = s.returns.create_return_request(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_return(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Return>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.returns.get_return(&id, &actor).await?))
}

async fn list_returns(
    State(s): State<AppState>,
    headers: HeaderMap,
    Query(p): Query<ReturnListParams>,
) -> Result<Json<Vec<Return>>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    let filter = ReturnFilter {
        status: p.status,
        order_id: p.order_id,
        customer_id: p.customer_id,
    };
    let returns = s
        .returns
        .list_returns(filter, p.page.unwrap_or(1), p.per_page.unwrap_or(20), &actor)
        .await?;
    Ok(Json(returns))
}

async fn transition_return(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ReturnTransitionRequest>,
) -> Result<Json<ReturnOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.returns.update_status(&id, req, &actor).await?))
}

async fn update_pickup(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<PickupRequest>,
) -> Result<Json<ReturnOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        s.returns.update_pickup_status(&id, req.action, &actor).await?,
    ))
}

async fn verify_pickup_otp(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<VerifyPickupOtpRequest>,
) -> Result<Json<ReturnOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.returns.verify_pickup_otp(&id, &req.code, &actor).await?))
}

async fn process_refund(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ProcessRefundRequest>,
) -> Result<Json<RefundOutcome>, ServiceError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(s.returns.process_refund(&id, req, &actor).await?))
}
