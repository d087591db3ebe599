use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    extract::State,
    extract::connect_info::ConnectInfo,
    http::Method,
    http::Request,
    http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue},
    middleware,
    middleware::Next,
    response::Response,
    routing::{get, post},
};
use clap::Parser;
use dotenvy::dotenv;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use pm_common::db::{create_pool_from_url, run_migrations};
use pm_common::engine::{EngineConfig, MatchingEngine};
use pm_common::logging::{self, LoggingConfig};
use pm_common::store::{MatchStore, MemoryStore, PgStore};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, warn};

pub mod auth;
pub mod error;
pub mod handlers;

use auth::{AuthConfig, AuthMode};
use error::ApiError;
use handlers::{feedback, health, insights, matches, weights};

const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Parser)]
#[command(name = "pm-api", about = "HTTP API for partner matching and feedback learning")]
struct Cli {
    /// PostgreSQL connection string; the in-memory store is used when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Server port
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// API key for X-API-Key authentication
    #[arg(long, env = "PM_API_KEY")]
    api_key: Option<String>,

    /// Authentication mode: api_key | jwt
    #[arg(long, env = "AUTH_MODE", default_value = "api_key", value_enum)]
    auth_mode: AuthMode,

    /// HS256 secret for AUTH_MODE=jwt
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Comma separated list of allowed CORS origins
    #[arg(long, env = "PM_CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    /// Skip schema migrations on startup
    #[arg(long, env = "PM_SKIP_MIGRATIONS", default_value = "false")]
    skip_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub auth: AuthConfig,
    pub skip_migrations: bool,
}

type IpRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Clone)]
pub struct RateLimits {
    global: Arc<IpRateLimiter>,
    retrain: Arc<IpRateLimiter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub global_per_sec: u64,
    pub global_burst: u32,
    pub retrain_per_sec: u64,
    pub retrain_burst: u32,
}

impl RateLimitConfig {
    fn parse_env_u64(name: &str) -> Option<u64> {
        env::var(name)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
    }

    fn parse_env_u32(name: &str) -> Option<u32> {
        env::var(name)
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
    }

    fn from_env() -> Self {
        Self {
            global_per_sec: Self::parse_env_u64("PM_RATE_LIMIT_GLOBAL_PER_SEC").unwrap_or(20),
            global_burst: Self::parse_env_u32("PM_RATE_LIMIT_GLOBAL_BURST").unwrap_or(40),
            retrain_per_sec: Self::parse_env_u64("PM_RATE_LIMIT_RETRAIN_PER_SEC").unwrap_or(1),
            retrain_burst: Self::parse_env_u32("PM_RATE_LIMIT_RETRAIN_BURST").unwrap_or(2),
        }
    }
}

impl AppConfig {
    fn from_cli(cli: Cli) -> Result<Self, ApiError> {
        let cors_origins = cli
            .cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>();

        if cors_origins.iter().any(|origin| origin == "*") {
            return Err(ApiError::BadRequest(
                "PM_CORS_ORIGINS must list explicit origins".into(),
            ));
        }

        let auth = AuthConfig {
            mode: cli.auth_mode,
            api_key: cli.api_key,
            jwt_secret: cli.jwt_secret,
        };

        match auth.mode {
            AuthMode::ApiKey if auth.api_key.is_none() => {
                return Err(ApiError::BadRequest(
                    "PM_API_KEY is required when AUTH_MODE=api_key".into(),
                ));
            }
            AuthMode::Jwt if auth.jwt_secret.is_none() => {
                return Err(ApiError::BadRequest(
                    "JWT_SECRET is required when AUTH_MODE=jwt".into(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            database_url: cli.database_url,
            port: cli.port,
            cors_origins,
            auth,
            skip_migrations: cli.skip_migrations,
        })
    }

    pub fn for_tests(auth: AuthConfig) -> Self {
        Self {
            database_url: None,
            port: 3001,
            cors_origins: vec!["http://localhost:3000".into()],
            auth,
            skip_migrations: true,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine>,
    pub config: AppConfig,
    pub(crate) rate_limits: RateLimits,
    pub readiness: Arc<AtomicBool>,
}

pub type SharedState = Arc<AppState>;

impl axum::extract::FromRef<SharedState> for AuthConfig {
    fn from_ref(input: &SharedState) -> AuthConfig {
        input.config.auth.clone()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
}

fn build_ip_limiter(per_second: u64, burst_size: u32) -> Arc<IpRateLimiter> {
    let nanos_per_token = (1_000_000_000u64 / per_second.max(1)).max(1);
    let burst = NonZeroU32::new(burst_size.max(1)).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(Duration::from_nanos(nanos_per_token))
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst);

    Arc::new(RateLimiter::keyed(quota))
}

pub fn rate_limits(cfg: &RateLimitConfig) -> RateLimits {
    RateLimits {
        global: build_ip_limiter(cfg.global_per_sec, cfg.global_burst),
        retrain: build_ip_limiter(cfg.retrain_per_sec, cfg.retrain_burst),
    }
}

pub fn default_rate_limits() -> RateLimits {
    rate_limits(&RateLimitConfig::from_env())
}

fn request_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

fn enforce_rate_limit(limiter: &IpRateLimiter, ip: Option<IpAddr>) -> Result<(), ApiError> {
    if let Some(client_ip) = ip {
        if limiter.check_key(&client_ip).is_err() {
            return Err(ApiError::TooManyRequests("rate limit exceeded".into()));
        }
    }

    Ok(())
}

async fn global_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.global, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn retrain_rate_limit(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.retrain, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn attach_request_id_context(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    Ok(error::with_request_id(request_id, next.run(req)).await)
}

fn record_response(response: &Response, latency: Duration, span: &Span) {
    span.record("status", response.status().as_u16());
    info!(latency_ms = latency.as_millis() as u64, "request finished");
}

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
            status = tracing::field::Empty,
        )
    })
    .on_response(record_response);

    let api_routes = Router::new()
        .route("/matches/rank", post(matches::rank_matches))
        .route("/feedback", post(feedback::submit_feedback))
        .route("/feedback/summary", get(feedback::summary))
        .route("/weights", get(weights::history))
        .route(
            "/weights/retrain",
            post(weights::retrain).route_layer(middleware::from_fn_with_state(
                state.clone(),
                retrain_rate_limit,
            )),
        )
        .route("/insights", get(insights::insights));

    Router::new()
        .route("/health", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            global_rate_limit,
        ))
        .layer(middleware::from_fn(attach_request_id_context))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid::default(),
        ))
        .layer(cors)
        .with_state(state)
}

/// Router state over a fresh in-memory store, fallback-only encoding and
/// API-key auth.
pub fn test_state(api_key: &str) -> SharedState {
    test_state_with(Arc::new(MemoryStore::new()), AuthConfig::api_key(api_key))
}

pub fn test_state_with(store: Arc<dyn MatchStore>, auth: AuthConfig) -> SharedState {
    let engine = MatchingEngine::new(
        store,
        pm_common::encoder::ProfileEncoder::fallback_only(),
        EngineConfig::default(),
    );

    Arc::new(AppState {
        engine: Arc::new(engine),
        config: AppConfig::for_tests(auth),
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    })
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn MatchStore>, ApiError> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; using the in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = create_pool_from_url(url)
        .map_err(|err| ApiError::Internal(format!("failed to create pool: {err}")))?;
    if !config.skip_migrations {
        run_migrations(&pool)
            .await
            .map_err(|err| ApiError::Internal(format!("failed to run migrations: {err}")))?;
    }
    Ok(Arc::new(PgStore::new(pool)))
}

pub async fn run() -> Result<(), ApiError> {
    dotenv().ok();
    logging::init(env!("CARGO_PKG_NAME"), &LoggingConfig::from_env());

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;
    let store = build_store(&config).await?;

    let engine_config = EngineConfig::from_env();
    let (engine, signal_worker) = MatchingEngine::from_config(store, engine_config).with_signal_worker();

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        config: config.clone(),
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    });

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let app = create_router(state.clone());

    info!(%addr, auth_mode = ?config.auth.mode, store = state.engine.store().backend(), "pm-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    // Dropping the last engine handle closes the signal channel so the
    // worker drains what is queued and exits.
    drop(state);
    if let Err(err) = signal_worker.await {
        warn!(error = %err, "feedback signal worker ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let _ = sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state.readiness.store(false, Ordering::SeqCst);

    // Let load balancers see /readyz fail before connections stop.
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
}
