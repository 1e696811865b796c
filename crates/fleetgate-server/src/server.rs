use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    middleware,
    routing::{delete, get, post, put},
};
use fleetgate_auth::{
    AuthState, IdentityCache, IdentityProvider, MemoryIdentityStore, PermissionEvaluator,
    TokenResolver,
};
use fleetgate_core::RpcTransport;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::alerts::{AlertService, ClientRegistry};
use crate::cache::RequestCache;
use crate::config::AppConfig;
use crate::handlers::{self, actions, auth, logs, things};
use crate::middleware as app_middleware;
use crate::rpc::{HttpRpcTransport, RpcFanout};
use crate::ws;

/// Shared collaborators handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub fanout: RpcFanout,
    pub cache: RequestCache<Value>,
    pub alerts: Arc<AlertService>,
    pub config: Arc<AppConfig>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    let gateway = Router::new()
        // Identity
        .route("/auth/userinfo", get(auth::userinfo))
        .route("/auth/token", post(auth::new_token))
        .route("/auth/permissions", get(auth::permissions))
        .route("/auth/site", get(auth::site))
        .route(auth::EXT_DATA, get(auth::ext_data))
        // Things and racks
        .route(things::LIST_THINGS, get(things::list_things))
        .route(things::LIST_RACKS, get(things::list_racks))
        .route(things::WORKER_CONFIG, get(things::worker_config))
        .route("/auth/thing-config", get(things::thing_config))
        .route(
            "/auth/settings",
            get(things::get_settings).put(things::save_settings),
        )
        .route(
            "/auth/thing/comment",
            post(things::add_comment)
                .put(things::edit_comment)
                .delete(things::delete_comment),
        )
        // Logs
        .route(logs::TAIL_LOG, get(logs::tail_log))
        .route(logs::TAIL_LOG_MULTI, get(logs::tail_log_multi))
        .route(logs::TAIL_LOG_RANGE_AGGR, get(logs::tail_log_range_aggr))
        .route(logs::HISTORY_LOG, get(logs::history_log))
        // Actions
        .route(actions::ACTIONS, get(actions::query_actions))
        .route(actions::ACTIONS_BATCH, get(actions::actions_batch))
        .route(actions::ACTIONS_SINGLE, get(actions::get_action))
        .route("/auth/actions/voting", post(actions::push_action))
        .route("/auth/actions/voting/batch", post(actions::push_actions_batch))
        .route("/auth/actions/voting/{id}/vote", put(actions::vote_action))
        .route("/auth/actions/voting/cancel", delete(actions::cancel_actions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::route_permissions,
        ));

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/metrics", get(handlers::health::metrics))
        .route("/ws", get(ws::alerts_ws))
        .merge(gateway)
        // Middleware stack, innermost first. The request id wraps the trace
        // layer so the span can carry it.
        .layer(middleware::from_fn(app_middleware::http_metrics))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    transport: Option<Arc<dyn RpcTransport>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            identity: None,
            transport: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use `provider` instead of the built-in store seeded from `auth.users`.
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Use `transport` instead of HTTP JSON-RPC to `rpc.endpoints`.
    pub fn with_transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> anyhow::Result<FleetgateServer> {
        let cfg = self.config;

        let provider: Arc<dyn IdentityProvider> = match self.identity {
            Some(provider) => provider,
            None => Arc::new(seed_identity_store(&cfg)?),
        };
        let transport: Arc<dyn RpcTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpRpcTransport::new(cfg.rpc.endpoints.clone())),
        };

        let mut resolver = TokenResolver::new(
            provider.clone(),
            Arc::new(IdentityCache::new(cfg.auth.token_cache_ttl())),
            cfg.auth.identity_ttl(),
        );
        if !cfg.auth.enabled {
            tracing::warn!("Authentication is disabled; every request is anonymous");
            resolver = resolver.with_auth_disabled();
        }
        let auth = AuthState::new(
            Arc::new(resolver),
            Arc::new(PermissionEvaluator::new(
                provider,
                cfg.auth.super_admin_perms.clone(),
            )),
        );

        let fanout = RpcFanout::new(
            transport,
            cfg.rpc.nodes.clone(),
            cfg.rpc.timeout(),
            cfg.rpc.concurrency_limit,
        );
        let cache = RequestCache::new(cfg.cache.max_entries, cfg.cache.endpoints.clone());
        let alerts = Arc::new(AlertService::new(
            fanout.clone(),
            Arc::new(ClientRegistry::new()),
            &cfg.alerts,
        ));

        tracing::info!(
            nodes = cfg.rpc.nodes.len(),
            concurrency_limit = cfg.rpc.concurrency_limit,
            "Gateway state assembled"
        );

        let state = AppState {
            auth,
            fanout,
            cache,
            alerts,
            config: Arc::new(cfg),
        };

        Ok(FleetgateServer {
            addr: self.addr,
            app: build_app(state.clone()),
            state,
        })
    }
}

fn seed_identity_store(cfg: &AppConfig) -> anyhow::Result<MemoryIdentityStore> {
    let store = MemoryIdentityStore::new(cfg.auth.roles.clone());
    let mut tokens = 0;
    for user in &cfg.auth.users {
        store.add_user(user.email.clone(), user.roles.clone());
        for token in &user.tokens {
            store.insert_token(token.clone(), &user.email, None)?;
            tokens += 1;
        }
    }
    tracing::info!(
        users = cfg.auth.users.len(),
        tokens,
        roles = cfg.auth.roles.len(),
        "Built-in identity store seeded"
    );
    Ok(store)
}

pub struct FleetgateServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

impl FleetgateServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timers = spawn_background_tasks(&self.state);

        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        for timer in timers {
            timer.abort();
        }
        served?;
        Ok(())
    }
}

fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut timers = vec![spawn_alert_broadcast(state)];
    if state.config.auth.enabled {
        timers.push(spawn_token_cleanup(state));
    }
    timers
}

fn spawn_token_cleanup(state: &AppState) -> JoinHandle<()> {
    let auth = state.auth.clone();
    let period = state.config.auth.cleanup_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match auth.resolver.provider().cleanup_tokens().await {
                Ok(removed) => {
                    crate::metrics::record_tokens_cleaned(removed);
                    tracing::info!(removed, "Expired tokens cleaned up");
                }
                Err(e) => tracing::error!(error = %e, "Token cleanup failed"),
            }
            let evicted = auth.resolver.cache().cleanup_expired();
            tracing::debug!(evicted, "Identity cache swept");
        }
    })
}

fn spawn_alert_broadcast(state: &AppState) -> JoinHandle<()> {
    let alerts = state.alerts.clone();
    let period = state.config.alerts.broadcast_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            alerts.broadcast().await;
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use fleetgate_core::{BackendNode, RpcError, RpcOptions};
    use serde_json::json;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait::async_trait]
    impl RpcTransport for Echo {
        async fn request(
            &self,
            node_key: &str,
            method: &str,
            _payload: &Value,
            _opts: RpcOptions,
        ) -> Result<Value, RpcError> {
            Ok(json!({ "node": node_key, "method": method }))
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.rpc.nodes = vec![BackendNode::new("n1")];
        cfg.auth.roles = HashMap::from([("admin".to_string(), vec!["actions:rw".to_string()])]);
        cfg.auth.users = vec![crate::config::SeedUser {
            email: "admin@example.com".into(),
            roles: vec!["admin".into()],
            tokens: vec!["static-admin".into()],
        }];
        cfg
    }

    fn request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "192.0.2.7");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_seeded_static_token() {
        let server = ServerBuilder::new()
            .with_config(config())
            .with_transport(Arc::new(Echo))
            .build()
            .unwrap();

        let res = server
            .router()
            .oneshot(request("/auth/userinfo", Some("static-admin")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));

        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["metadata"]["email"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_request_id_is_preserved() {
        let server = ServerBuilder::new()
            .with_config(config())
            .with_transport(Arc::new(Echo))
            .build()
            .unwrap();

        let req = Request::builder()
            .uri("/healthz")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let res = server.router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-request-id"], "abc-123");
    }

    /// Collects the `request_id` field of every `http.request` span.
    #[derive(Clone, Default)]
    struct SpanRequestIds(Arc<parking_lot::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanRequestIds {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct RequestIdField(Option<String>);

            impl tracing::field::Visit for RequestIdField {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "request_id" {
                        self.0 = Some(format!("{value:?}"));
                    }
                }
            }

            if attrs.metadata().name() == "http.request" {
                let mut visitor = RequestIdField(None);
                attrs.record(&mut visitor);
                if let Some(id) = visitor.0 {
                    self.0.lock().push(id);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_request_span_carries_request_id() {
        use tracing_subscriber::layer::SubscriberExt;

        let ids = SpanRequestIds::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(ids.clone()),
        );
        let server = ServerBuilder::new()
            .with_config(config())
            .with_transport(Arc::new(Echo))
            .build()
            .unwrap();

        let req = Request::builder()
            .uri("/healthz")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        server.router().oneshot(req).await.unwrap();

        assert_eq!(*ids.0.lock(), vec!["abc-123".to_string()]);
    }

    #[tokio::test]
    async fn test_route_perms_enforced() {
        let mut cfg = config();
        cfg.auth
            .route_perms
            .insert("/auth/list-things".into(), vec!["things:r".into()]);
        cfg.auth.users.push(crate::config::SeedUser {
            email: "ro@example.com".into(),
            roles: vec![],
            tokens: vec!["static-ro".into()],
        });
        let server = ServerBuilder::new()
            .with_config(cfg)
            .with_transport(Arc::new(Echo))
            .build()
            .unwrap();

        let res = server
            .router()
            .oneshot(request("/auth/list-things", Some("static-ro")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "ERR_AUTH_FAIL_NO_PERMS");

        // Unprotected routes are unaffected.
        let res = server
            .router()
            .oneshot(request("/auth/site", Some("static-ro")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
