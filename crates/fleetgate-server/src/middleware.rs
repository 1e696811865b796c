use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use fleetgate_auth::middleware::bearer_token;
use uuid::Uuid;

use crate::server::AppState;

const REQUEST_ID: &str = "x-request-id";

/// Propagates `x-request-id`, generating one when the client sent none.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID);

    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(value) => value,
            Err(_) => return next.run(req).await,
        },
    };

    req.extensions_mut().insert(req_id_value.clone());
    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

pub async fn http_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started = Instant::now();

    let res = next.run(req).await;
    crate::metrics::record_http_request(&method, &path, res.status().as_u16(), started.elapsed());
    res
}

/// Enforces `auth.route_perms` for the matched route.
///
/// A protected route needs the write flag plus any one of its permissions.
/// The resolved caller is stored in the request extensions for the handler.
pub async fn route_permissions(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let required = req
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| state.config.auth.route_perms.get(path.as_str()));
    let Some(required) = required else {
        return next.run(req).await;
    };
    let required: Vec<&str> = required.iter().map(String::as_str).collect();

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = match state
        .auth
        .authenticate(bearer_token(req.headers()), req.headers(), peer)
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = state.auth.require_perms(&ctx, &required).await {
        return e.into_response();
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}
