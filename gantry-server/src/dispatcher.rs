use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use gantry_core::error::GatewayError;
use gantry_core::matcher::normalize_path;
use gantry_plugin::chain::Chain;
use gantry_plugin::context::RequestContext;
use gantry_proxy::engine::ProxyEngine;
use gantry_proxy::headers::client_ip;
use gantry_store::snapshot::SnapshotHandle;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use http::{HeaderValue, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// State the dispatcher needs per request: the snapshot pointer and
/// the shared forwarding engine.
#[derive(Clone)]
pub struct DispatchState {
    pub snapshot: Arc<SnapshotHandle>,
    pub engine: Arc<ProxyEngine>,
}

/// The proxying surface: everything that is not an ops endpoint falls
/// through to `dispatch`.
pub fn dispatch_router(state: DispatchState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// One request, end to end: match, BeforeRequest chain, forward,
/// AfterResponse chain, stream.
async fn dispatch(
    State(state): State<DispatchState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let snapshot = state.snapshot.load();
    let request_id = uuid::Uuid::new_v4().to_string();

    let method = req.method().as_str().to_string();
    let path = normalize_path(req.uri().path());
    let query = req.uri().query().map(str::to_string);
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string));

    let matched = match snapshot.matcher.match_request(&method, &path, host.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            debug!(request_id = %request_id, method = %method, path = %path, error = %e, "No route");
            return error_response(&e, &request_id);
        }
    };

    let scheme = req.uri().scheme_str().unwrap_or("http").to_string();
    let (parts, inbound_body) = req.into_parts();
    let client_ip = client_ip(&parts.headers, &peer.to_string());

    let mut ctx = RequestContext::new(
        request_id,
        method,
        path,
        query,
        parts.headers,
        client_ip,
        peer.ip().to_string(),
        host,
        matched.route,
        matched.service,
        matched.params,
    );
    ctx.scheme = scheme;
    echo_request_id(&mut ctx);

    let chain = Chain::build(&snapshot.plugins, &ctx.route, &ctx.service);

    // ── BeforeRequest ───────────────────────────────────────────
    if let Err(e) = chain.run_before(&mut ctx).await {
        error!(
            request_id = %ctx.request_id,
            route_id = %ctx.route.id,
            service_id = %ctx.service.id,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            error = %e,
            "Critical plugin failure"
        );
        return error_response(&e, &ctx.request_id);
    }

    // ── Abort: skip the proxy, observers still run ──────────────
    if ctx.is_aborted() {
        if let Err(e) = chain.run_after(&mut ctx).await {
            error!(request_id = %ctx.request_id, error = %e, "Critical plugin failure");
            return error_response(&e, &ctx.request_id);
        }
        return sink_response(ctx);
    }

    // ── Forward ─────────────────────────────────────────────────
    let outbound_body = request_body(&ctx, inbound_body);
    let upstream = match state.engine.forward(&ctx, outbound_body).await {
        Ok(u) => u,
        Err(e) => {
            ctx.sink.write_header(e.status_code());
            let _ = ctx.sink.set_header("content-type", "application/json");
            ctx.sink.write(&e.to_json_body());
            if let Err(after) = chain.run_after(&mut ctx).await {
                error!(request_id = %ctx.request_id, error = %after, "Critical plugin failure");
                return error_response(&after, &ctx.request_id);
            }
            return sink_response(ctx);
        }
    };

    // Capture the response head. Headers the gateway already set
    // (request id echo, rate-limit counters) overlay the upstream's.
    // AfterResponse runs before the body is handed to the wire, so
    // header writes registered during BeforeRequest still land.
    ctx.sink.write_header(upstream.status);
    let mut head = upstream.headers;
    for (name, value) in ctx.sink.headers() {
        head.insert(name.clone(), value.clone());
    }
    if let Err(e) = ctx.sink.replace_headers(head) {
        error!(request_id = %ctx.request_id, error = %e, "Response head capture failed");
    }

    if let Err(e) = chain.run_after(&mut ctx).await {
        error!(request_id = %ctx.request_id, error = %e, "Critical plugin failure");
        return error_response(&e, &ctx.request_id);
    }

    stream_response(ctx, upstream.body)
}

/// Echo the per-request id on the response.
fn echo_request_id(ctx: &mut RequestContext) {
    let id = ctx.request_id.clone();
    if let Err(e) = ctx.sink.set_header("x-request-id", &id) {
        debug!(error = %e, "Could not echo request id");
    }
}

/// Wrap the inbound body for streaming upstream. Requests without a
/// body (no content-length, no transfer-encoding) forward none.
fn request_body(ctx: &RequestContext, body: Body) -> Option<reqwest::Body> {
    let has_length = ctx
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .is_some_and(|n| n > 0);
    let chunked = ctx.headers.get(TRANSFER_ENCODING).is_some();
    (has_length || chunked).then(|| reqwest::Body::wrap_stream(body.into_data_stream()))
}

/// Materialize a buffered sink (aborts, upstream failures) into a
/// response.
fn sink_response(mut ctx: RequestContext) -> Response {
    let status =
        StatusCode::from_u16(ctx.sink.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = ctx.sink.headers().clone();
    let body = ctx.sink.take_body();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stream the upstream body through, counting bytes into the sink's
/// shared counter. A mid-stream failure truncates the client response
/// and is only visible in logs.
fn stream_response(
    mut ctx: RequestContext,
    body: futures::stream::BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
) -> Response {
    let status =
        StatusCode::from_u16(ctx.sink.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = ctx.sink.headers().clone();
    ctx.sink.commit();

    let counter = ctx.sink.byte_counter();
    let request_id = ctx.request_id.clone();
    let counted = body.map(move |chunk| match chunk {
        Ok(bytes) => {
            counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            Ok(bytes)
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                error = %e,
                "Upstream body failed mid-stream, response truncated"
            );
            Err(e)
        }
    });

    let mut response = Response::new(Body::from_stream(counted));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Small JSON error body with the gateway-chosen status.
fn error_response(err: &GatewayError, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(err.to_json_body()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(v) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}
