//! The transparent reverse proxy.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use http::uri::Scheme;
use http::{Request, StatusCode, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use pin_project_lite::pin_project;
use tokio::net::TcpListener;
use tokio::sync::OwnedRwLockReadGuard;
use tower_http::trace::TraceLayer;

use super::gate::{Gate, GateState};
use crate::Result;

/// Hop-by-hop headers never forwarded in either direction. `Trailer` is
/// not in this set: announced trailers pass through.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Shared state captured by the proxy handler.
pub struct ProxyState {
    gate: Gate,
    client: Client<HttpConnector, Body>,
}

impl ProxyState {
    #[must_use]
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum ForwardError {
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] http::Error),
    #[error("{0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Build the proxy router: every method and path falls through to the
/// forwarding handler.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the proxy on an already-bound listener until the process exits.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn serve(listener: TcpListener, state: Arc<ProxyState>) -> Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Forward one request to the current service generation.
///
/// Acquires the gate shared (blocking during rebuilds and before the
/// first build), then either serves the recorded error as a 502 or proxies
/// to the backend. The shared lease is held until the response body has
/// been fully streamed.
async fn forward(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let lease = state.gate.shared_owned().await;

    if let Some(body) = &lease.error_response {
        return (StatusCode::BAD_GATEWAY, body.clone()).into_response();
    }

    // built_once is set and there is no error, so a generation has passed
    // its health check and published its authority.
    let Some(backend) = &lease.backend else {
        return (StatusCode::BAD_GATEWAY, "lrt: no service generation available\n")
            .into_response();
    };
    let authority = backend.authority.clone();

    match proxy_request(&state, &authority, peer, request, lease).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "proxy request failed");
            (StatusCode::BAD_GATEWAY, format!("lrt: {err}\n")).into_response()
        }
    }
}

async fn proxy_request(
    state: &ProxyState,
    authority: &str,
    peer: SocketAddr,
    request: Request<Body>,
    lease: OwnedRwLockReadGuard<GateState>,
) -> std::result::Result<Response, ForwardError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()?;

    strip_hop_headers(&mut parts.headers);
    append_forwarded_for(&mut parts.headers, peer);

    let upstream = state.client.request(Request::from_parts(parts, body)).await?;

    let (mut parts, incoming) = upstream.into_parts();
    strip_hop_headers(&mut parts.headers);

    // The lease rides inside the body so the gate stays held shared until
    // the last frame (data or trailers) has been written to the client.
    let body = Body::new(GuardedBody {
        inner: incoming,
        _lease: lease,
    });
    Ok(Response::from_parts(parts, body))
}

/// Remove hop-by-hop headers: the fixed set plus anything named in the
/// `Connection` header.
fn strip_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse().ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Append the client address to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

pin_project! {
    /// An upstream response body that owns a shared gate lease.
    struct GuardedBody {
        #[pin]
        inner: Incoming,
        _lease: OwnedRwLockReadGuard<GateState>,
    }
}

impl http_body::Body for GuardedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<http_body::Frame<Self::Data>, Self::Error>>> {
        self.project().inner.poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}
