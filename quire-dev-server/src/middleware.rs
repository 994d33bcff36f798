//! HTTP middleware chain of the dev server.
//!
//! Requests pass through the stages in order: byte range support, public
//! assets mounted under the base path, the history fallback that rewrites
//! client-side routes to the entry document, and finally the compiled bundle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use quire_core::CONFIG_DIR;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::bundle::BundleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareStage {
    Range,
    StaticMount,
    HistoryFallback,
    Bundle,
}

impl fmt::Display for MiddlewareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MiddlewareStage::Range => "range",
            MiddlewareStage::StaticMount => "static mount",
            MiddlewareStage::HistoryFallback => "history fallback",
            MiddlewareStage::Bundle => "bundle",
        };
        f.write_str(name)
    }
}

pub struct MiddlewareChain {
    stages: Vec<MiddlewareStage>,
    base: Arc<str>,
    public_dir: Option<PathBuf>,
    bundle: BundleStore,
}

impl MiddlewareChain {
    /// Assemble the chain for a source tree. The static mount is left out
    /// when `<source>/.vuepress/public` does not exist.
    pub fn build(source_dir: &Path, base: &str, bundle: BundleStore) -> Self {
        let public_dir = source_dir.join(CONFIG_DIR).join("public");
        let public_dir = public_dir.is_dir().then_some(public_dir);

        let mut stages = vec![MiddlewareStage::Range];
        if public_dir.is_some() {
            stages.push(MiddlewareStage::StaticMount);
        }
        stages.push(MiddlewareStage::HistoryFallback);
        stages.push(MiddlewareStage::Bundle);

        tracing::debug!(
            stages = ?stages,
            public = ?public_dir,
            "Built middleware chain"
        );

        Self {
            stages,
            base: Arc::from(base),
            public_dir,
            bundle,
        }
    }

    /// Stages in the order a request passes through them.
    pub fn stages(&self) -> &[MiddlewareStage] {
        &self.stages
    }

    pub fn into_router(self) -> Router {
        let bundle = BundleService {
            base: Arc::clone(&self.base),
            store: self.bundle,
        };

        // Layers added last run first
        let mut router = Router::new()
            .fallback(serve_bundle)
            .with_state(bundle)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.base),
                history_fallback,
            ));

        if let Some(dir) = self.public_dir {
            let mount = StaticMount {
                base: Arc::clone(&self.base),
                dir: ServeDir::new(dir).append_index_html_on_directories(false),
            };
            router = router.layer(middleware::from_fn_with_state(mount, static_mount));
        }

        router.layer(middleware::from_fn(range))
    }
}

/// Outcome of matching a `Range` header against a body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Inclusive start and end offsets.
    Satisfiable(usize, usize),
    Unsatisfiable,
    /// Malformed or multi-range headers; the full body is sent.
    Ignored,
}

/// Parse a single `bytes=` range.
pub fn parse_range(value: &str, len: usize) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Ignored;
    };
    if spec.contains(',') {
        return ByteRange::Ignored;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Ignored;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix range: the last `n` bytes
        return match end.parse::<usize>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if len == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Satisfiable(len.saturating_sub(n), len - 1),
            Err(_) => ByteRange::Ignored,
        };
    }

    let Ok(start) = start.parse::<usize>() else {
        return ByteRange::Ignored;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<usize>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Ignored,
        }
    };

    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    let end = end.map_or(len - 1, |end| end.min(len - 1));
    ByteRange::Satisfiable(start, end)
}

async fn range(request: Request, next: Next) -> Response {
    let requested = if request.method() == Method::GET {
        request.headers().get(header::RANGE).cloned()
    } else {
        None
    };

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let Some(requested) = requested else {
        return response;
    };
    if response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to buffer response for range request: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let len = bytes.len();

    match parse_range(requested.to_str().unwrap_or_default(), len) {
        ByteRange::Satisfiable(start, end) => {
            parts.status = StatusCode::PARTIAL_CONTENT;
            set_header(&mut parts.headers, header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"));
            set_header(&mut parts.headers, header::CONTENT_LENGTH, (end - start + 1).to_string());
            Response::from_parts(parts, Body::from(bytes.slice(start..=end)))
        }
        ByteRange::Unsatisfiable => {
            parts.status = StatusCode::RANGE_NOT_SATISFIABLE;
            set_header(&mut parts.headers, header::CONTENT_RANGE, format!("bytes */{len}"));
            set_header(&mut parts.headers, header::CONTENT_LENGTH, "0".to_string());
            Response::from_parts(parts, Body::from(Bytes::new()))
        }
        ByteRange::Ignored => Response::from_parts(parts, Body::from(bytes)),
    }
}

fn set_header(headers: &mut HeaderMap, name: header::HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

#[derive(Clone)]
struct StaticMount {
    base: Arc<str>,
    dir: ServeDir,
}

async fn static_mount(State(mount): State<StaticMount>, request: Request, next: Next) -> Response {
    let is_read = matches!(*request.method(), Method::GET | Method::HEAD);
    let Some(path) = request
        .uri()
        .path()
        .strip_prefix(&*mount.base)
        .filter(|_| is_read)
    else {
        return next.run(request).await;
    };

    let mut uri = format!("/{path}");
    if let Some(query) = request.uri().query() {
        uri.push('?');
        uri.push_str(query);
    }
    let Ok(uri) = uri.parse::<Uri>() else {
        return next.run(request).await;
    };

    let mut lookup = Request::new(Body::empty());
    *lookup.method_mut() = request.method().clone();
    *lookup.uri_mut() = uri;
    *lookup.headers_mut() = request.headers().clone();

    let response = mount
        .dir
        .oneshot(lookup)
        .await
        .unwrap_or_else(|never| match never {});

    if response.status() == StatusCode::NOT_FOUND {
        return next.run(request).await;
    }
    response.map(Body::new)
}

/// Where the history fallback sends a request, if anywhere.
pub fn history_rewrite(method: &Method, headers: &HeaderMap, uri: &Uri, base: &str) -> Option<Uri> {
    if !matches!(*method, Method::GET | Method::HEAD) {
        return None;
    }

    let accept = headers.get(header::ACCEPT)?.to_str().ok()?;
    if !(accept.contains("text/html") || accept.contains("*/*")) {
        return None;
    }

    let path = uri.path();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    if !path.ends_with(".html") && last_segment.contains('.') {
        return None;
    }

    let target = match uri.query() {
        Some(query) => format!("{base}?{query}"),
        None => base.to_string(),
    };
    target.parse().ok()
}

async fn history_fallback(State(base): State<Arc<str>>, mut request: Request, next: Next) -> Response {
    if let Some(uri) = history_rewrite(request.method(), request.headers(), request.uri(), &base) {
        tracing::trace!(from = %request.uri(), to = %uri, "History fallback rewrite");
        *request.uri_mut() = uri;
    }

    next.run(request).await
}

#[derive(Clone)]
struct BundleService {
    base: Arc<str>,
    store: BundleStore,
}

async fn serve_bundle(State(service): State<BundleService>, method: Method, uri: Uri) -> Response {
    if !matches!(method, Method::GET | Method::HEAD) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let bundle = service.store.load();
    let file = uri
        .path()
        .strip_prefix(&*service.base)
        .and_then(|path| bundle.get(path));

    match file {
        Some(file) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, file.content_type)
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(file.content.clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        None => (StatusCode::NOT_FOUND, format!("File not found: {}", uri.path())).into_response(),
    }
}
