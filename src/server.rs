//! HTTP server: accept loop, request routing, and response logging

use crate::error::{html_error_response, ErrorClass, INVALID_PROJECT_ID};
use crate::resolver::{self, Resolution};
use crate::state::AppState;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Path prefix served directly from disk
const STATIC_PREFIX: &str = "/static/";

/// Project id logged for static asset requests
const STATIC_PROJECT_ID: &str = "STATIC";

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// The splash HTTP server
pub struct SplashServer {
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SplashServer {
    /// Bind the listener. A bind failure here is fatal to startup; no
    /// partial state is published.
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<AppState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

        Ok(Self {
            listener,
            state,
            shutdown_rx,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, "Splash server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Splash server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(stream: S, state: Arc<AppState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let start = Instant::now();

    // One consistent snapshot per request; a reload mid-flight swaps the
    // published reference without affecting this borrow.
    let snapshot = state.snapshot();
    let ctx = snapshot.render_ctx();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(hostname) = extract_hostname(&req) else {
        let response = html_error_response(&snapshot.pages, &ctx, ErrorClass::NotFound);
        log_request(&method, &path, "", INVALID_PROJECT_ID, response.status(), start);
        return Ok(response);
    };

    // Static assets are served from ./static relative to the site root
    if method == Method::GET && path.starts_with(STATIC_PREFIX) {
        let response = match read_static(&state, &path).await {
            Ok((bytes, content_type)) => Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, content_type)
                .body(full_body(bytes))
                .expect("valid response with StatusCode enum and static headers"),
            Err(class) => html_error_response(&snapshot.pages, &ctx, class),
        };
        log_request(&method, &path, &hostname, STATIC_PROJECT_ID, response.status(), start);
        return Ok(response);
    }

    // Project resolution applies to the root path only
    if method == Method::GET && path == "/" {
        match resolver::resolve(&snapshot.registry, &snapshot.pages, &ctx, &hostname) {
            Resolution::Redirect {
                location,
                dest,
                project_id,
            } => {
                let response = redirect_response(&location);
                log_redirect(
                    &method,
                    &path,
                    &hostname,
                    &dest,
                    &project_id,
                    StatusCode::FOUND,
                    start,
                );
                return Ok(response);
            }
            Resolution::Content { body, project_id } => {
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "text/html; charset=utf-8")
                    .body(full_body(Bytes::from(body)))
                    .expect("valid response with StatusCode enum and static headers");
                log_request(&method, &path, &hostname, &project_id, StatusCode::OK, start);
                return Ok(response);
            }
        }
    }

    // Unknown method or path
    let response = html_error_response(&snapshot.pages, &ctx, ErrorClass::NotFound);
    log_request(&method, &path, &hostname, INVALID_PROJECT_ID, response.status(), start);
    Ok(response)
}

/// Read a static asset, mapping failures to a response class
async fn read_static(state: &AppState, path: &str) -> Result<(Bytes, String), ErrorClass> {
    // Reject traversal before touching the filesystem
    let rel = path.trim_start_matches('/');
    if rel.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(ErrorClass::NotFound);
    }

    let file_path = state.root().join(rel);
    match tokio::fs::read(&file_path).await {
        Ok(bytes) => {
            let content_type = mime_guess::from_path(&file_path)
                .first_or_octet_stream()
                .to_string();
            Ok((Bytes::from(bytes), content_type))
        }
        Err(e) => {
            debug!(path = %file_path.display(), error = %e, "Static asset read failed");
            Err(ErrorClass::from_io(&e))
        }
    }
}

fn full_body(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

fn redirect_response(location: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(hyper::header::LOCATION, location)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and Location header")
}

fn extract_hostname<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            // Strip port if present
            let hostname = h.split(':').next()?;

            if hostname.len() > MAX_HOSTNAME_LEN {
                return None;
            }

            // Alphanumeric, hyphen, and dot only; rejects log injection
            if !hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return None;
            }

            Some(hostname.to_lowercase())
        })
}

fn log_request(
    method: &Method,
    path: &str,
    hostname: &str,
    project_id: &str,
    status: StatusCode,
    start: Instant,
) {
    info!(
        method = %method,
        path,
        hostname,
        project_id,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request handled"
    );
}

fn log_redirect(
    method: &Method,
    path: &str,
    origin: &str,
    dest: &str,
    project_id: &str,
    status: StatusCode,
    start: Instant,
) {
    info!(
        method = %method,
        path,
        origin,
        dest,
        project_id,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request redirected"
    );
}
