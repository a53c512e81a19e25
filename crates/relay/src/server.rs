//! Relay HTTP server.
//!
//! Serves `POST /upload/{name}`, `GET /files/{name}` and `GET /health`
//! on top of a [`FileStore`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use apkrelay_protocol::constants::{FILES_ROUTE, HEALTH_ROUTE, UPLOAD_ROUTE};
use apkrelay_protocol::{ErrorResponse, StageResponse};
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::encode_segment;
use crate::error::RelayError;
use crate::store::FileStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (`0.0.0.0:8000`, or port 0 for OS-assigned).
    pub bind: String,
    /// Externally reachable base URL used in returned handles.
    ///
    /// Defaults to `http://<bound address>` when unset.
    pub public_url: Option<String>,
    /// Directory holding staged payloads.
    pub storage_dir: PathBuf,
    /// Accepted extensions (empty = any).
    pub allowed_extensions: Vec<String>,
    /// Largest accepted upload in bytes (0 = unlimited).
    pub max_upload_size: u64,
}

#[derive(Clone)]
struct RelayState {
    store: Arc<FileStore>,
    public_url: Arc<str>,
}

/// Builds the relay router around `store`.
pub fn router(store: Arc<FileStore>, public_url: &str) -> Router {
    let state = RelayState {
        store,
        public_url: Arc::from(public_url.trim_end_matches('/')),
    };

    Router::new()
        .route(HEALTH_ROUTE, get(health))
        .route(&format!("{UPLOAD_ROUTE}/{{name}}"), post(upload))
        .route(&format!("{FILES_ROUTE}/{{name}}"), get(download))
        // The store enforces its own size limit while streaming.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn upload(
    State(state): State<RelayState>,
    Path(name): Path<String>,
    body: Body,
) -> Result<Json<StageResponse>, RelayError> {
    let name = state.store.check_name(&name)?;
    let size = state.store.put(&name, body.into_data_stream()).await?;

    let url = format!(
        "{}{FILES_ROUTE}/{}",
        state.public_url,
        encode_segment(&name)
    );
    info!(name = %name, size, url = %url, "payload staged");
    Ok(Json(StageResponse { url }))
}

async fn download(
    State(state): State<RelayState>,
    Path(name): Path<String>,
) -> Result<Response, RelayError> {
    let (file, len) = state.store.open_file(&name).await?;
    info!(name = %name, size = len, "serving staged payload");

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| RelayError::Unavailable(e.to_string()))
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Rejected(_) => StatusCode::BAD_REQUEST,
            RelayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Unavailable(_) | RelayError::Io(_) => {
                error!(error = %self, "relay request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// A bound relay server, ready to [`run`](Self::run).
pub struct RelayServer {
    listener: TcpListener,
    app: Router,
    local_addr: SocketAddr,
    public_url: String,
}

impl RelayServer {
    /// Opens the store and binds the listener.
    pub async fn bind(config: &ServerConfig) -> Result<Self, RelayError> {
        let store = FileStore::open(
            config.storage_dir.clone(),
            config.allowed_extensions.clone(),
            config.max_upload_size,
        )
        .await?;

        let listener = TcpListener::bind(&config.bind).await?;
        let local_addr = listener.local_addr()?;
        let public_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{local_addr}"));

        let app = router(Arc::new(store), &public_url);

        Ok(Self {
            listener,
            app,
            local_addr,
            public_url,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the base URL advertised in retrieval handles.
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Serves until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        info!(addr = %self.local_addr, public_url = %self.public_url, "relay server listening");

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("relay server stopped");
        Ok(())
    }
}
