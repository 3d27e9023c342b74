// Statement Ingest - Upload Server
// REST API with Axum: JSON statement uploads plus read-back endpoints

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use statement_ingest::{
    get_all_transactions, get_transactions_by_batch, ingest, setup_database, AppConfig,
    CanonicalTransaction, IngestConfig, IngestError, SqliteStore, UploadResponse,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    ingest: Arc<IngestConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<Vec<CanonicalTransaction>> {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            error: Some(message),
        }
    }
}

fn storage_failure(e: impl std::fmt::Display) -> IngestError {
    IngestError::Storage {
        committed: 0,
        message: e.to_string(),
    }
}

// ============================================================================
// Upload
// ============================================================================

/// Fields pulled out of the multipart body
#[derive(Default)]
struct UploadForm {
    filename: Option<String>,
    bytes: Vec<u8>,
    client_name: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, IngestError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestError::InvalidUpload(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                form.filename = Some(field.file_name().unwrap_or_default().to_string());
                form.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| IngestError::InvalidUpload(e.to_string()))?
                    .to_vec();
            }
            Some("client_name") => {
                form.client_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| IngestError::InvalidUpload(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    Ok(form)
}

/// POST /upload - Ingest one JSON statement file
async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, IngestError> {
    let form = read_form(multipart).await?;

    let filename = form
        .filename
        .ok_or_else(|| IngestError::InvalidUpload("No file provided".to_string()))?;
    if !filename.to_lowercase().ends_with(".json") {
        return Err(IngestError::InvalidUpload(
            "Only JSON files are allowed".to_string(),
        ));
    }

    let client_name = form.client_name;
    let bytes = form.bytes;

    let report = tokio::task::spawn_blocking(move || {
        let conn = state.db.lock().map_err(storage_failure)?;
        let store = SqliteStore::new(&conn);
        ingest(&store, &state.ingest, &filename, &bytes, client_name.as_deref())
    })
    .await
    .map_err(storage_failure)??;

    Ok(Json(report.to_upload_response()))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/transactions - Get all stored transactions
async fn get_transactions(State(state): State<AppState>) -> Response {
    let Ok(conn) = state.db.lock() else {
        return lock_poisoned();
    };

    match get_all_transactions(&conn) {
        Ok(transactions) => (StatusCode::OK, Json(ApiResponse::ok(transactions))).into_response(),
        Err(e) => {
            tracing::error!("Error getting transactions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/batches/:id - Get transactions stored for one work order
async fn get_batch_transactions(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Response {
    let Ok(conn) = state.db.lock() else {
        return lock_poisoned();
    };

    match get_transactions_by_batch(&conn, &batch_id) {
        Ok(transactions) => (StatusCode::OK, Json(ApiResponse::ok(transactions))).into_response(),
        Err(e) => {
            tracing::error!("Error getting transactions for batch {}: {}", batch_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

fn lock_poisoned() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failed("database lock poisoned".to_string())),
    )
        .into_response()
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/transactions", get(get_transactions))
        .route("/batches/:id", get(get_batch_transactions))
        .with_state(state.clone());

    // Build main router
    Router::new()
        .route("/upload", post(upload))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let conn = Connection::open(&config.database_path)?;
    setup_database(&conn)?;
    tracing::info!("Database opened: {}", config.database_path.display());

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        ingest: Arc::new(config.ingest.clone()),
    };

    let app = router(state, config.server.max_upload_bytes);

    // Start server
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Server running on http://{}", addr);
    tracing::info!("   Upload: POST http://{}/upload", addr);
    tracing::info!("   API:    http://{}/api/transactions", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
