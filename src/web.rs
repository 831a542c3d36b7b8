use crate::{
    app::{App, AppError, FoundIngest, LostReport, NotificationsResponse, SearchHit, SearchRequest},
    eid::Eid,
    items::{FoundItem, LostItem},
    matching::reverse::MatchAlert,
};
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, path::Path, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

async fn start_app(app: App) {
    let listen_addr = app.config().listen_addr.clone();
    let uploads_dir = Path::new(app.config().base_path()).join("uploads");

    let shared_state = Arc::new(SharedState { app: Arc::new(app) });

    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    let router = Router::new()
        .nest_service(
            "/api/file/",
            tower_http::services::ServeDir::new(uploads_dir),
        )
        .route("/api/found-item", post(found_item))
        .route("/api/report-lost", post(report_lost))
        .route("/api/search-lost", post(search_lost))
        .route("/api/claim-item", post(claim_item))
        .route("/api/get-notifications", get(get_notifications))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .expect("failed to bind listen address");
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

pub fn start_daemon(app: App) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async { start_app(app).await });
}

// Wrapper so axum can turn `AppError` into a response.
#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            AppError::Validation(_) | AppError::QueryTooVague(_) | AppError::Combine(_) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::NotFoundOrAlreadyClaimed => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": self.0.to_string()}).to_string(),
            ),
            AppError::Embedding(_) | AppError::Vision(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
            AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": self.0.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn decode_images(images_b64: Vec<String>) -> Result<Vec<Vec<u8>>, HttpError> {
    images_b64
        .into_iter()
        .map(|b64| {
            STANDARD
                .decode(b64)
                .map_err(|err| HttpError(AppError::Validation(format!("invalid image: {err}"))))
        })
        .collect()
}

#[derive(Deserialize, Serialize)]
pub struct FoundItemRequest {
    pub images_b64: Vec<String>,
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
}

impl Debug for FoundItemRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FoundItemRequest {{ images_b64: [{} image(s)], location: {:?}, lat: {:?}, lng: {:?}, contact_info: [REDACTED] }}",
            self.images_b64.len(),
            self.location,
            self.lat,
            self.lng
        )
    }
}

#[derive(Debug, Serialize)]
pub struct FoundItemResponse {
    pub item: FoundItem,
    pub match_alert: Option<MatchAlertResponse>,
}

#[derive(Debug, Serialize)]
pub struct MatchAlertResponse {
    pub found_match: bool,
    pub contact_info: String,
}

impl From<MatchAlert> for MatchAlertResponse {
    fn from(alert: MatchAlert) -> Self {
        Self {
            found_match: true,
            contact_info: alert.contact_info,
        }
    }
}

async fn found_item(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<FoundItemRequest>,
) -> Result<axum::Json<FoundItemResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let images = decode_images(payload.images_b64)?;

    tokio::task::block_in_place(move || {
        let (item, alert) = app.ingest_found(FoundIngest {
            images,
            location: payload.location,
            lat: payload.lat,
            lng: payload.lng,
            contact_info: payload.contact_info,
        })?;

        Ok(FoundItemResponse {
            item,
            match_alert: alert.map(Into::into),
        }
        .into())
    })
}

#[derive(Deserialize, Serialize)]
pub struct ReportLostRequest {
    pub description: String,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub contact_info: String,
    #[serde(default)]
    pub images_b64: Vec<String>,
    #[serde(default)]
    pub alert_enabled: bool,
}

impl Debug for ReportLostRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ReportLostRequest {{ description: {:?}, location: {:?}, lat: {:?}, lng: {:?}, contact_info: [REDACTED], images_b64: [{} image(s)], alert_enabled: {:?} }}",
            self.description,
            self.location,
            self.lat,
            self.lng,
            self.images_b64.len(),
            self.alert_enabled
        )
    }
}

async fn report_lost(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ReportLostRequest>,
) -> Result<axum::Json<LostItem>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let images = decode_images(payload.images_b64)?;

    tokio::task::block_in_place(move || {
        app.report_lost(LostReport {
            description: payload.description,
            location: payload.location,
            lat: payload.lat,
            lng: payload.lng,
            contact_info: payload.contact_info,
            images,
            alert_enabled: payload.alert_enabled,
        })
        .map(Into::into)
        .map_err(Into::into)
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchLostRequest {
    pub description: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Search radius in miles
    pub radius: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SearchLostResponse {
    pub results: Vec<SearchHit>,
}

async fn search_lost(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchLostRequest>,
) -> Result<axum::Json<SearchLostResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let results = app.search_found(SearchRequest {
            query: payload.description,
            lat: payload.lat,
            lng: payload.lng,
            radius_miles: payload.radius,
        })?;

        Ok(SearchLostResponse { results }.into())
    })
}

#[derive(Deserialize, Serialize)]
pub struct ClaimItemRequest {
    pub item_id: Eid,
    pub claimer_contact: String,
}

impl Debug for ClaimItemRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClaimItemRequest {{ item_id: {}, claimer_contact: [REDACTED] }}",
            self.item_id
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimItemResponse {
    pub message: String,
    pub finder_contact: String,
}

async fn claim_item(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ClaimItemRequest>,
) -> Result<axum::Json<ClaimItemResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let outcome = app.claim(&payload.item_id, &payload.claimer_contact)?;

        Ok(ClaimItemResponse {
            message: "Item claimed successfully! Contact the finder to arrange pickup.".to_string(),
            finder_contact: outcome.finder_contact,
        }
        .into())
    })
}

#[derive(Debug, Deserialize)]
pub struct NotificationsParams {
    pub token: String,
}

async fn get_notifications(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<NotificationsParams>,
) -> Result<axum::Json<NotificationsResponse>, HttpError> {
    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        app.notifications(&params.token)
            .map(Into::into)
            .map_err(Into::into)
    })
}
