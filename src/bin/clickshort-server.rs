use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing,
};
use clickshort::{
    config,
    url_service::{
        self, ResolveError, ShortenError, StoreUnavailable, UrlCreationStatus, url_service_capsule,
    },
};
use rearch::Container;
use serde::Serialize;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, instrument};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let app = Router::new()
        .route("/shorten", routing::post(shorten))
        .route("/admin/urls", routing::get(list_urls))
        .route("/admin/stats", routing::get(stats))
        .route("/{short_code}", routing::get(resolve))
        .with_state(container.clone());

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing database connection");
    container.read(config::db_conn_capsule).close().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(?err, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[instrument(skip(container))]
async fn shorten(
    State(container): State<Container>,
    Json(url_service::ShortenPayload { url }): Json<url_service::ShortenPayload>,
) -> impl IntoResponse {
    let public_base_url = container.read(config::public_base_url_capsule);
    container
        .read(url_service_capsule)
        .shorten(&url)
        .await
        .map(|(shortened_url, creation_status)| {
            let short_url = public_base_url
                .map(|base_url| format!("{base_url}/{}", shortened_url.short_code));
            (
                match creation_status {
                    UrlCreationStatus::NewlyCreated => StatusCode::CREATED,
                    UrlCreationStatus::AlreadyExists => StatusCode::OK,
                },
                Json(ShortenResponse {
                    original_url: shortened_url.original_url,
                    short_code: shortened_url.short_code,
                    short_url,
                }),
            )
        })
        .map_err(|error: ShortenError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ShortenError::MissingUrl | ShortenError::InvalidUrl(_) => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    (
                        StatusCode::BAD_REQUEST,
                        Json(Error {
                            error: error.to_string(),
                            error_id: err_uuid.to_string(),
                        }),
                    )
                }
                ShortenError::GenerationExhausted { .. } | ShortenError::StoreUnavailable(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    internal_server_error(err_uuid)
                }
            }
        })
}

#[instrument(skip(container))]
async fn resolve(
    State(container): State<Container>,
    Path(short_code): Path<String>,
) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .resolve(&short_code)
        .await
        .map(|url_service::Redirect { url }| Redirect::temporary(&url))
        .map_err(|error: ResolveError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ResolveError::NotFound => (
                    StatusCode::NOT_FOUND,
                    Json(Error {
                        error: "Not found".to_owned(),
                        error_id: err_uuid.to_string(),
                    }),
                ),
                ResolveError::StoreUnavailable(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    internal_server_error(err_uuid)
                }
            }
        })
}

#[instrument(skip(container))]
async fn list_urls(State(container): State<Container>) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .list_urls()
        .await
        .map(Json)
        .map_err(store_unavailable)
}

#[instrument(skip(container))]
async fn stats(State(container): State<Container>) -> impl IntoResponse {
    container
        .read(url_service_capsule)
        .stats()
        .await
        .map(Json)
        .map_err(store_unavailable)
}

fn store_unavailable(error: StoreUnavailable) -> (StatusCode, Json<Error>) {
    let err_uuid = Uuid::new_v4();
    error!(?err_uuid, ?error, "Encountered an error during a request");
    internal_server_error(err_uuid)
}

fn internal_server_error(err_uuid: Uuid) -> (StatusCode, Json<Error>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Error {
            error: "Internal server error".to_owned(),
            error_id: err_uuid.to_string(),
        }),
    )
}

#[derive(Serialize)]
struct ShortenResponse {
    original_url: String,
    short_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_url: Option<String>,
}

#[derive(Serialize)]
pub struct Error {
    error: String,
    error_id: String,
}
