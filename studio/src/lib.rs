//! HTTP front end for the sleep-audio studio: lecture generation plus the
//! upload and catalogue routes for the two audio libraries.

pub mod documents;
pub mod error;
pub mod extract;
pub mod routes;
pub mod storage;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use narrator::{Config, GenerationError, LecturePipeline, TextGenerator};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::documents::DocumentStore;
use crate::error::ApiError;
use crate::storage::{BlobStore, LocalBlobStore, UrlSigner};

pub const BODY_LIMIT: usize = 100 * 1024 * 1024;

/// Story generation, or the reason it is unavailable. File routes work either way.
#[derive(Clone)]
pub enum StoryService {
    Ready(Arc<LecturePipeline>),
    Unavailable(String),
}

impl StoryService {
    pub fn from_generator(
        generator: Result<Arc<dyn TextGenerator>, GenerationError>,
        config: &Config,
    ) -> Self {
        match generator {
            Ok(llm) => StoryService::Ready(Arc::new(LecturePipeline::new(llm, config.generation.clone()))),
            Err(e) => {
                tracing::error!("Story generation disabled: {}", e);
                StoryService::Unavailable(e.to_string())
            }
        }
    }

    pub fn pipeline(&self) -> Result<&LecturePipeline, ApiError> {
        match self {
            StoryService::Ready(pipeline) => Ok(pipeline.as_ref()),
            StoryService::Unavailable(reason) => {
                Err(GenerationError::Configuration(reason.clone()).into())
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub blobs: Arc<dyn BlobStore>,
    pub documents: DocumentStore,
    pub signer: UrlSigner,
    pub stories: StoryService,
}

impl AppState {
    pub fn new(blobs: Arc<dyn BlobStore>, signer: UrlSigner, stories: StoryService) -> Self {
        Self {
            documents: DocumentStore::new(blobs.clone()),
            blobs,
            signer,
            stories,
        }
    }
}

pub fn build_router(state: AppState, media_root: &Path, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/api/files", get(routes::files::list_files).delete(routes::files::delete_file))
        .route("/api/files/upload", post(routes::files::upload_file))
        .route("/api/files/signed-url", post(routes::files::signed_url))
        .route("/api/files/update-json", post(routes::files::update_json))
        .route("/api/files/update-category", post(routes::files::update_category))
        .route("/api/files/toggle-new", post(routes::files::toggle_new))
        .route("/api/files/update-image", post(routes::files::update_image))
        .route("/api/blobs/{*key}", put(routes::blobs::signed_put))
        .route("/api/stories/generate", post(routes::stories::generate))
        .route("/api/stories/topics", get(routes::stories::topics))
        .nest_service("/media", ServeDir::new(media_root))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => app.fallback_service(
            ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html"))),
        ),
        None => app,
    };

    app.layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
}

/// Runs the server from config until the process is stopped.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.storage.root)
        .await
        .with_context(|| format!("failed to create media dir {}", config.storage.root.display()))?;

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
    ));
    let secret = match &config.storage.signing_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!("No storage.signing_secret set; signed URLs will not survive a restart");
            UrlSigner::random_secret()
        }
    };
    let signer = UrlSigner::new(secret, config.server.base_url(), config.storage.signed_url_ttl_secs);
    let stories = StoryService::from_generator(narrator::build_generator(&config), &config);

    let state = AppState::new(blobs, signer, stories);
    let app = build_router(state, &config.storage.root, config.server.static_dir.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
