use std::path::PathBuf;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use axum_partial_content::{Config, FileBody, PartialContent};

#[derive(Debug, Deserialize)]
struct FileRequest {
    path: PathBuf,
}

async fn get_file(Query(request): Query<FileRequest>) -> Response {
    match FileBody::open(&request.path).await {
        Ok(body) => body.into_content().into_response(),
        Err(e) => (StatusCode::NOT_FOUND, format!("{}: {e}", request.path.display())).into_response(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config: Config = match std::env::var("PARTIAL_CONTENT_CONFIG") {
        Ok(json) => serde_json::from_str(&json)?,
        Err(_) => Config::default(),
    };

    let router = Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/file", get(get_file));
    let app = PartialContent::new(config)?.install(router);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!(addr = %listener.local_addr()?, "serving /file?path=...");
    axum::serve(listener, app).await?;
    Ok(())
}
