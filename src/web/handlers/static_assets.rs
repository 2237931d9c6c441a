//! Embedded static asset serving.

use axum::{
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

/// Serve an embedded asset under `/static/`.
pub async fn serve(Path(path): Path<String>) -> Response {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.as_ref()),
                    (header::CACHE_CONTROL, "public, max-age=3600"),
                ],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use axum_test::TestServer;

    fn create_test_router() -> Router {
        Router::new().route("/static/{*path}", get(serve))
    }

    #[tokio::test]
    async fn test_serve_stylesheet() {
        let app = create_test_router();
        let server = TestServer::new(app).unwrap();

        let response = server.get("/static/main.css").await;

        response.assert_status(StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").map(|v| v.to_str().unwrap()),
            Some("text/css")
        );
        assert_eq!(
            response.headers().get("cache-control").map(|v| v.to_str().unwrap()),
            Some("public, max-age=3600")
        );
        assert!(response.text().contains("body"));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_404() {
        let app = create_test_router();
        let server = TestServer::new(app).unwrap();

        let response = server.get("/static/missing.js").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}
