//! Inbound HTTP contract: status and body mapping for scan results.
//!
//! Request body is the raw image. Successful scans, including "no text
//! detected", answer 200 with the `FinalResult` JSON; validation failures
//! answer 400 and unexpected faults 500. Routing is left to the embedding
//! server.

pub mod error;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::result::FinalResult;
use crate::pipeline::orchestrator::Orchestrator;

pub use error::{ApiError, ErrorBody, ErrorDetail};

impl IntoResponse for FinalResult {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Handler for a scan endpoint. Mount with e.g.
/// `Router::new().route("/scan", post(scan_handler)).with_state(orchestrator)`.
pub async fn scan_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Bytes,
) -> Result<FinalResult, ApiError> {
    if body.is_empty() {
        return Err(ApiError::EmptyBody);
    }
    Ok(orchestrator.scan(&body).await?)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageOutputFormat, Luma};

    use super::*;
    use crate::config::ScanConfig;
    use crate::pipeline::barcode::MockBarcodeDetector;
    use crate::pipeline::extraction::{MockOcrEngine, PageSegMode, Variant};
    use crate::pipeline::lookup::MockProductLookup;

    fn scanner(ocr: MockOcrEngine) -> Arc<Orchestrator> {
        let config = ScanConfig {
            variants: vec![Variant::Standard],
            psm_modes: vec![PageSegMode::SingleBlock],
            max_workers: 1,
            ..ScanConfig::default()
        };
        Arc::new(Orchestrator::new(
            config,
            Arc::new(MockBarcodeDetector::empty()),
            Arc::new(MockProductLookup::new()),
            Arc::new(ocr),
        ))
    }

    fn gray_png() -> Bytes {
        let img = image::GrayImage::from_fn(760, 40, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(cursor.into_inner())
    }

    async fn json_of(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn no_text_is_200_with_success_false() {
        let result = scan_handler(State(scanner(MockOcrEngine::blank())), gray_png())
            .await
            .unwrap();
        let response = result.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["method"], "ocr");
        assert!(json["data"].is_null());
    }

    #[tokio::test]
    async fn ocr_success_body() {
        let ocr = MockOcrEngine::new("Serving size: 30g Sugars 12g", 77.0);
        let response = scan_handler(State(scanner(ocr)), gray_png())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_of(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["servingSize"]["value"], "30g");
        assert_eq!(json["data"]["nutritionFacts"]["sugars"]["value"], 12.0);
        assert_eq!(json["rawText"], "Serving size: 30g Sugars 12g");
    }

    #[tokio::test]
    async fn garbage_body_is_400() {
        let response = scan_handler(
            State(scanner(MockOcrEngine::blank())),
            Bytes::from(vec![7u8; 512]),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_body_is_400() {
        let response = scan_handler(State(scanner(MockOcrEngine::blank())), Bytes::new())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_of(response).await["error"]["code"], "EMPTY_BODY");
    }
}
