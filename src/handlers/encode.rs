//! # WAV Encoding Endpoint
//!
//! `POST /api/v1/encode` turns a JSON sample buffer into a 16-bit PCM WAV file.
//!
//! ## Request:
//! ```json
//! { "samples": [0.0, 0.5, -0.5], "channels": 1, "sample_rate": 16000 }
//! ```
//!
//! ## Response:
//! `audio/wav` bytes, 44-byte header followed by the sample data.

use crate::audio::{AudioBuffer, WavEncoder};
use crate::error::AppError;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct EncodeRequest {
    pub samples: Vec<f32>,
    #[serde(default = "default_channels")]
    pub channels: u16,
    pub sample_rate: u32,
}

fn default_channels() -> u16 {
    1
}

pub async fn encode_wav(body: web::Json<EncodeRequest>) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let buffer = AudioBuffer::new(request.samples, request.channels, request.sample_rate)?;
    let wav = WavEncoder::encode(&buffer)?;

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(("content-disposition", "attachment; filename=\"encoded.wav\""))
        .body(wav.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_encode_endpoint() {
        let app =
            test::init_service(App::new().route("/encode", web::post().to(encode_wav))).await;

        let req = test::TestRequest::post()
            .uri("/encode")
            .set_json(json!({"samples": [1.0, -1.0], "channels": 1, "sample_rate": 8000}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "audio/wav");

        let bytes = test::read_body(resp).await;
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[44..], &[0xFF, 0x7F, 0x01, 0x80]);
    }

    #[actix_web::test]
    async fn test_encode_rejects_ragged_frames() {
        let app =
            test::init_service(App::new().route("/encode", web::post().to(encode_wav))).await;

        let req = test::TestRequest::post()
            .uri("/encode")
            .set_json(json!({"samples": [0.1, 0.2, 0.3], "channels": 2, "sample_rate": 8000}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "invalid_audio");
    }
}
