use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use super::{EmbeddingError, ImageEmbedder};

/// Image embedding model served over HTTP.
pub struct ApiImageEmbedder {
    api_url: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedImageRequest {
    /// Base64-encoded PNG.
    image: String,
    format: &'static str,
}

#[derive(Deserialize)]
struct EmbedImageResponse {
    embedding: Vec<f32>,
}

impl ApiImageEmbedder {
    pub fn new(api_url: &str, dimensions: usize, timeout: Duration) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            dimensions,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/embed/image", self.api_url)
    }
}

/// The model expects RGB input; alpha and palette images are converted first.
fn encode_png(image: &DynamicImage) -> Result<String, EmbeddingError> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

/// Values outside f32 range decode to infinity and cannot be stored.
fn validate_embedding(embedding: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
    if embedding.len() != dimensions {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: embedding.len(),
        });
    }
    if let Some(i) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(EmbeddingError::Decode(format!(
            "non-finite value at index {i}"
        )));
    }
    Ok(embedding)
}

#[async_trait]
impl ImageEmbedder for ApiImageEmbedder {
    async fn generate(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedImageRequest {
            image: encode_png(image)?,
            format: "png",
        };

        let resp = self
            .http_client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api { status, body });
        }

        let response: EmbedImageResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        validate_embedding(response.embedding, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
