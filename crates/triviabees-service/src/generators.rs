//! Typed entry points for the generation kinds the app uses.

use serde_json::{Map, Value, json};

use crate::coordinator::{GenerationResult, RequestCoordinator};

pub const TEXT_TO_IMAGE: &str = "text-to-image";
pub const IMAGE_TO_IMAGE: &str = "image-to-image";
pub const DESCRIBE_IMAGE: &str = "describe-image";
pub const DESCRIBE_VIDEO: &str = "describe-video";

/// Priority of requests that build on an existing asset.
const DERIVED_PRIORITY: i32 = 1;

impl RequestCoordinator {
    /// Generates an image from `prompt`.
    ///
    /// With a `reference_image`, this is an `image-to-image` request and gets a higher priority
    /// than plain `text-to-image`.
    pub async fn generate_image(
        &self,
        prompt: &str,
        style: Option<&str>,
        reference_image: Option<&str>,
    ) -> GenerationResult {
        let mut payload = Map::new();
        payload.insert("prompt".into(), Value::from(prompt));
        if let Some(style) = style {
            payload.insert("style".into(), Value::from(style));
        }

        match reference_image {
            Some(url) => {
                payload.insert("referenceImage".into(), Value::from(url));
                self.request(IMAGE_TO_IMAGE, Value::Object(payload), DERIVED_PRIORITY)
                    .await
            }
            None => self.request(TEXT_TO_IMAGE, Value::Object(payload), 0).await,
        }
    }

    pub async fn describe_image(&self, image_url: &str) -> GenerationResult {
        self.request(
            DESCRIBE_IMAGE,
            json!({ "imageUrl": image_url }),
            DERIVED_PRIORITY,
        )
        .await
    }

    pub async fn describe_video(&self, video_url: &str) -> GenerationResult {
        self.request(
            DESCRIBE_VIDEO,
            json!({ "videoUrl": video_url }),
            DERIVED_PRIORITY,
        )
        .await
    }
}
