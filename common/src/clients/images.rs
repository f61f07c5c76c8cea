// Image lookup client: tools-image overviews, image index and PINT listings

use super::{HttpClient, ImageSource, PintImage, ToolsBuild};
use crate::errors::ClientError;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BuildResults {
    #[serde(default)]
    build_results: Vec<ToolsBuild>,
}

#[derive(Debug, Deserialize)]
struct PintListing {
    #[serde(default)]
    images: Vec<PintImage>,
}

pub struct ImageClient {
    http: HttpClient,
    index_url: Option<String>,
}

impl ImageClient {
    pub fn new(http: HttpClient, index_url: Option<String>) -> Self {
        Self { http, index_url }
    }
}

#[async_trait]
impl ImageSource for ImageClient {
    async fn tools_builds(&self, query_url: &str) -> Result<Vec<ToolsBuild>, ClientError> {
        let results: BuildResults = self
            .http
            .json(query_url, || self.http.inner().get(query_url))
            .await?;
        Ok(results.build_results)
    }

    async fn image_index(&self) -> Result<Vec<String>, ClientError> {
        let url = self
            .index_url
            .as_deref()
            .ok_or_else(|| ClientError::Setup("No image index configured".to_string()))?;
        self.http.json(url, || self.http.inner().get(url)).await
    }

    async fn pint_images(
        &self,
        query_url: &str,
        state: &str,
    ) -> Result<Vec<PintImage>, ClientError> {
        let url = format!("{}{}.json", query_url, state);
        let listing: PintListing = self.http.json(&url, || self.http.inner().get(&url)).await?;
        Ok(listing.images)
    }
}
