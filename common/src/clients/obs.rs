// Review system client (OBS request reviews)

use super::{endpoint, HttpClient, ReviewSystem};
use crate::errors::ClientError;
use async_trait::async_trait;
use tracing::instrument;

pub struct ObsClient {
    http: HttpClient,
    base_url: String,
    user: String,
    password: String,
}

impl ObsClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl ReviewSystem for ObsClient {
    #[instrument(skip(self, message))]
    async fn accept_review(
        &self,
        request: u64,
        group: &str,
        message: &str,
    ) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, &format!("request/{}", request));
        self.http
            .send(&url, || {
                self.http
                    .inner()
                    .post(&url)
                    .query(&[
                        ("cmd", "changereviewstate"),
                        ("newstate", "accepted"),
                        ("by_group", group),
                    ])
                    .basic_auth(&self.user, Some(&self.password))
                    .body(message.to_string())
            })
            .await?;
        Ok(())
    }
}
