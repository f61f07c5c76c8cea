// Repository metadata client: channel revisions from repomd.xml

use super::{HttpClient, RepoMetadata};
use crate::errors::ClientError;
use crate::models::{base_version, ArchVer, Channel, Incident};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

lazy_static::lazy_static! {
    static ref REVISION: Result<regex::Regex, regex::Error> =
        regex::Regex::new(r"<revision>\s*([^<\s]+)\s*</revision>");
}

/// Reads published repository metadata below the maintenance download area
pub struct RepoClient {
    http: HttpClient,
    download_base: String,
}

impl RepoClient {
    pub fn new(http: HttpClient, download_base: impl Into<String>) -> Self {
        Self {
            http,
            download_base: download_base.into(),
        }
    }
}

/// Extract the `<revision>` element of a repomd.xml document
pub fn parse_revision(repomd: &str) -> Option<String> {
    REVISION
        .as_ref()
        .ok()?
        .captures(repomd)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[async_trait]
impl RepoMetadata for RepoClient {
    async fn revision(&self, incident: u64, channel: &Channel) -> Result<String, ClientError> {
        let url = format!(
            "{}/repodata/repomd.xml",
            channel.incident_url(&self.download_base, incident)
        );
        let body = self.http.text(&url, || self.http.inner().get(&url)).await?;
        parse_revision(&body).ok_or_else(|| ClientError::Decode {
            url,
            reason: "no <revision> element".to_string(),
        })
    }
}

/// Newest revision per (arch, base version) over all channels of an incident
///
/// Channels whose metadata cannot be read are skipped; an arch without any
/// readable channel gets no entry and is therefore not schedulable.
pub async fn incident_revisions(
    repo: &dyn RepoMetadata,
    incident: &Incident,
) -> HashMap<ArchVer, String> {
    let mut grouped: BTreeMap<ArchVer, Vec<&Channel>> = BTreeMap::new();
    for channel in &incident.channels {
        let key = ArchVer::new(channel.arch.clone(), base_version(&channel.version));
        grouped.entry(key).or_default().push(channel);
    }

    let mut revisions = HashMap::new();
    for (archver, channels) in grouped {
        let mut newest: Option<u64> = None;
        for channel in channels {
            match repo.revision(incident.id, channel).await {
                Ok(raw) => match raw.parse::<u64>() {
                    Ok(rev) => newest = Some(newest.map_or(rev, |n| n.max(rev))),
                    Err(_) => warn!(incident = incident.id, channel = %channel, revision = %raw, "Non-numeric revision"),
                },
                Err(e) => {
                    debug!(incident = incident.id, channel = %channel, error = %e, "No repository metadata for channel");
                }
            }
        }
        if let Some(rev) = newest {
            revisions.insert(archver, rev.to_string());
        }
    }
    revisions
}
