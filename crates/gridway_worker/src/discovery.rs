//! Model inventory discovery against the local inference runtime.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gridway_protocol::wire::TAGS_PATH;
use gridway_protocol::ModelDescriptor;

#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
pub struct TagModel {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
pub struct TagDetails {
    #[serde(default)]
    pub family: Option<String>,
}

/// Query the runtime's model listing and map it into descriptors.
pub async fn fetch_inventory(
    client: &reqwest::Client,
    runtime_url: &str,
) -> Result<Vec<ModelDescriptor>> {
    let url = format!("{}{}", runtime_url.trim_end_matches('/'), TAGS_PATH);
    let tags: TagsResponse = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach runtime at {}", url))?
        .error_for_status()
        .context("Runtime rejected model listing")?
        .json()
        .await
        .context("Malformed model listing")?;
    Ok(to_descriptors(tags))
}

/// Runtimes sometimes omit modification timestamps; fall back to now so the
/// gateway's newest-wins merge still behaves.
pub fn to_descriptors(tags: TagsResponse) -> Vec<ModelDescriptor> {
    tags.models
        .into_iter()
        .map(|model| ModelDescriptor {
            name: model.name,
            modified_at: model.modified_at.unwrap_or_else(Utc::now),
            size_bytes: model.size,
            family: model.details.and_then(|details| details.family),
        })
        .collect()
}
