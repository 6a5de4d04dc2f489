use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MigrateError, MigrateResult, System};
use crate::report::RunReport;
use crate::source::MediaRow;

/// Downloaded image bytes plus the reported Content-Type.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> MigrateResult<FetchedAsset>;
}

/// Plain HTTP GET against the source media directory.
#[derive(Debug, Clone)]
pub struct HttpAssets {
    http: Client,
}

impl HttpAssets {
    pub fn new(timeout: Duration) -> MigrateResult<Self> {
        let http = Client::builder()
            .user_agent("mage-migrate/0.1 (media)")
            .timeout(timeout)
            .build()
            .map_err(|e| MigrateError::connection(System::Assets, e))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssets {
    async fn fetch(&self, url: &str) -> MigrateResult<FetchedAsset> {
        let fail = |reason: String| MigrateError::fetch("image", url, reason);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(fail(format!("http {status}")));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = resp.bytes().await.map_err(|e| fail(e.to_string()))?;
        Ok(FetchedAsset {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// `{magento_domain}/media/catalog/product/{file}`.
pub fn media_url(magento_domain: &str, file: &str) -> String {
    format!(
        "{}/media/catalog/product/{}",
        magento_domain.trim_end_matches('/'),
        file.trim_start_matches('/')
    )
}

pub fn build_media_entry(row: &MediaRow, url: &str, asset: &FetchedAsset) -> Value {
    let name = url.rsplit('/').next().unwrap_or_default();
    json!({
        "media_type": "image",
        "label": row.label.clone().unwrap_or_default(),
        "position": row.position.unwrap_or(0),
        "disabled": row.disabled,
        "types": ["image", "small_image", "thumbnail", "swatch_image"],
        "file": row.file,
        "content": {
            "base64_encoded_data": base64::engine::general_purpose::STANDARD.encode(&asset.bytes),
            "type": asset.content_type,
            "name": name
        },
        "extension_attributes": {"video_content": {}}
    })
}

/// Fetch and embed every gallery image. A failed fetch drops that entry and
/// lands in the report; it never produces a placeholder.
pub async fn build_media_entries(
    rows: &[MediaRow],
    magento_domain: &str,
    fetcher: &dyn AssetFetcher,
    sku: &str,
    report: &mut RunReport,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let url = media_url(magento_domain, &row.file);
        match fetcher.fetch(&url).await {
            Ok(asset) => {
                debug!(sku, %url, bytes = asset.bytes.len(), "media: embedded");
                out.push(build_media_entry(row, &url, &asset));
            }
            Err(e) => report.record_image_error(sku, &url, &e.to_string()),
        }
    }
    out
}
