use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::SceneData;
use futures_util::future::try_join_all;
use tracing::{debug, info};

/// One fetched scene asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAsset {
    pub url: String,
    pub bytes: usize,
}

#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<LoadedAsset>;
}

/// Fetches assets over HTTP from the server's static directory
#[derive(Debug, Clone, Default)]
pub struct HttpAssetLoader {
    client: reqwest::Client,
}

impl HttpAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetLoader for HttpAssetLoader {
    async fn load(&self, url: &str) -> Result<LoadedAsset> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()
            .with_context(|| format!("Server refused {}", url))?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read {}", url))?;

        Ok(LoadedAsset {
            url: url.to_string(),
            bytes: body.len(),
        })
    }
}

/// Accepts every asset without fetching it, for viewers that only follow the timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

#[async_trait]
impl AssetLoader for ManifestLoader {
    async fn load(&self, url: &str) -> Result<LoadedAsset> {
        Ok(LoadedAsset {
            url: url.to_string(),
            bytes: 0,
        })
    }
}

/// Load every asset of `scene` concurrently. The first failure fails the whole batch.
pub async fn load_scene(loader: &dyn AssetLoader, scene: &SceneData) -> Result<Vec<LoadedAsset>> {
    let urls = scene.asset_urls();
    let total = urls.len();
    let done = AtomicUsize::new(0);
    info!("Loading {} scene assets", total);

    let assets = try_join_all(urls.into_iter().map(|url| {
        let done = &done;
        async move {
            debug!("Loading {}", url);
            let asset = loader.load(url).await?;
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Loaded {} ({} bytes) [{}/{}]", asset.url, asset.bytes, finished, total);
            Ok::<_, anyhow::Error>(asset)
        }
    }))
    .await?;

    info!("Scene ready");
    Ok(assets)
}
