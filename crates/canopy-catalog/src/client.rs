//! HTTP client for STAC item search and Planetary Computer asset signing.

use crate::models::{StacItem, StacItemCollection, StacLink, StacSearchParams};
use canopy_core::error::{CanopyError, Result};
use reqwest::Url;
use std::time::Duration;

const PC_HOST: &str = "planetarycomputer.microsoft.com";
const PC_SIGN_URL: &str = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";
const EARTH_SEARCH_URL: &str = "https://earth-search.aws.element84.com/v1";

/// Known STAC endpoints plus arbitrary roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    PlanetaryComputer,
    EarthSearch,
    Custom(String),
}

impl StacCatalog {
    /// Classify a configured root URL, or one of the `pc` / `es` shorthands
    pub fn from_url(url: &str) -> Self {
        let trimmed = url.trim().trim_end_matches('/');
        match trimmed.to_lowercase().as_str() {
            "pc" | "planetary-computer" => Self::PlanetaryComputer,
            "es" | "earth-search" => Self::EarthSearch,
            lower if lower == canopy_core::config::DEFAULT_STAC_URL => Self::PlanetaryComputer,
            lower if lower == EARTH_SEARCH_URL => Self::EarthSearch,
            _ => Self::Custom(trimmed.to_string()),
        }
    }

    pub fn root_url(&self) -> &str {
        match self {
            Self::PlanetaryComputer => canopy_core::config::DEFAULT_STAC_URL,
            Self::EarthSearch => EARTH_SEARCH_URL,
            Self::Custom(root) => root,
        }
    }

    pub fn search_url(&self) -> String {
        let root = self.root_url().trim_end_matches('/');
        if root.ends_with("/search") {
            root.to_string()
        } else {
            format!("{}/search", root)
        }
    }

    /// Planetary Computer assets need a SAS token before they can be read
    pub fn needs_signing(&self) -> bool {
        match self {
            Self::PlanetaryComputer => true,
            Self::EarthSearch => false,
            Self::Custom(root) => root.contains(PC_HOST),
        }
    }
}

/// Transport settings for [`StacClient`]
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    pub request_timeout: Duration,
    /// Extra attempts after the first failure of a search page
    pub max_retries: u32,
    /// Cap on items gathered across pages
    pub max_items: usize,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            max_items: 200,
        }
    }
}

pub struct StacClient {
    catalog: StacCatalog,
    client: reqwest::Client,
    options: StacClientOptions,
}

fn catalog_err(msg: impl Into<String>) -> CanopyError {
    CanopyError::Catalog(msg.into())
}

fn truncated(body: &str) -> String {
    body.chars().take(500).collect()
}

impl StacClient {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| catalog_err(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { catalog, client, options })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &StacClientOptions {
        &self.options
    }

    /// Run a search and follow `next` links until `max_items` are gathered
    pub async fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let max = self.options.max_items;
        let mut items = Vec::new();
        let mut page = self.post_search(&self.catalog.search_url(), params).await?;

        loop {
            let next = page.next_link().cloned();
            let empty = page.features.is_empty();
            items.append(&mut page.features);

            if items.len() >= max || empty {
                break;
            }
            let Some(link) = next else {
                break;
            };
            page = self.follow_next(&link, params).await?;
        }

        items.truncate(max);
        tracing::debug!(count = items.len(), "STAC search collected items");
        Ok(items)
    }

    /// Signed form of an asset href; unchanged for catalogs without signing
    pub async fn sign_href(&self, href: &str) -> Result<String> {
        if !self.catalog.needs_signing() {
            return Ok(href.to_string());
        }

        let url = Url::parse_with_params(PC_SIGN_URL, &[("href", href)])
            .map_err(|e| catalog_err(format!("Invalid sign URL for {}: {}", href, e)))?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| catalog_err(format!("Sign request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(catalog_err(format!(
                "Sign endpoint returned HTTP {}: {}",
                status,
                truncated(&body)
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| catalog_err(format!("Failed to parse sign response: {}", e)))?;

        body["href"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| catalog_err("Sign response has no href field"))
    }

    async fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        let mut last_err = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1u64 << (attempt - 1)));
                tracing::warn!(attempt, ?delay, "Retrying STAC search");
                tokio::time::sleep(delay).await;
            }

            match self.client.post(url).json(params).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<StacItemCollection>()
                        .await
                        .map_err(|e| catalog_err(format!("Failed to parse STAC response: {}", e)));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_err = Some(catalog_err(format!(
                        "STAC search returned HTTP {}: {}",
                        status,
                        truncated(&body)
                    )));
                    // the request itself is wrong; repeating it will not help
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_err = Some(catalog_err(format!("STAC search request failed: {}", e)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| catalog_err("STAC search failed")))
    }

    async fn follow_next(
        &self,
        link: &StacLink,
        original: &StacSearchParams,
    ) -> Result<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();
        if method == "POST" {
            let params = next_page_params(link, original)?;
            return self.post_search(&link.href, &params).await;
        }

        let resp = self
            .client
            .get(&link.href)
            .send()
            .await
            .map_err(|e| catalog_err(format!("STAC pagination request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(catalog_err(format!(
                "STAC pagination returned HTTP {}: {}",
                status,
                truncated(&body)
            )));
        }

        resp.json()
            .await
            .map_err(|e| catalog_err(format!("Failed to parse STAC page: {}", e)))
    }
}

/// Request body for a POST `next` link, merged over the original when asked
pub fn next_page_params(link: &StacLink, original: &StacSearchParams) -> Result<StacSearchParams> {
    let body = match (&link.body, link.merge.unwrap_or(false)) {
        (Some(body), true) => {
            let mut merged = serde_json::to_value(original)?;
            if let (Some(target), Some(overlay)) = (merged.as_object_mut(), body.as_object()) {
                for (key, value) in overlay {
                    target.insert(key.clone(), value.clone());
                }
            }
            merged
        }
        (Some(body), false) => body.clone(),
        (None, _) => serde_json::to_value(original)?,
    };

    serde_json::from_value(body).map_err(|e| catalog_err(format!("Invalid next-page body: {}", e)))
}
