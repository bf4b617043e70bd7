//! STAC API wire types.
//!
//! Only the fields the pipeline reads are typed; everything else survives in
//! the flattened `extra` maps.

use canopy_core::models::scene::{UNKNOWN_CLOUD_COVER, UNKNOWN_TILE};
use canopy_core::models::CatalogItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Body of a `POST /search` request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intersects(mut self, geometry: serde_json::Value) -> Self {
        self.intersects = Some(geometry);
        self.bbox = None;
        self
    }

    pub fn bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self.intersects = None;
        self
    }

    pub fn datetime(mut self, interval: impl Into<String>) -> Self {
        self.datetime = Some(interval.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collections.push(collection.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of search results
#[derive(Debug, Clone, Deserialize)]
pub struct StacItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,
    #[serde(default)]
    pub links: Vec<StacLink>,
    #[serde(rename = "numberMatched")]
    pub number_matched: Option<u64>,
}

impl StacItemCollection {
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    pub properties: StacItemProperties,
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacItemProperties {
    pub datetime: Option<String>,
    #[serde(rename = "eo:cloud_cover")]
    pub cloud_cover: Option<f64>,
    #[serde(rename = "s2:mgrs_tile")]
    pub mgrs_tile: Option<String>,
    #[serde(rename = "proj:epsg")]
    pub epsg: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub merge: Option<bool>,
}

impl StacItem {
    /// Native EPSG code, from `proj:epsg` or the newer `proj:code`
    pub fn epsg(&self) -> Option<u32> {
        self.properties.epsg.or_else(|| {
            self.properties
                .extra
                .get("proj:code")
                .and_then(|v| v.as_str())
                .and_then(|code| code.strip_prefix("EPSG:"))
                .and_then(|code| code.parse().ok())
        })
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        self.properties
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Normalize into the pipeline's catalog record
    pub fn to_catalog_item(&self) -> CatalogItem {
        let cloud_cover = self
            .properties
            .cloud_cover
            .filter(|c| c.is_finite())
            .unwrap_or(UNKNOWN_CLOUD_COVER);

        let assets: BTreeMap<String, String> = self
            .assets
            .iter()
            .map(|(key, asset)| (key.clone(), asset.href.clone()))
            .collect();

        CatalogItem {
            id: self.id.clone(),
            collection: self.collection.clone(),
            datetime: self.datetime(),
            cloud_cover,
            tile_id: self
                .properties
                .mgrs_tile
                .clone()
                .unwrap_or_else(|| UNKNOWN_TILE.to_string()),
            epsg: self.epsg(),
            assets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "type": "FeatureCollection",
        "numberMatched": 2,
        "features": [
            {
                "type": "Feature",
                "id": "S2B_MSIL2A_20250102_T30TVK",
                "collection": "sentinel-2-l2a",
                "bbox": [-4.1, 40.9, -2.8, 41.9],
                "properties": {
                    "datetime": "2025-01-02T11:03:29.024000Z",
                    "eo:cloud_cover": 12.5,
                    "s2:mgrs_tile": "30TVK",
                    "proj:epsg": 32630,
                    "platform": "Sentinel-2B"
                },
                "assets": {
                    "B04": {"href": "https://example.blob/B04.tif", "type": "image/tiff"},
                    "B08": {"href": "https://example.blob/B08.tif"}
                }
            },
            {
                "type": "Feature",
                "id": "bare",
                "properties": {"datetime": null, "proj:code": "EPSG:32631"},
                "assets": {}
            }
        ],
        "links": [
            {"rel": "self", "href": "https://stac/search"},
            {"rel": "next", "href": "https://stac/search", "method": "POST", "body": {"token": "abc"}, "merge": true}
        ]
    }"#;

    #[test]
    fn test_parse_page() {
        let page: StacItemCollection = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.features.len(), 2);
        assert_eq!(page.number_matched, Some(2));
        let next = page.next_link().unwrap();
        assert_eq!(next.method.as_deref(), Some("POST"));
        assert_eq!(next.merge, Some(true));
    }

    #[test]
    fn test_to_catalog_item() {
        let page: StacItemCollection = serde_json::from_str(PAGE).unwrap();
        let item = page.features[0].to_catalog_item();
        assert_eq!(item.cloud_cover, 12.5);
        assert_eq!(item.tile_id, "30TVK");
        assert_eq!(item.epsg, Some(32630));
        assert_eq!(item.date_label(), "2025-01-02");
        assert_eq!(item.asset_href("B04"), Some("https://example.blob/B04.tif"));
    }

    #[test]
    fn test_missing_properties_use_sentinels() {
        let page: StacItemCollection = serde_json::from_str(PAGE).unwrap();
        let item = page.features[1].to_catalog_item();
        assert_eq!(item.cloud_cover, UNKNOWN_CLOUD_COVER);
        assert_eq!(item.tile_id, UNKNOWN_TILE);
        assert_eq!(item.epsg, Some(32631));
        assert!(item.datetime.is_none());
    }

    #[test]
    fn test_search_params_skip_empty() {
        let params = StacSearchParams::new()
            .bbox([0.0, 1.0, 2.0, 3.0])
            .collection("sentinel-2-l2a")
            .limit(50);
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("intersects").is_none());
        assert!(json.get("datetime").is_none());
        assert_eq!(json["limit"], 50);
        assert_eq!(json["collections"][0], "sentinel-2-l2a");
    }
}
