use canopy_catalog::models::StacItemCollection;
use canopy_catalog::{select_scenes, SceneCatalog, SceneQuery, SearchWindow, SelectionCriteria, StaticCatalog};
use canopy_core::config::PipelineSettings;
use canopy_core::models::BBox;
use chrono::{TimeZone, Utc};

const FIXTURE: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": "A", "properties": {"datetime": "2025-01-05T10:00:00Z", "eo:cloud_cover": 10.0, "s2:mgrs_tile": "30TVK", "proj:epsg": 32630},
         "assets": {"B04": {"href": "https://x/A_B04.tif"}, "B08": {"href": "https://x/A_B08.tif"}, "SCL": {"href": "https://x/A_SCL.tif"}}},
        {"type": "Feature", "id": "B", "properties": {"datetime": "2025-01-07T10:00:00Z", "eo:cloud_cover": 80.0, "s2:mgrs_tile": "30TVK", "proj:epsg": 32630},
         "assets": {"B04": {"href": "https://x/B_B04.tif"}}},
        {"type": "Feature", "id": "C", "properties": {"datetime": "2025-01-03T10:00:00Z", "eo:cloud_cover": 25.0, "s2:mgrs_tile": "30TUK", "proj:epsg": 32630},
         "assets": {"B04": {"href": "https://x/C_B04.tif"}}}
    ],
    "links": []
}"#;

#[tokio::test]
async fn test_fixture_search_and_select() {
    let page: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
    let items = page.features.iter().map(|f| f.to_catalog_item()).collect();
    let catalog = StaticCatalog::new(items);

    let query = SceneQuery {
        collection: "sentinel-2-l2a".to_string(),
        bbox: BBox::new(-4.0, 41.0, -3.9, 41.1),
        geometry: None,
        window: SearchWindow::ending_at(Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap(), 12),
        limit: 200,
    };
    let found = catalog.search(&query).await.unwrap();
    assert_eq!(found.len(), 3);

    let criteria = SelectionCriteria::from(&PipelineSettings::default());
    let selected = select_scenes(found, &criteria).unwrap();
    let ids: Vec<&str> = selected.iter().map(|i| i.id.as_str()).collect();

    // tile 30TUK sorts before 30TVK; B is over the default 60% ceiling
    assert_eq!(ids, vec!["C", "A"]);
}
