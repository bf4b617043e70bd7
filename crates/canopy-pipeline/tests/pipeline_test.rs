//! End-to-end runs against the in-memory raster backend, a fixed catalog and
//! the in-memory stores.

use async_trait::async_trait;
use canopy_catalog::{SceneCatalog, SceneQuery, StaticCatalog};
use canopy_core::config::PipelineSettings;
use canopy_core::error::{CanopyError, Result};
use canopy_core::models::{
    BBox, CatalogItem, Grid, PolygonId, PolygonRecord, SkipReason,
};
use canopy_geo::grid::{build_grid, GridSpec};
use canopy_pipeline::atomic::AtomicWriter;
use canopy_pipeline::fetch::RetryPolicy;
use canopy_pipeline::publish::{read_metadata, ArtifactPublisher, Provenance, UsedScene};
use canopy_pipeline::{Pipeline, RunOptions, RunOutcome, RunPhase};
use canopy_raster::{MemoryRasterIo, SourceRaster};
use canopy_store::{MemoryPolygonStore, MemoryZonalStore, ZonalStatsStore};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const ROI: &str = r#"{
  "type": "FeatureCollection",
  "features": [{
    "type": "Feature",
    "properties": {},
    "geometry": {
      "type": "Polygon",
      "coordinates": [[[-4.0, 41.0], [-3.999, 41.0], [-3.999, 41.001], [-4.0, 41.001], [-4.0, 41.0]]]
    }
  }]
}"#;

fn roi_bbox() -> BBox {
    BBox::new(-4.0, 41.0, -3.999, 41.001)
}

fn native_grid() -> Grid {
    build_grid(&roi_bbox(), &GridSpec { resolution_m: 10.0, max_dim: 12000, dst_epsg: 32630 })
        .unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
}

fn item(id: &str, cloud: f64, day: u32) -> CatalogItem {
    let mut assets = BTreeMap::new();
    for band in ["B04", "B08", "SCL"] {
        assets.insert(band.to_string(), format!("mem://{}/{}", id, band));
    }
    CatalogItem {
        id: id.to_string(),
        collection: Some("sentinel-2-l2a".to_string()),
        datetime: Some(Utc.with_ymd_and_hms(2025, 1, day, 10, 56, 0).unwrap()),
        cloud_cover: cloud,
        tile_id: "30TVL".to_string(),
        epsg: Some(32630),
        assets,
    }
}

fn constant(grid: &Grid, value: f32) -> Array2<f32> {
    Array2::from_elem(grid.shape(), value)
}

/// Classification with the lower-left quadrant flagged as cloud
fn scl_cloudy_corner(grid: &Grid) -> Array2<f32> {
    let (h, w) = grid.shape();
    Array2::from_shape_fn((h, w), |(r, c)| if r >= h / 2 && c < w / 2 { 9.0 } else { 4.0 })
}

/// Classification that is cloud everywhere but one pixel
fn scl_overcast(grid: &Grid) -> Array2<f32> {
    let mut scl = constant(grid, 9.0);
    scl[[0, 0]] = 4.0;
    scl
}

fn register(io: &MemoryRasterIo, id: &str, red: f32, nir: f32, scl: Array2<f32>) {
    let grid = native_grid();
    let put = |band: &str, data: Array2<f32>| {
        io.insert_source(format!("mem://{}/{}", id, band), SourceRaster::new(grid, data)).unwrap();
    };
    put("B04", constant(&grid, red));
    put("B08", constant(&grid, nir));
    put("SCL", scl);
}

/// Polygon covering the middle of one native pixel, in the native CRS
fn pixel_polygon(id: i64, grid: &Grid, row: usize, col: usize) -> PolygonRecord {
    let t = grid.transform;
    let x0 = t.origin_x + (col as f64 + 0.2) * t.pixel_width;
    let x1 = t.origin_x + (col as f64 + 0.8) * t.pixel_width;
    let y0 = t.origin_y + (row as f64 + 0.2) * t.pixel_height;
    let y1 = t.origin_y + (row as f64 + 0.8) * t.pixel_height;
    PolygonRecord {
        id: PolygonId(id),
        geojson: format!(
            r#"{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}"#
        ),
        srid: 32630,
    }
}

struct Harness {
    dir: TempDir,
    io: MemoryRasterIo,
    polygons: MemoryPolygonStore,
    stats: MemoryZonalStore,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("roi.geojson"), ROI).unwrap();
        Self {
            dir,
            io: MemoryRasterIo::new(),
            polygons: MemoryPolygonStore::new(),
            stats: MemoryZonalStore::new(),
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            roi_path: self.dir.path().join("roi.geojson"),
            output_dir: self.output_dir(),
            min_valid_fraction: 0.5,
            ..PipelineSettings::default()
        }
    }

    fn pipeline(&self, items: Vec<CatalogItem>) -> Pipeline {
        Pipeline::new(
            self.settings(),
            Arc::new(StaticCatalog::new(items)),
            Arc::new(self.io.clone()),
            Arc::new(self.polygons.clone()),
            Arc::new(self.stats.clone()),
        )
        .with_retry(RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1) })
        .with_writer(AtomicWriter::new(2, Duration::from_millis(1)))
    }

    fn options(&self) -> RunOptions {
        RunOptions { now: now(), ..RunOptions::default() }
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

fn standard_scenes(h: &Harness) -> Vec<CatalogItem> {
    let grid = native_grid();
    register(&h.io, "A", 1000.0, 3000.0, scl_cloudy_corner(&grid));
    register(&h.io, "B", 1000.0, 3000.0, scl_overcast(&grid));
    register(&h.io, "C", 1000.0, 3000.0, constant(&grid, 4.0));
    vec![item("A", 10.0, 5), item("B", 20.0, 8), item("C", 80.0, 9)]
}

#[tokio::test]
async fn test_full_run_publishes_and_computes_zonal_statistics() {
    let h = Harness::new();
    let grid = native_grid();
    let (rows, cols) = grid.shape();
    let items = standard_scenes(&h);

    h.polygons.insert(pixel_polygon(1, &grid, 0, cols - 1)).unwrap();
    h.polygons
        .insert(PolygonRecord {
            id: PolygonId(2),
            geojson: r#"{"type":"Polygon","coordinates":[[[10,10],[10.1,10],[10.1,10.1],[10,10.1],[10,10]]]}"#
                .to_string(),
            srid: 4326,
        })
        .unwrap();
    h.polygons.insert(pixel_polygon(3, &grid, rows - 1, 0)).unwrap();

    let mut phases = Vec::new();
    let outcome = h
        .pipeline(items)
        .run_with_progress(&h.options(), |p| {
            if phases.last() != Some(&p.phase) {
                phases.push(p.phase);
            }
        })
        .await
        .unwrap();

    let RunOutcome::Published(report) = outcome else {
        panic!("expected a published run");
    };

    // C is over the cloud ceiling; B is selected but too cloudy to keep
    let selected: Vec<&str> = report.plan.selected.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(selected, vec!["A", "B"]);
    assert_eq!(report.plan.grid, grid);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "B");
    assert!(matches!(report.skipped[0].1, SkipReason::LowValidFraction { .. }));

    let metadata = &report.publish.metadata;
    assert_eq!(metadata.items_used, vec!["A".to_string()]);
    assert_eq!(metadata.items_skipped, 1);
    assert_eq!(metadata.tag(), "20250105");
    assert_eq!(metadata.observation_date_formatted, "05/01/2025");
    assert_eq!(metadata.date_range, "2025-01-05");
    assert_eq!(metadata.grid_size, [cols, rows]);
    assert_eq!(metadata.crs_epsg, 32630);
    assert!(report.publish.warnings.is_empty());
    assert!(report.publish.latest_promoted());

    let zonal = report.zonal.expect("zonal statistics should run");
    assert_eq!(zonal.counters.processed, 3);
    assert_eq!(zonal.counters.inserted, 1);
    assert_eq!(zonal.counters.out_of_bounds, 1);
    assert_eq!(zonal.counters.no_valid_pixels, 1);
    assert_eq!(zonal.counters.errors, 0);

    let stored = h.stats.rows_for_artifact(zonal.artifact_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].polygon_id, PolygonId(1));
    assert!((stored[0].mean - 0.5).abs() < 1e-6);
    assert_eq!(stored[0].std, 0.0);

    assert_eq!(
        phases,
        vec![
            RunPhase::Planning,
            RunPhase::ProcessingScenes,
            RunPhase::Compositing,
            RunPhase::Publishing,
            RunPhase::ZonalStatistics,
        ]
    );
}

#[tokio::test]
async fn test_latest_alias_is_complete_copy() {
    let h = Harness::new();
    let items = standard_scenes(&h);
    h.pipeline(items).run(&h.options()).await.unwrap();

    let out = h.output_dir();
    assert_eq!(
        files_in(&out),
        vec![
            "ndvi_20250105.json",
            "ndvi_20250105.png",
            "ndvi_20250105_3857.tif",
            "ndvi_20250105_native.tif",
            "ndvi_latest.json",
            "ndvi_latest.png",
            "ndvi_latest_3857.tif",
            "ndvi_latest_native.tif",
        ]
    );

    for (versioned, latest) in [
        ("ndvi_20250105_native.tif", "ndvi_latest_native.tif"),
        ("ndvi_20250105_3857.tif", "ndvi_latest_3857.tif"),
        ("ndvi_20250105.png", "ndvi_latest.png"),
        ("ndvi_20250105.json", "ndvi_latest.json"),
    ] {
        assert_eq!(fs::read(out.join(versioned)).unwrap(), fs::read(out.join(latest)).unwrap());
    }

    // the alias metadata still names the versioned files
    let latest = read_metadata(&out.join("ndvi_latest.json")).unwrap();
    assert_eq!(latest.files.native_tif, "ndvi_20250105_native.tif");
    let png = image::open(out.join("ndvi_latest.png")).unwrap();
    let grid = native_grid();
    assert_eq!((png.width() as usize, png.height() as usize), (grid.width, grid.height));
}

#[tokio::test]
async fn test_second_run_overwrites_rows() {
    let h = Harness::new();
    let grid = native_grid();
    let items = standard_scenes(&h);
    h.polygons.insert(pixel_polygon(1, &grid, 0, grid.width - 1)).unwrap();

    let first = match h.pipeline(items.clone()).run(&h.options()).await.unwrap() {
        RunOutcome::Published(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    // brighter vegetation on the same acquisition
    register(&h.io, "A", 1000.0, 9000.0, scl_cloudy_corner(&grid));
    let second = match h.pipeline(items).run(&h.options()).await.unwrap() {
        RunOutcome::Published(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    let first_id = first.zonal.unwrap().artifact_id;
    let second_id = second.zonal.unwrap().artifact_id;
    assert_eq!(first_id, second_id);

    let rows = h.stats.rows_for_artifact(second_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].mean - 0.8).abs() < 1e-6);
    assert_eq!(h.stats.row_count().unwrap(), 1);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = Harness::new();
    let items = standard_scenes(&h);
    let options = RunOptions { dry_run: true, ..h.options() };

    let outcome = h.pipeline(items).run(&options).await.unwrap();
    let RunOutcome::Planned(plan) = outcome else {
        panic!("expected a plan");
    };
    assert_eq!(plan.candidates, 3);
    assert_eq!(plan.selected.len(), 2);
    assert!(files_in(&h.output_dir()).is_empty());
    assert_eq!(h.io.read_count("mem://A/B04"), 0);
}

#[tokio::test]
async fn test_no_candidates_is_clean_exit() {
    let h = Harness::new();
    let items = vec![item("C", 80.0, 9), item("D", 95.0, 9)];

    let outcome = h.pipeline(items).run(&h.options()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::NoScenes));
    assert!(files_in(&h.output_dir()).is_empty());
}

#[tokio::test]
async fn test_empty_composite_leaves_latest_untouched() {
    let h = Harness::new();
    let grid = native_grid();
    register(&h.io, "A", 1000.0, 3000.0, scl_overcast(&grid));
    fs::create_dir_all(h.output_dir()).unwrap();
    fs::write(h.output_dir().join("ndvi_latest.json"), "previous").unwrap();

    let result = h.pipeline(vec![item("A", 10.0, 5)]).run(&h.options()).await;

    assert!(matches!(result, Err(CanopyError::EmptyComposite { scenes: 0 })));
    assert_eq!(files_in(&h.output_dir()), vec!["ndvi_latest.json"]);
    assert_eq!(fs::read_to_string(h.output_dir().join("ndvi_latest.json")).unwrap(), "previous");
}

#[tokio::test]
async fn test_metadata_stable_apart_from_generation_time() {
    let dir = TempDir::new().unwrap();
    let grid = native_grid();
    let publisher = publisher(dir.path());
    let composite = SourceRaster::new(grid, constant(&grid, 0.42));
    let provenance = Provenance::from_settings(
        &PipelineSettings::default(),
        "2024-12-29T12:00:00Z/2025-01-10T12:00:00Z".to_string(),
        vec![UsedScene { item_id: "A".to_string(), datetime: Some(now()) }],
        0,
    );

    let path = dir.path().join("ndvi_20250110.json");
    publisher.publish(&composite, &provenance, now()).await.unwrap();
    let first = fs::read_to_string(&path).unwrap();
    publisher.publish(&composite, &provenance, now() + chrono::Duration::hours(3)).await.unwrap();
    let second = fs::read_to_string(&path).unwrap();

    assert_ne!(first, second);
    let strip = |text: &str| -> Vec<String> {
        text.lines().filter(|l| !l.contains("generated_utc")).map(str::to_string).collect()
    };
    assert_eq!(strip(&first), strip(&second));
}

fn publisher(dir: &Path) -> ArtifactPublisher {
    ArtifactPublisher::new(Arc::new(MemoryRasterIo::new()), dir, "ndvi", 12000)
        .unwrap()
        .with_writer(AtomicWriter::new(2, Duration::from_millis(1)))
}

fn provenance_on(day: u32) -> Provenance {
    Provenance::from_settings(
        &PipelineSettings::default(),
        "2024-12-29T12:00:00Z/2025-01-10T12:00:00Z".to_string(),
        vec![UsedScene {
            item_id: format!("S{}", day),
            datetime: Some(Utc.with_ymd_and_hms(2025, 1, day, 10, 56, 0).unwrap()),
        }],
        0,
    )
}

const LATEST_FILES: [&str; 4] =
    ["ndvi_latest_native.tif", "ndvi_latest_3857.tif", "ndvi_latest.png", "ndvi_latest.json"];

fn latest_contents(dir: &Path) -> Vec<Vec<u8>> {
    LATEST_FILES.iter().map(|name| fs::read(dir.join(name)).unwrap()).collect()
}

#[tokio::test]
async fn test_failed_versioned_rename_keeps_previous_latest_bundle() {
    let dir = TempDir::new().unwrap();
    let grid = native_grid();
    let publisher = publisher(dir.path());

    let first = publisher
        .publish(&SourceRaster::new(grid, constant(&grid, 0.2)), &provenance_on(5), now())
        .await
        .unwrap();
    assert!(first.latest_promoted());
    let before = latest_contents(dir.path());

    // a non-empty directory where the new native raster should land
    let blocked = dir.path().join("ndvi_20250110_native.tif");
    fs::create_dir_all(blocked.join("held")).unwrap();
    fs::write(blocked.join("held").join("f"), "x").unwrap();

    let second = publisher
        .publish(&SourceRaster::new(grid, constant(&grid, 0.7)), &provenance_on(10), now())
        .await
        .unwrap();

    assert!(!second.native_published());
    assert!(second.promoted.is_empty());
    assert!(!second.latest_promoted());
    assert!(second.warnings.iter().any(|w| w.contains("latest aliases not promoted")));
    assert_eq!(latest_contents(dir.path()), before);
    let latest = read_metadata(&dir.path().join("ndvi_latest.json")).unwrap();
    assert_eq!(latest.tag(), "20250105");
}

/// Fixed catalog that remembers the last query it answered
struct RecordingCatalog {
    inner: StaticCatalog,
    last_query: Mutex<Option<SceneQuery>>,
}

#[async_trait]
impl SceneCatalog for RecordingCatalog {
    async fn search(&self, query: &SceneQuery) -> Result<Vec<CatalogItem>> {
        *self.last_query.lock().unwrap() = Some(query.clone());
        self.inner.search(query).await
    }

    async fn sign(&self, item: &CatalogItem, asset_keys: &[&str]) -> Result<CatalogItem> {
        self.inner.sign(item, asset_keys).await
    }
}

#[tokio::test]
async fn test_search_footprint_is_roi_bbox_polygon() {
    let h = Harness::new();
    // a triangle, whose bbox polygon differs from the ROI itself
    fs::write(
        h.dir.path().join("roi.geojson"),
        r#"{"type":"Polygon","coordinates":[[[-4.0,41.0],[-3.999,41.0],[-3.9995,41.001],[-4.0,41.0]]]}"#,
    )
    .unwrap();
    let catalog = Arc::new(RecordingCatalog {
        inner: StaticCatalog::new(standard_scenes(&h)),
        last_query: Mutex::new(None),
    });
    let pipeline = Pipeline::new(
        h.settings(),
        catalog.clone(),
        Arc::new(h.io.clone()),
        Arc::new(h.polygons.clone()),
        Arc::new(h.stats.clone()),
    );

    let options = RunOptions { dry_run: true, ..h.options() };
    pipeline.run(&options).await.unwrap();

    let query = catalog.last_query.lock().unwrap().clone().expect("catalog was searched");
    let expected = BBox::new(-4.0, 41.0, -3.999, 41.001);
    assert_eq!(query.bbox, expected);
    assert_eq!(query.geometry, Some(expected.to_geometry()));
}

#[tokio::test]
async fn test_crs_taken_from_first_scene_that_reports_one() {
    let h = Harness::new();
    let grid = native_grid();
    register(&h.io, "A", 1000.0, 3000.0, scl_cloudy_corner(&grid));

    // best-ranked scene has no catalog CRS and no readable bands
    let mut broken = item("X", 1.0, 7);
    broken.epsg = None;
    let mut usable = item("A", 10.0, 5);
    usable.epsg = None;

    let outcome = h.pipeline(vec![broken, usable]).run(&h.options()).await.unwrap();
    let RunOutcome::Published(report) = outcome else {
        panic!("expected a published run");
    };

    assert_eq!(report.plan.grid.epsg, 32630);
    let selected: Vec<&str> = report.plan.selected.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(selected, vec!["X", "A"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "X");
    assert!(matches!(report.skipped[0].1, SkipReason::BandUnavailable { .. }));
    assert_eq!(report.publish.metadata.items_used, vec!["A".to_string()]);
}
