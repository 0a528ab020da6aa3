use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use vegwatch::analysis::report::{DroneSection, SatelliteComparison, Summary};
use vegwatch::collect::catalog::{InMemoryCatalog, InMemoryScene};
use vegwatch::geo_core::{BoundingBox, CoordTransformer, Crs};
use vegwatch::geometric::drone::DroneRasterProcessor;
use vegwatch::geometric::satellite::SatelliteReduction;
use vegwatch::raster::source::InMemoryRasterSource;
use vegwatch::raster::GeoTransform;
use vegwatch::{
    AnalysisRequest, AreaOfInterest, ChangeAnalysisOrchestrator, DroneInput, InMemoryJobRegistry,
    JobRegistry, JobService, JobStatus, PipelineConfig, RasterRef, TimeWindow,
};

const S2: &str = "COPERNICUS/S2_SR";
const UTM33: u32 = 32633;
const ORIGIN: (f64, f64) = (500_000.0, 5_000_000.0);

/// Square AOI of `size_m` metres centred on a UTM 33N point, expressed in WGS84
fn utm_aoi(x: f64, y: f64, size_m: f64) -> AreaOfInterest {
    let to_wgs84 = CoordTransformer::new(&Crs::Epsg(UTM33), &Crs::wgs84()).unwrap();
    let h = size_m / 2.0;
    let ring: Vec<String> = [
        (x - h, y - h),
        (x + h, y - h),
        (x + h, y + h),
        (x - h, y + h),
        (x - h, y - h),
    ]
    .iter()
    .map(|(px, py)| {
        let (lon, lat) = to_wgs84.transform(*px, *py).unwrap();
        format!("[{},{}]", lon, lat)
    })
    .collect();
    AreaOfInterest::from_geojson_str(&format!(
        r#"{{"type":"Polygon","coordinates":[[{}]]}}"#,
        ring.join(",")
    ))
    .unwrap()
}

fn plot_aoi() -> AreaOfInterest {
    utm_aoi(ORIGIN.0 + 40.0, ORIGIN.1 - 27.0, 40.0)
}

fn windows() -> (TimeWindow, TimeWindow) {
    (
        TimeWindow::from_year(2016).unwrap(),
        TimeWindow::from_year(2024).unwrap(),
    )
}

/// One vegetated scene per window covering the drone plot
fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    let footprint = BoundingBox::new(14.5, 44.5, 15.5, 45.5);
    let date = |y| NaiveDate::from_ymd_opt(y, 7, 15).unwrap();
    let scenes = [
        ("S2_2016", date(2016), 12.0, 0.45, 0.05),
        ("S2_2024", date(2024), 8.0, 0.40, 0.08),
    ];
    for (id, day, cloud, nir, red) in scenes {
        catalog.add_scene(InMemoryScene::uniform(S2, id, day, cloud, footprint, nir, red));
    }
    catalog
}

/// Drone raster at UTM33 ORIGIN: band 0 red, band 1 NIR
fn add_drone_raster(
    source: &InMemoryRasterSource,
    path: &str,
    crs: Crs,
    resolution: f64,
    width: usize,
    height: usize,
) {
    let transform = GeoTransform::north_up(ORIGIN.0, ORIGIN.1, resolution, resolution);
    source
        .insert(
            path,
            transform,
            Some(crs),
            width,
            height,
            vec![vec![0.06; width * height], vec![0.42; width * height]],
        )
        .unwrap();
}

fn drone_input(path: &str) -> DroneInput {
    DroneInput {
        raster: RasterRef::Path(path.into()),
        red_band: Some(0),
        nir_band: Some(1),
        years_since_present: 1.0,
    }
}

fn service(catalog: InMemoryCatalog, rasters: InMemoryRasterSource) -> JobService {
    let orchestrator = ChangeAnalysisOrchestrator::new(
        Arc::new(catalog),
        Arc::new(rasters),
        PipelineConfig::default(),
    );
    JobService::new(Arc::new(orchestrator), Arc::new(InMemoryJobRegistry::new()))
}

#[tokio::test]
async fn no_images_in_either_window_completes_with_zero_cover() {
    let service = service(InMemoryCatalog::new(), InMemoryRasterSource::new());
    let (past, present) = windows();
    let handle = service
        .submit(AnalysisRequest::new(plot_aoi(), past, present))
        .unwrap();
    let job_id = handle.job_id;
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let view = service.poll(&job_id).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    let report = view.result.unwrap();
    let sat = report.satellite_comparison;
    assert_eq!(sat.past_cover_ha, 0.0);
    assert_eq!(sat.present_cover_ha, 0.0);
    assert_eq!(sat.deforestation_rate_pct_per_year, 0.0);
    assert!(!sat.past_data_available);
    assert!(!sat.present_data_available);
    assert_eq!(sat.past_image_count, 0);
    assert_eq!(report.summary.total_loss_pct, 0.0);
}

#[test]
fn known_cover_values_give_expected_rate_and_loss() {
    let (past_window, present_window) = windows();
    let past = SatelliteReduction::from_area_m2(120.5 * 10_000.0, 14);
    let present = SatelliteReduction::from_area_m2(95.2 * 10_000.0, 11);
    let years = TimeWindow::elapsed_years(&past_window, &present_window);
    assert_eq!(years, 8.0);

    let comparison =
        SatelliteComparison::new(&past_window, &present_window, &past, &present, years);
    assert_eq!(comparison.change_ha, -25.3);
    assert_eq!(comparison.deforestation_rate_pct_per_year, -2.624);

    let summary = Summary::new(past.area_ha, present.area_ha, years);
    assert_eq!(summary.total_loss_ha, 25.3);
    assert!((summary.total_loss_pct - 21.0).abs() < 0.01);
}

#[test]
fn centimetre_drone_raster_is_downscaled_to_satellite_grid() {
    let rasters = InMemoryRasterSource::new();
    add_drone_raster(&rasters, "fine.tif", Crs::Epsg(UTM33), 0.05, 2010, 1010);
    let processor = DroneRasterProcessor::new(&rasters, 10.0);

    let analysis = processor
        .process(Path::new("fine.tif"), &plot_aoi(), 0, 1, 0.4)
        .unwrap();
    assert!((analysis.scale_factor - 0.005).abs() < 1e-12);
    assert_eq!((analysis.width, analysis.height), (10, 5));
    assert_eq!(analysis.original_resolution_m, 0.05);
    assert_eq!(analysis.downscaled_resolution_m, 10.0);
    assert_eq!(analysis.ndvi.transform.pixel_width(), 10.0);
    assert_eq!(analysis.stats.vegetation_percentage, 100.0);
}

#[tokio::test]
async fn drone_job_reports_cross_check() {
    let rasters = InMemoryRasterSource::new();
    add_drone_raster(&rasters, "fine.tif", Crs::Epsg(UTM33), 0.05, 2010, 1010);
    let service = service(catalog(), rasters);
    let (past, present) = windows();

    let handle = service
        .submit(AnalysisRequest::new(plot_aoi(), past, present).with_drone(drone_input("fine.tif")))
        .unwrap();
    let job_id = handle.job_id;
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let report = service.poll(&job_id).unwrap().result.unwrap();
    match report.drone_data {
        Some(DroneSection::Completed(drone)) => {
            assert_eq!(drone.original_resolution_m, 0.05);
            assert_eq!(drone.downscaled_resolution_m, 10.0);
            assert!(drone.vegetation_area_ha > 0.0);
            assert!(drone.vegetation_area_ha <= drone.total_area_ha);
            assert!((drone.mean_ndvi - 0.75).abs() < 1e-3);
            let expected = ((drone.vegetation_area_ha
                - report.satellite_comparison.present_cover_ha)
                * 100.0)
                .round()
                / 100.0;
            assert!(
                (drone.comparison_with_satellite.difference_from_present_satellite_ha - expected)
                    .abs()
                    < 0.011
            );
        }
        other => panic!("expected drone statistics, got {:?}", other),
    }
}

#[tokio::test]
async fn geographic_drone_raster_degrades_to_partial_result() {
    let rasters = InMemoryRasterSource::new();
    add_drone_raster(&rasters, "geo.tif", Crs::wgs84(), 0.000001, 100, 100);
    let service = service(catalog(), rasters);
    let (past, present) = windows();

    let handle = service
        .submit(AnalysisRequest::new(plot_aoi(), past, present).with_drone(drone_input("geo.tif")))
        .unwrap();
    let job_id = handle.job_id;
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let view = service.poll(&job_id).unwrap();
    let report = view.result.unwrap();
    assert!(report.satellite_comparison.past_data_available);
    assert!(report.satellite_comparison.past_cover_ha > 0.0);
    match report.drone_data {
        Some(DroneSection::Failed(failure)) => {
            assert_eq!(failure.status, "failed");
            assert!(failure.error.contains("projected"), "{}", failure.error);
        }
        other => panic!("expected drone failure, got {:?}", other),
    }
}

#[tokio::test]
async fn coarse_drone_raster_degrades_to_partial_result() {
    let rasters = InMemoryRasterSource::new();
    add_drone_raster(&rasters, "coarse.tif", Crs::Epsg(UTM33), 15.0, 20, 20);
    let service = service(catalog(), rasters);
    let (past, present) = windows();

    let request =
        AnalysisRequest::new(plot_aoi(), past, present).with_drone(drone_input("coarse.tif"));
    let handle = service.submit(request).unwrap();
    let job_id = handle.job_id;
    assert_eq!(handle.wait().await.unwrap(), JobStatus::Completed);

    let report = service.poll(&job_id).unwrap().result.unwrap();
    assert!(report.satellite_comparison.present_data_available);
    match report.drone_data {
        Some(DroneSection::Failed(failure)) => {
            assert!(failure.error.contains("15"), "{}", failure.error);
        }
        other => panic!("expected drone failure, got {:?}", other),
    }
}

#[tokio::test]
async fn polling_a_completed_job_is_idempotent() {
    let service = service(catalog(), InMemoryRasterSource::new());
    let (past, present) = windows();
    let handle = service
        .submit(AnalysisRequest::new(plot_aoi(), past, present))
        .unwrap();
    let job_id = handle.job_id;
    handle.wait().await.unwrap();

    let first = serde_json::to_string(&service.poll(&job_id).unwrap()).unwrap();
    let second = serde_json::to_string(&service.poll(&job_id).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_jobs_each_reach_one_terminal_state() {
    let registry = Arc::new(InMemoryJobRegistry::new());
    let mut config = PipelineConfig::default();
    config.satellite.collection = S2.to_string();
    let orchestrator = Arc::new(ChangeAnalysisOrchestrator::new(
        Arc::new(catalog()),
        Arc::new(InMemoryRasterSource::new()),
        config,
    ));
    let service = JobService::new(orchestrator, registry.clone());
    let (past, present) = windows();

    let mut handles = Vec::new();
    for i in 0..4 {
        let aoi = utm_aoi(ORIGIN.0 + 40.0 + i as f64 * 100.0, ORIGIN.1 - 27.0, 40.0);
        handles.push(service.submit(AnalysisRequest::new(aoi, past, present)).unwrap());
    }
    for handle in handles {
        let job_id = handle.job_id;
        let status = handle.wait().await.unwrap();
        assert!(status.is_terminal());
        let job = registry.get(&job_id).unwrap();
        assert_eq!(job.status, status);
        assert!(job.result.is_some() ^ job.error.is_some());
    }
    assert_eq!(registry.len(), 4);
}

#[test]
fn json_request_round_trip_through_orchestrator() {
    let json = r#"{
        "geometry": {"type": "Feature", "properties": {}, "geometry":
            {"type": "Polygon", "coordinates": [[
                [15.0,45.1],[15.001,45.1],[15.001,45.101],[15.0,45.101],[15.0,45.1]
            ]]}},
        "past_year": 2016,
        "present_year": 2024,
        "threshold": 0.15
    }"#;
    let request = AnalysisRequest::from_json(json).unwrap();
    let orchestrator = ChangeAnalysisOrchestrator::new(
        Arc::new(catalog()),
        Arc::new(InMemoryRasterSource::new()),
        PipelineConfig::default(),
    );
    let report = orchestrator.analyze(&request).unwrap();
    assert!(report.satellite_comparison.past_cover_ha > 0.0);
    assert!(report.satellite_comparison.present_cover_ha > 0.0);
    assert_eq!(report.summary.time_period_years, 8.0);
}
