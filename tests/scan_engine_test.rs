//! Integration tests for the scan engine against simulated hardware.

use std::sync::Arc;
use std::time::Duration;

use specscan::acquisition::AcquisitionTrigger;
use specscan::error::ControlError;
use specscan::hardware::{Detector, MockController, MockDetector};
use specscan::kinematics::CrystalConfig;
use specscan::motion::MotionCoordinator;
use specscan::recorder::MemoryRecorder;
use specscan::registry::{default_configs, AxisRegistry};
use specscan::scan::{ScanEngine, ScanOutcome, ScanSpec, ScanState};
use specscan::session::ScanSession;

const CRYY: &str = "0020550162";
const CRYZ: &str = "0020550164";

struct Rig {
    engine: ScanEngine,
    controller: Arc<MockController>,
    _dir: tempfile::TempDir,
}

async fn rig() -> Rig {
    rig_with_detectors(Vec::new()).await
}

async fn rig_with_detectors(detectors: Vec<Arc<dyn Detector>>) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let controller = Arc::new(MockController::new());
    let registry = Arc::new(
        AxisRegistry::from_configs(
            dir.path().join("stages.json"),
            default_configs(),
            controller.clone(),
            CrystalConfig::default(),
        )
        .await
        .unwrap(),
    );
    let session = ScanSession::open(dir.path().join("data"), "test").unwrap();
    let engine = ScanEngine::new(
        MotionCoordinator::new(registry),
        AcquisitionTrigger::new(detectors),
        session,
    );
    Rig {
        engine,
        controller,
        _dir: dir,
    }
}

fn ascan(axis: &str, start: f64, end: f64, n_steps: u32) -> ScanSpec {
    ScanSpec::Absolute1D {
        axis: axis.into(),
        start,
        end,
        n_steps,
        dwell_s: 0.002,
    }
}

#[tokio::test]
async fn test_ascan_visits_every_grid_point_once() {
    let mut rig = rig().await;
    let mut recorder = MemoryRecorder::new();

    let outcome = rig
        .engine
        .run(ascan("cryy", 0.0, 10.0, 5), &mut recorder)
        .await
        .unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { points: 6 });
    assert_eq!(rig.engine.state(), ScanState::Idle);

    let positions: Vec<f64> = recorder
        .records
        .iter()
        .map(|(_, record)| record.inner_position)
        .collect();
    assert_eq!(positions, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);

    // every record belongs to scan 0, and the index is consumed afterwards
    assert!(recorder.records.iter().all(|(index, _)| *index == 0));
    assert_eq!(rig.engine.session().scan_index(), 1);
}

#[tokio::test]
async fn test_ascan_records_carry_the_command_line() {
    let mut rig = rig().await;
    let mut recorder = MemoryRecorder::new();

    rig.engine
        .run(ascan("cryy", 0.0, 1.0, 1), &mut recorder)
        .await
        .unwrap();

    let (_, record) = &recorder.records[0];
    assert_eq!(record.command, "ascan cryy 0 1 1 0.002");
    assert_eq!(record.outer_axis, "cryy");
    assert_eq!(record.inner_axis, "cryy");
}

#[tokio::test]
async fn test_dscan_returns_to_origin_exactly() {
    let mut rig = rig().await;
    rig.controller.set_encoder(CRYY, 5.0).await;
    let mut recorder = MemoryRecorder::new();

    let spec = ScanSpec::Relative1D {
        axis: "cryy".into(),
        r_start: -2.0,
        r_end: 2.0,
        n_steps: 4,
        dwell_s: 0.002,
    };
    rig.engine.run(spec, &mut recorder).await.unwrap();

    let positions: Vec<f64> = recorder
        .records
        .iter()
        .map(|(_, record)| record.inner_position)
        .collect();
    assert_eq!(positions, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(rig.controller.encoder(CRYY).await, 5.0);
}

#[tokio::test]
async fn test_mesh_raster_order_outer_slow() {
    let mut rig = rig().await;
    let mut recorder = MemoryRecorder::new();

    let spec = ScanSpec::Absolute2D {
        outer: "cryy".into(),
        outer_start: 0.0,
        outer_end: 10.0,
        outer_steps: 2,
        inner: "cryz".into(),
        inner_start: 0.0,
        inner_end: 10.0,
        inner_steps: 2,
        dwell_s: 0.002,
    };
    let outcome = rig.engine.run(spec, &mut recorder).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { points: 9 });

    let visited: Vec<(f64, f64)> = recorder
        .records
        .iter()
        .map(|(_, record)| (record.outer_position, record.inner_position))
        .collect();
    assert_eq!(
        visited,
        vec![
            (0.0, 0.0),
            (0.0, 5.0),
            (0.0, 10.0),
            (5.0, 0.0),
            (5.0, 5.0),
            (5.0, 10.0),
            (10.0, 0.0),
            (10.0, 5.0),
            (10.0, 10.0),
        ]
    );
}

#[tokio::test]
async fn test_dmesh_restores_both_axes() {
    let mut rig = rig().await;
    rig.controller.set_encoder(CRYY, 20.0).await;
    rig.controller.set_encoder(CRYZ, 30.0).await;
    let mut recorder = MemoryRecorder::new();

    let spec = ScanSpec::Relative2D {
        outer: "cryy".into(),
        outer_r_start: -1.0,
        outer_r_end: 1.0,
        outer_steps: 1,
        inner: "cryz".into(),
        inner_r_start: -1.0,
        inner_r_end: 1.0,
        inner_steps: 1,
        dwell_s: 0.002,
    };
    rig.engine.run(spec, &mut recorder).await.unwrap();

    assert_eq!(rig.controller.encoder(CRYY).await, 20.0);
    assert_eq!(rig.controller.encoder(CRYZ).await, 30.0);
}

#[tokio::test]
async fn test_hardware_fault_aborts_and_still_consumes_the_index() {
    let mut rig = rig().await;
    let mut recorder = MemoryRecorder::new();

    // first scan works
    rig.engine
        .run(ascan("cryy", 0.0, 1.0, 1), &mut recorder)
        .await
        .unwrap();
    assert_eq!(rig.engine.session().scan_index(), 1);

    // second scan faults mid-flight
    rig.controller.fail_channel(CRYY).await;
    let result = rig
        .engine
        .run(ascan("cryy", 0.0, 1.0, 1), &mut recorder)
        .await;
    assert!(matches!(result, Err(ControlError::Hardware { .. })));
    assert_eq!(rig.engine.state(), ScanState::Aborted);

    // the aborted scan's storage unit is not reused
    assert_eq!(rig.engine.session().scan_index(), 2);

    // the fault is contained: other axes still scan
    rig.controller.clear_failure(CRYY).await;
    let mut recorder2 = MemoryRecorder::new();
    rig.engine
        .run(ascan("cryz", 0.0, 1.0, 1), &mut recorder2)
        .await
        .unwrap();
    assert!(recorder2.records.iter().all(|(index, _)| *index == 2));
}

#[tokio::test]
async fn test_invalid_spec_moves_nothing() {
    let mut rig = rig().await;
    let mut recorder = MemoryRecorder::new();

    let result = rig
        .engine
        .run(ascan("cryy", 0.0, 1.0, 0), &mut recorder)
        .await;
    assert!(matches!(result, Err(ControlError::Syntax(_))));
    assert_eq!(rig.controller.move_count().await, 0);
    assert!(recorder.records.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_between_points_and_dscan_still_returns() {
    let mut rig = rig().await;
    rig.controller.set_encoder(CRYY, 5.0).await;
    let mut recorder = MemoryRecorder::new();

    let cancel = rig.engine.cancel_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    let spec = ScanSpec::Relative1D {
        axis: "cryy".into(),
        r_start: 0.0,
        r_end: 10.0,
        n_steps: 10,
        dwell_s: 0.02,
    };
    let outcome = rig.engine.run(spec, &mut recorder).await.unwrap();

    match outcome {
        ScanOutcome::Cancelled { points } => assert!(points < 11),
        other => panic!("expected a cancelled scan, got {other:?}"),
    }
    // the return-to-origin move is still attempted after cancellation
    assert_eq!(rig.controller.encoder(CRYY).await, 5.0);
}

#[tokio::test]
async fn test_detector_readings_reach_the_recorder() {
    let mut rig =
        rig_with_detectors(vec![Arc::new(MockDetector::new("det00", 128))]).await;
    let mut recorder = MemoryRecorder::new();

    rig.engine
        .run(ascan("cryy", 0.0, 1.0, 1), &mut recorder)
        .await
        .unwrap();

    for (_, record) in &recorder.records {
        assert_eq!(record.readings.len(), 1);
        let reading = record.readings[0].reading().expect("reading expected");
        assert_eq!(reading.detector, "det00");
        assert_eq!(reading.spectrum.len(), 128);
    }
}
