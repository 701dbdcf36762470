use std::time::{Duration, Instant};

use shelfscan::{BackendRegistry, LogOutcome, Pipeline, ShelfscanConfig};

fn config(dir: &tempfile::TempDir, device: &str, backend: &str) -> ShelfscanConfig {
    let mut cfg = ShelfscanConfig::default();
    cfg.inventory_path = dir.path().join("inventory_db.json");
    cfg.camera.device = device.to_string();
    cfg.camera.width = 320;
    cfg.camera.height = 240;
    cfg.camera.target_fps = 60;
    cfg.tracking.backend = backend.to_string();
    cfg.tracking.min_seen_count = 3;
    cfg.tracking.target_hz = 50;
    cfg
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

#[test]
fn unavailable_camera_yields_empty_perception() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, "/dev/shelfscan-missing-camera", "stub");
    let pipeline = Pipeline::start(&cfg, &BackendRegistry::with_builtin()).expect("start");
    assert!(!pipeline.source_available());

    let service = pipeline.service();
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        assert!(service.list_stable(1).is_empty());
        std::thread::sleep(Duration::from_millis(25));
    }

    let status = service.status();
    assert_eq!(status.live_tracks, 0);
    let tracker = status.tracker.expect("tracker stats");
    assert!(tracker.cycles > 0, "tracking loop should keep running");
    assert_eq!(tracker.frames_processed, 0);
    assert!(!status.source.expect("source status").available);

    // The request layer still serves inventory.
    service.add_item("Rice", None, Some(2)).expect("manual add");
    assert_eq!(service.list_inventory().expect("list").len(), 1);

    pipeline.stop().expect("stop");
}

#[test]
fn stable_tracks_are_logged_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, "stub://shelf", "stub");
    let pipeline = Pipeline::start(&cfg, &BackendRegistry::with_builtin()).expect("start");
    let service = pipeline.service();

    assert!(
        wait_for(Duration::from_secs(5), || !service
            .list_stable(cfg.tracking.min_seen_count)
            .is_empty()),
        "no track became stable"
    );
    let stable = service.list_stable(cfg.tracking.min_seen_count);
    let target = stable
        .iter()
        .find(|obj| obj.label == "Red Apple")
        .expect("apple is the first item in view");
    assert!(!target.logged);
    // The distractor sits below the acceptance threshold and never shows up.
    assert!(stable.iter().all(|obj| obj.label != "Cereal"));

    let item = match service.log_track(target.id).expect("log") {
        LogOutcome::Logged(item) => item,
        other => panic!("expected Logged, got {:?}", other),
    };
    assert_eq!(item.name, "Red Apple");
    assert_eq!(item.qty, 1);
    assert!(item.pose.is_some());

    assert_eq!(
        service.log_track(target.id).expect("log again"),
        LogOutcome::AlreadyLogged
    );
    assert!(pipeline
        .registry()
        .snapshot_stable(1)
        .iter()
        .any(|obj| obj.id == target.id && obj.logged));

    let inventory = service.list_inventory().expect("inventory");
    assert_eq!(inventory.len(), 1);
    assert_eq!(inventory[0].qty, 1);

    pipeline.stop().expect("stop");

    // Persisted for the next process.
    let reopened = shelfscan::InventoryStore::open(cfg.inventory_path.clone(), false);
    assert_eq!(reopened.get_all().expect("get_all")[0].name, "Red Apple");
}

#[test]
fn unknown_backend_runs_a_no_op_tracker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, "stub://shelf", "no-such-model");
    let pipeline = Pipeline::start(&cfg, &BackendRegistry::with_builtin()).expect("start");
    let service = pipeline.service();

    assert!(wait_for(Duration::from_secs(2), || {
        service
            .status()
            .source
            .map(|s| s.frames_captured > 5)
            .unwrap_or(false)
    }));
    assert!(service.list_stable(1).is_empty());
    assert_eq!(pipeline.registry().len(), 0);
    assert_eq!(service.log_track(1).expect("log"), LogOutcome::NotFound);

    pipeline.stop().expect("stop");
}
