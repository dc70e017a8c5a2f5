//! End-to-end capture tests.
//!
//! The diagnostic tools are replaced by shell snippets (`cat` of fixture
//! files, endless `echo` loops, `sleep`) so the full plan runs in well under
//! a second per test without any radio hardware.

use std::path::Path;
use std::time::{Duration, Instant};

use wisurvey_core::config::{CaptureConfig, ScannerCommands};
use wisurvey_core::lifecycle::ScanState;
use wisurvey_core::service::{NewSession, PointRequest, ServiceError, SurveyService};
use wisurvey_core::store::{PointStatus, SurveyStore};

const SCAN: &str = "\
BSS 00:11:22:33:44:55(on wlan1) -- associated
\tlast seen: 120 ms ago
\tfreq: 2412
\tsignal: -70.00 dBm
\tDS Parameter set: channel 1
";

const SURVEY: &str = "\
Survey data from wlan1
\tfrequency:\t\t\t2437 MHz
\tchannel active time:\t\t1000 ms
\tchannel busy time:\t\t250 ms
";

const SPECTRUM_5: &str = "\
wipry,serial=7 5170=-60,5180=-90 1
wipry,serial=7 5180=-70,5190=-95 2
";

fn write_fixture(dir: &Path, name: &str, text: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    format!("cat '{}'", path.display())
}

struct Fixture {
    _dir: tempfile::TempDir,
    svc: SurveyService,
    data: std::path::PathBuf,
}

fn fixture(customize: impl FnOnce(&Path, &mut CaptureConfig)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let tools = dir.path().join("tools");
    let data = dir.path().join("data");
    std::fs::create_dir_all(&tools).unwrap();

    let mut config = CaptureConfig {
        commands: ScannerCommands {
            channel_scan: write_fixture(&tools, "scan.txt", SCAN),
            channel_survey: write_fixture(&tools, "survey.txt", SURVEY),
            spectrum_24: "true".into(),
            spectrum_5: write_fixture(&tools, "spectrum5.txt", SPECTRUM_5),
            spectrum_6: "true".into(),
        },
        rounds: 2,
        round_delay: Duration::from_millis(10),
        max_samples: 10,
        sample_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(5),
        max_output_bytes: 1024 * 1024,
        sample_marker: "wipry,serial=".into(),
    };
    customize(&tools, &mut config);

    let svc = SurveyService::new(SurveyStore::new(&data), config);
    Fixture {
        _dir: dir,
        svc,
        data,
    }
}

async fn new_session(svc: &SurveyService, id: &str) {
    svc.create_session(NewSession {
        id: Some(id.into()),
        name: Some("Test floor".into()),
        map_image: None,
    })
    .await
    .unwrap();
}

fn at(x: f64, y: f64) -> PointRequest {
    PointRequest {
        name: Some("Desk".into()),
        x,
        y,
    }
}

/// Poll until the point has no run in flight, then return its status.
async fn wait_idle(svc: &SurveyService, session_id: &str, point_id: &str) -> PointStatus {
    let deadline = Instant::now() + Duration::from_secs(20);
    while svc.tracker().is_in_flight(session_id, point_id) {
        assert!(Instant::now() < deadline, "capture did not finish in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    svc.point_status(session_id, point_id)
        .await
        .unwrap()
        .expect("status record")
}

fn artifact_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".txt"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn capture_writes_artifacts_and_scores() {
    let f = fixture(|_, _| {});
    new_session(&f.svc, "s1").await;

    let ack = f.svc.request_capture("s1", "p1", at(0.3, 0.6)).await.unwrap();
    assert!(ack.started);
    assert_eq!(ack.status, ScanState::Active);

    let status = wait_idle(&f.svc, "s1", "p1").await;
    assert_eq!(status.status, ScanState::Done, "error: {:?}", status.error);
    assert!(status.completed_at.is_some());
    assert_eq!((status.x, status.y), (0.3, 0.6));

    let point_dir = f.data.join("s1/points/p1");
    assert_eq!(
        artifact_names(&point_dir),
        vec![
            "channel_scan_1.txt",
            "channel_scan_2.txt",
            "spectrum_2ghz_1.txt",
            "spectrum_5ghz_1.txt",
            "spectrum_6ghz_1.txt",
            "survey_dump_1.txt",
            "survey_dump_2.txt",
        ]
    );

    let results = f.svc.results("s1", "p1").await.unwrap();
    assert_eq!(results.channels.len(), 100);

    let ch1 = results.get("2.4_1".parse().unwrap()).unwrap();
    assert_eq!(ch1.ap_count, 1);
    assert_eq!(ch1.strong_ap_count, 1);
    assert_eq!(ch1.channel_busy_rate, 0.0);
    assert_eq!(ch1.score, 94.0);

    // Two rounds of 1000/250 ms at 2437 MHz.
    let ch6 = results.get("2.4_6".parse().unwrap()).unwrap();
    assert_eq!(ch6.channel_busy_rate, 25.0);
    assert_eq!(ch6.score, 50.0);

    // 5180 ± 10 holds 5170 (-60), 5180 (-90), 5180 (-70), 5190 (-95): 2 of 4 active.
    let ch36 = results.get("5_36".parse().unwrap()).unwrap();
    assert_eq!(ch36.channel_usage_rate, 50.0);
    assert_eq!(ch36.score, 0.0);

    let untouched = results.get("6_233".parse().unwrap()).unwrap();
    assert_eq!(untouched.score, 100.0);
    assert_eq!(untouched.ap_count, 0);
}

#[tokio::test]
async fn recapture_appends_new_ordinals() {
    let f = fixture(|_, c| c.rounds = 1);
    new_session(&f.svc, "s1").await;

    f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    wait_idle(&f.svc, "s1", "p1").await;
    let ack = f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    assert!(ack.started);
    let status = wait_idle(&f.svc, "s1", "p1").await;
    assert_eq!(status.status, ScanState::Done);

    let names = artifact_names(&f.data.join("s1/points/p1"));
    for expected in [
        "channel_scan_1.txt",
        "channel_scan_2.txt",
        "survey_dump_2.txt",
        "spectrum_5ghz_2.txt",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }
    assert_eq!(names.len(), 10);
}

#[tokio::test]
async fn concurrent_request_does_not_start_a_second_run() {
    let f = fixture(|tools, c| {
        c.commands.channel_scan = format!("sleep 0.3; {}", write_fixture(tools, "slow.txt", SCAN));
    });
    new_session(&f.svc, "s1").await;

    let first = f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    let second = f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    assert!(first.started);
    assert!(!second.started);
    assert_eq!(second.status, ScanState::Active);
    assert_eq!(f.svc.status("s1", "p1").await.unwrap(), ScanState::Active);

    // A running capture blocks deletion of its session.
    assert!(matches!(
        f.svc.delete_session("s1").await,
        Err(ServiceError::Conflict(_))
    ));

    wait_idle(&f.svc, "s1", "p1").await;
    let names = artifact_names(&f.data.join("s1/points/p1"));
    let scans: Vec<_> = names.iter().filter(|n| n.starts_with("channel_scan_")).collect();
    assert_eq!(scans, vec!["channel_scan_1.txt", "channel_scan_2.txt"]);

    f.svc.delete_session("s1").await.unwrap();
}

#[tokio::test]
async fn failing_command_returns_point_to_inactive() {
    let f = fixture(|_, c| c.commands.channel_survey = "echo 'command failed: -19' >&2; exit 1".into());
    new_session(&f.svc, "s1").await;

    f.svc.request_capture("s1", "p1", at(0.1, 0.9)).await.unwrap();
    let status = wait_idle(&f.svc, "s1", "p1").await;
    assert_eq!(status.status, ScanState::Inactive);
    let error = status.error.expect("error recorded");
    assert!(error.contains("exited"), "{error}");
    assert!(error.contains("command failed: -19"), "{error}");

    // The first scan round was written before the failure and still scores.
    let results = f.svc.results("s1", "p1").await.unwrap();
    assert_eq!(results.get("2.4_1".parse().unwrap()).unwrap().ap_count, 1);

    // Retrying is allowed from INACTIVE.
    let ack = f.svc.request_capture("s1", "p1", at(0.1, 0.9)).await.unwrap();
    assert!(ack.started);
    wait_idle(&f.svc, "s1", "p1").await;
}

#[tokio::test]
async fn endless_sampler_is_bounded_by_sample_count() {
    let f = fixture(|_, c| {
        c.rounds = 1;
        c.max_samples = 4;
        c.commands.spectrum_24 =
            "while true; do echo 'wipry,serial=1 2412=-60,2417=-90 1'; done".into();
    });
    new_session(&f.svc, "s1").await;

    let started = Instant::now();
    f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    let status = wait_idle(&f.svc, "s1", "p1").await;
    assert_eq!(status.status, ScanState::Done);
    assert!(started.elapsed() < Duration::from_secs(5));

    let text = std::fs::read_to_string(f.data.join("s1/points/p1/spectrum_2ghz_1.txt")).unwrap();
    assert_eq!(text.matches("wipry,serial=").count(), 4);
}

#[tokio::test]
async fn silent_sampler_is_bounded_by_deadline() {
    let f = fixture(|_, c| {
        c.rounds = 1;
        c.sample_timeout = Duration::from_millis(300);
        c.commands.spectrum_6 = "sleep 60".into();
    });
    new_session(&f.svc, "s1").await;

    let started = Instant::now();
    f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    let status = wait_idle(&f.svc, "s1", "p1").await;
    assert_eq!(status.status, ScanState::Done);
    assert!(started.elapsed() < Duration::from_secs(5));

    let text = std::fs::read(f.data.join("s1/points/p1/spectrum_6ghz_1.txt")).unwrap();
    assert!(text.is_empty());
}

#[tokio::test]
async fn recompute_is_byte_identical() {
    let f = fixture(|_, _| {});
    new_session(&f.svc, "s1").await;
    f.svc.request_capture("s1", "p1", at(0.5, 0.5)).await.unwrap();
    wait_idle(&f.svc, "s1", "p1").await;

    let results_path = f.data.join("s1/points/p1/results.json");
    let before = std::fs::read(&results_path).unwrap();
    let recomputed = f.svc.recompute_results("s1", "p1").await.unwrap();
    let after = std::fs::read(&results_path).unwrap();
    assert_eq!(before, after);
    assert_eq!(recomputed.to_json().unwrap(), after);

    // Deleting the cache makes the next read rebuild the same record.
    std::fs::remove_file(&results_path).unwrap();
    f.svc.results("s1", "p1").await.unwrap();
    assert_eq!(std::fs::read(&results_path).unwrap(), before);
}

#[tokio::test]
async fn session_summary_lists_points() {
    let f = fixture(|_, c| c.rounds = 1);
    new_session(&f.svc, "s1").await;
    f.svc.request_capture("s1", "p1", at(0.2, 0.4)).await.unwrap();
    wait_idle(&f.svc, "s1", "p1").await;

    let detail = f.svc.session("s1").await.unwrap();
    assert_eq!(detail.points.len(), 1);
    assert_eq!(detail.points[0].id, "p1");
    assert_eq!(detail.points[0].name, "Desk");
    assert_eq!(detail.points[0].status, ScanState::Done);
    assert!(!detail.has_map);
}
