//! Application wiring against a temporary devices path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use slothfs_mgmt::{Application, SlothConfig};
use slothfs_repl::RebalanceOutcome;
use slothfs_storage::{DeviceRegistry, StaticProbe};

fn config(devices_path: &Path) -> SlothConfig {
    SlothConfig {
        devices_path: devices_path.to_path_buf(),
        replication_interval_ms: 20,
        ..SlothConfig::default()
    }
}

fn app_with_df(devices_path: &Path, df: String) -> Application {
    let config = config(devices_path);
    let registry = DeviceRegistry::new(config.registry_config())
        .with_probe(Arc::new(StaticProbe::new(df)))
        .with_seed(1);
    Application::with_registry(config, registry).unwrap()
}

#[test]
fn test_invalid_config_rejected() {
    assert!(Application::new(SlothConfig::default()).is_err());
}

#[tokio::test]
async fn test_scan_reports_devices_and_capacity() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("usb1")).unwrap();
    std::fs::create_dir_all(tmp.path().join("usb2")).unwrap();
    let df = format!(
        "Mounted on 1K-blocks Use%\n{root}/usb1 1000 10%\n{root}/usb2 3000 50%\n/ 99999 1%\n",
        root = tmp.path().display()
    );
    let app = app_with_df(tmp.path(), df);

    let report = app.scan().await;
    assert!(report.error.is_none());
    let names: Vec<&str> = report.devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["usb1", "usb2"]);
    assert_eq!(report.total_bytes, 4000 * 1024);
    assert_eq!(report.devices[0].size_bytes, Some(1000 * 1024));
    assert!(tmp.path().join("usb1").join(".sloth-storage").is_dir());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["devices"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_scan_of_missing_path_reports_error() {
    let tmp = tempfile::tempdir().unwrap();
    let app = app_with_df(&tmp.path().join("missing"), String::new());

    let report = app.scan().await;
    assert!(report.error.is_some());
    assert!(report.devices.is_empty());
}

#[tokio::test]
async fn test_running_app_replicates_writes() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c"] {
        std::fs::create_dir_all(tmp.path().join(name)).unwrap();
    }
    let mut app = app_with_df(tmp.path(), String::new());
    app.start();
    app.registry().discover().await.unwrap();

    app.fs().write_file("/hello", b"hi").await.unwrap();

    let count = |tmp: &Path| {
        ["a", "b", "c"]
            .iter()
            .filter(|d| tmp.join(d).join(".sloth-storage").join("hello").is_file())
            .count()
    };
    for _ in 0..100 {
        if count(tmp.path()) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(count(tmp.path()), 2);

    let outcome = app.set_replication_count(3).await.unwrap();
    assert!(matches!(outcome, RebalanceOutcome::Completed(_)));
    assert_eq!(count(tmp.path()), 3);

    app.shutdown();
    assert!(!app.registry().is_running());
    assert!(!app.replicator().is_running());
}
