//! Integration tests for ops crate

#[cfg(test)]
mod tests {
    use refurb_errors::{DiskError, Error, OpsError, SyncError};
    use refurb_events::RecordingReporter;
    use refurb_ops::*;
    use refurb_plan::{PlanKind, PlanOptions};
    use refurb_types::{RestoreType, RunState};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::tempdir;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn create_test_context() -> (OpsCtx, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let ctx = OpsContextBuilder::new()
            .with_reporter(reporter.clone())
            .build();
        (ctx, reporter)
    }

    #[test]
    fn plan_results_serialize_with_a_type_tag() {
        let result = plan_layout(64 * GIB, PlanKind::Traditional, &PlanOptions::default()).unwrap();
        assert!(result.is_success());
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "Plan");
        assert_eq!(json["data"]["kind"], "traditional");
        assert!(!json["data"]["entries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn tiny_disks_cannot_be_planned() {
        let result = plan_layout(GIB / 4, PlanKind::Efi, &PlanOptions::default());
        assert!(matches!(result, Err(Error::Plan(_))));
    }

    #[tokio::test]
    async fn fanout_copies_to_every_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("image.bin");
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &payload).unwrap();
        let targets: Vec<PathBuf> = (1..=3).map(|n| dir.path().join(format!("copy-{n}.bin"))).collect();

        let (ctx, reporter) = create_test_context();
        let result = fanout(&ctx, &source, &targets).await.unwrap();
        assert!(result.is_success());
        let OperationResult::Run(report) = result else {
            panic!("expected a run report");
        };
        assert_eq!(report.operation, "fanout");
        assert_eq!(report.state, RunState::Success);
        assert!(report.failed_tasks.is_empty());
        for target in &targets {
            assert_eq!(std::fs::read(target).unwrap(), payload);
        }
        assert!(!reporter.events().is_empty());
    }

    #[tokio::test]
    async fn fanout_needs_targets() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("image.bin");
        std::fs::write(&source, b"data").unwrap();
        let (ctx, _) = create_test_context();
        assert!(matches!(
            fanout(&ctx, &source, &[]).await,
            Err(Error::Sync(SyncError::NoDestinations))
        ));
    }

    #[tokio::test]
    async fn fanout_with_an_unwritable_target_still_succeeds() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("image.bin");
        std::fs::write(&source, vec![7u8; 64 * 1024]).unwrap();
        let good = dir.path().join("good.bin");
        let bad = dir.path().join("missing-dir").join("bad.bin");

        let (ctx, _) = create_test_context();
        let result = fanout(&ctx, &source, &[good.clone(), bad]).await.unwrap();
        assert!(result.is_success());
        let OperationResult::Run(report) = result else {
            panic!("expected a run report");
        };
        assert_eq!(report.state, RunState::Success);
        assert!(report.failed_tasks.is_empty());
        let verdict = &report.tasks[0].verdict;
        assert!(verdict.iter().any(|v| v.starts_with("good.bin") && v.contains("65536 bytes written")));
        assert!(verdict.iter().any(|v| v.starts_with("bad.bin") && v.contains("failed")));
        assert_eq!(std::fs::read(good).unwrap().len(), 64 * 1024);
    }

    #[tokio::test]
    async fn fanout_fails_when_no_target_is_writable() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("image.bin");
        std::fs::write(&source, vec![7u8; 4096]).unwrap();
        let bad = dir.path().join("missing-dir").join("bad.bin");

        let (ctx, _) = create_test_context();
        let result = fanout(&ctx, &source, &[bad]).await.unwrap();
        assert!(!result.is_success());
        let OperationResult::Run(report) = result else {
            panic!("expected a run report");
        };
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.failed_tasks.len(), 1);
    }

    #[tokio::test]
    async fn missing_devices_are_errors_not_reports() {
        let (ctx, _) = create_test_context();
        let err = read_table(&ctx, Path::new("/dev/refurb-no-such-disk"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disk(DiskError::DeviceNotFound { .. })));
    }

    #[tokio::test]
    async fn image_output_directory_must_exist() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("disk.img");
        std::fs::write(&device, vec![0u8; 4096]).unwrap();
        let (ctx, _) = create_test_context();
        let err = image(&ctx, &device, 1, &dir.path().join("nope").join("p1.img.zst"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ops(OpsError::InvalidOperation { .. })));
    }

    #[tokio::test]
    async fn restore_checks_images_before_touching_the_disk() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("disk.img");
        std::fs::write(&device, vec![0u8; 4096]).unwrap();
        let restore_type =
            RestoreType::from_json(r#"{"id": "mint-21", "plan_kind": "traditional"}"#).unwrap();
        let images = RestoreImages {
            root: dir.path().join("absent.img"),
            efi: None,
        };
        let (ctx, _) = create_test_context();
        let err = restore(&ctx, &device, restore_type, images).await.unwrap_err();
        assert!(matches!(err, Error::Ops(OpsError::ImageNotFound { .. })));
        assert_eq!(std::fs::read(&device).unwrap(), vec![0u8; 4096]);
    }
}
