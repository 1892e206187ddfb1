// Integration tests for restore-from-snapshot

mod common;

use common::{add_epic, Fixture, PASSPHRASE};
use rtm_backup::backup::{safety_copy_path, RestoreStage};
use rtm_backup::{BackupError, BackupOrchestrator};
use std::path::Path;

fn stage_of(err: &BackupError) -> Option<RestoreStage> {
    match err {
        BackupError::Restore { stage, .. } => Some(*stage),
        _ => None,
    }
}

#[tokio::test]
async fn test_restore_over_live_database_keeps_safety_copy() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let run = orchestrator.create_backup().await.unwrap();

    add_epic(&fixture.database, "Added after the backup").await;
    let before_restore = std::fs::read(&fixture.database).unwrap();

    let restored = orchestrator
        .restore(&run.snapshots[0].file_path, None)
        .await
        .unwrap();

    let safety = safety_copy_path(&fixture.database);
    assert_eq!(restored.safety_copy_path.as_deref(), Some(safety.as_path()));
    assert_eq!(std::fs::read(&safety).unwrap(), before_restore);

    assert!(restored.integrity_verified);
    assert!(restored.recovery_time_target_met);
    assert!(!restored.decrypted);
    assert_eq!(restored.target_path, fixture.database);
    assert_eq!(restored.restored_entity_counts["epics"], 2);
    assert_eq!(restored.restored_entity_counts["total"], 7);
}

#[tokio::test]
async fn test_restore_into_new_target() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let run = orchestrator.create_backup().await.unwrap();
    let target = fixture.dir.path().join("restored").join("rtm.db");

    let restored = orchestrator
        .restore(&run.snapshots[0].file_path, Some(&target))
        .await
        .unwrap();

    assert!(target.is_file());
    assert!(restored.safety_copy_path.is_none());
    assert!(!safety_copy_path(&target).exists());
    assert_eq!(restored.restored_entity_counts["defects"], 1);
}

#[tokio::test]
async fn test_restore_from_encrypted_snapshot() {
    let fixture = Fixture::new(1, true).await;
    let orchestrator = BackupOrchestrator::new(fixture.config().with_passphrase(PASSPHRASE)).unwrap();
    let run = orchestrator.create_backup().await.unwrap();
    let encrypted = run.snapshots[0].encrypted_path.clone().unwrap();
    assert!(!run.snapshots[0].file_path.exists());

    let target = fixture.dir.path().join("restored.db");
    let restored = orchestrator.restore(&encrypted, Some(&target)).await.unwrap();

    assert!(restored.decrypted);
    assert!(restored.integrity_verified);
    assert_eq!(restored.restored_entity_counts["user_stories"], 3);
    assert!(!fixture.dir.path().join("restored.db.restore-staging").exists());
}

#[tokio::test]
async fn test_encrypted_restore_without_passphrase_fails_before_target() {
    let fixture = Fixture::new(1, true).await;
    let encrypting = BackupOrchestrator::new(fixture.config().with_passphrase(PASSPHRASE)).unwrap();
    let run = encrypting.create_backup().await.unwrap();
    let encrypted = run.snapshots[0].encrypted_path.clone().unwrap();
    let live_bytes = std::fs::read(&fixture.database).unwrap();

    let plain = BackupOrchestrator::new(fixture.config()).unwrap();
    let err = plain.restore(&encrypted, None).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(RestoreStage::Decrypt));
    assert_eq!(std::fs::read(&fixture.database).unwrap(), live_bytes);
    assert!(!safety_copy_path(&fixture.database).exists());
}

#[tokio::test]
async fn test_wrong_passphrase_cannot_restore() {
    let fixture = Fixture::new(1, true).await;
    let encrypting = BackupOrchestrator::new(fixture.config().with_passphrase(PASSPHRASE)).unwrap();
    let run = encrypting.create_backup().await.unwrap();
    let encrypted = run.snapshots[0].encrypted_path.clone().unwrap();

    let other = BackupOrchestrator::new(fixture.config().with_passphrase("not the passphrase")).unwrap();
    let err = other.restore(&encrypted, None).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(RestoreStage::Decrypt));
}

#[tokio::test]
async fn test_tampered_snapshot_is_rejected_before_target() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let run = orchestrator.create_backup().await.unwrap();
    let snapshot = &run.snapshots[0].file_path;

    let mut bytes = std::fs::read(snapshot).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(snapshot, &bytes).unwrap();
    let live_bytes = std::fs::read(&fixture.database).unwrap();

    let err = orchestrator.restore(snapshot, None).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(RestoreStage::ValidateSource));
    assert_eq!(std::fs::read(&fixture.database).unwrap(), live_bytes);
    assert!(!safety_copy_path(&fixture.database).exists());
}

#[tokio::test]
async fn test_garbage_source_without_sidecar_is_rejected() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();
    let source = fixture.destinations[0].join("rtm_backup_20240101_000000.db");
    std::fs::write(&source, vec![0x42; 8192]).unwrap();

    let err = orchestrator.restore(&source, None).await.unwrap_err();

    assert_eq!(stage_of(&err), Some(RestoreStage::ValidateSource));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn test_missing_source() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(fixture.config()).unwrap();

    let err = orchestrator
        .restore(Path::new("/nonexistent/rtm_backup_20240101_000000.db"), None)
        .await
        .unwrap_err();

    assert_eq!(stage_of(&err), Some(RestoreStage::ResolveSource));
}

#[tokio::test]
async fn test_snapshot_missing_essential_table_is_rejected() {
    let fixture = Fixture::new(1, false).await;
    let orchestrator = BackupOrchestrator::new(
        fixture
            .config()
            .with_essential_tables(vec!["epics".to_string(), "requirements".to_string()]),
    )
    .unwrap();
    let run = orchestrator.create_backup().await.unwrap();
    assert!(!run.integrity_validated);

    let err = orchestrator
        .restore(&run.snapshots[0].file_path, None)
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(RestoreStage::ValidateSource));
}
