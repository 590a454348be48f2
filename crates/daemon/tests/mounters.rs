use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use common::credentials::{ENV_ACCESS_KEY_ID, ENV_SECRET_ACCESS_KEY};
use common::prelude::{MounterKind, StoreConfig, VolumeMeta};
use csi_s3_daemon::testkit::{FakeProbe, FakeRunner, MountContextBuilder};
use csi_s3_daemon::{MountContext, MountError, Mounter};

const ENDPOINT: &str = "http://minio.minio.svc:9000";

fn static_config() -> StoreConfig {
    StoreConfig {
        access_key_id: "AKIA".to_string(),
        secret_access_key: "secret".to_string(),
        region: "us-east-1".to_string(),
        endpoint: ENDPOINT.to_string(),
        ..Default::default()
    }
}

fn context(runner: Arc<FakeRunner>, probe: Arc<FakeProbe>) -> Arc<MountContext> {
    MountContextBuilder::new()
        .runner(runner)
        .probe(probe)
        .build()
}

#[test]
fn test_mounter_follows_volume_kind() {
    let ctx = MountContextBuilder::new().build();
    for kind in [MounterKind::Geesefs, MounterKind::Rclone, MounterKind::S3fs] {
        let meta = VolumeMeta::new("volumes", "pvc-1").with_mounter(kind);
        let mounter = Mounter::new(meta, static_config(), ctx.clone());
        assert_eq!(mounter.kind(), kind);
    }
}

#[tokio::test]
async fn test_rclone_daemonizes_without_polling() {
    let runner = Arc::new(FakeRunner::new());
    let probe = Arc::new(FakeProbe::empty());
    let meta = VolumeMeta::new("volumes", "pvc-1")
        .with_mounter(MounterKind::Rclone)
        .with_options(["--vfs-cache-max-size=1G"]);

    Mounter::new(meta, static_config(), context(runner.clone(), probe.clone()))
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap();

    let calls = runner.calls_to("rclone");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec![
            "mount",
            ":s3:volumes/pvc-1",
            "/mnt/t",
            "--daemon",
            "--s3-provider=AWS",
            "--s3-env-auth=true",
            "--s3-endpoint=http://minio.minio.svc:9000",
            "--allow-other",
            "--vfs-cache-mode=writes",
            "--s3-region=us-east-1",
            "--vfs-cache-max-size=1G",
        ]
    );
    assert_eq!(calls[0].env.get(ENV_ACCESS_KEY_ID).map(String::as_str), Some("AKIA"));
    assert_eq!(
        calls[0].env.get(ENV_SECRET_ACCESS_KEY).map(String::as_str),
        Some("secret")
    );
    assert_eq!(probe.checks(), 0);
}

#[tokio::test]
async fn test_rclone_without_prefix_or_region() {
    let runner = Arc::new(FakeRunner::new());
    let config = StoreConfig {
        region: String::new(),
        ..static_config()
    };
    let meta = VolumeMeta::new("volumes", "").with_mounter(MounterKind::Rclone);

    Mounter::new(meta, config, context(runner.clone(), Arc::new(FakeProbe::empty())))
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap();

    let args = &runner.calls_to("rclone")[0].args;
    assert_eq!(args[1], ":s3:volumes");
    assert!(!args.iter().any(|arg| arg.starts_with("--s3-region")));
}

#[tokio::test]
async fn test_rclone_failure_surfaces() {
    let runner = Arc::new(FakeRunner::new());
    runner.fail("rclone", 1, "Fatal error: failed to mount FUSE fs");
    let meta = VolumeMeta::new("volumes", "pvc-1").with_mounter(MounterKind::Rclone);

    let err = Mounter::new(meta, static_config(), context(runner, Arc::new(FakeProbe::empty())))
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Exec(_)));
    assert!(err.to_string().contains("failed to mount FUSE fs"));
}

#[tokio::test]
async fn test_s3fs_static_keys_use_passwd_file() {
    let dir = tempfile::tempdir().unwrap();
    let passwd = dir.path().join(".passwd-s3fs");
    let runner = Arc::new(FakeRunner::new());
    let ctx = MountContextBuilder::new()
        .runner(runner.clone())
        .passwd_file(&passwd)
        .build();
    let meta = VolumeMeta::new("volumes", "pvc-1").with_mounter(MounterKind::S3fs);

    Mounter::new(meta, static_config(), ctx)
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&passwd).unwrap(), "AKIA:secret");
    let mode = std::fs::metadata(&passwd).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    let calls = runner.calls_to("s3fs");
    assert_eq!(calls.len(), 1);
    let passwd_option = format!("passwd_file={}", passwd.display());
    assert_eq!(
        calls[0].args,
        vec![
            "volumes:/pvc-1",
            "/mnt/t",
            "-o",
            "allow_other",
            "-o",
            "mp_umask=000",
            "-o",
            passwd_option.as_str(),
            "-o",
            "use_path_request_style",
            "-o",
            "url=http://minio.minio.svc:9000",
            "-o",
            "endpoint=us-east-1",
        ]
    );
    assert!(calls[0].env.is_empty());
}

#[tokio::test]
async fn test_s3fs_role_mode_skips_passwd_file() {
    let dir = tempfile::tempdir().unwrap();
    let passwd = dir.path().join(".passwd-s3fs");
    let runner = Arc::new(FakeRunner::new());
    let ctx = MountContextBuilder::new()
        .runner(runner.clone())
        .passwd_file(&passwd)
        .build();
    let config = StoreConfig {
        role_arn: "arn:aws:iam::000000000000:role/csi".to_string(),
        region: "us-east-1".to_string(),
        ..Default::default()
    };
    let meta = VolumeMeta::new("volumes", "").with_mounter(MounterKind::S3fs);

    Mounter::new(meta, config, ctx)
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap();

    assert!(!passwd.exists());
    let args = &runner.calls_to("s3fs")[0].args;
    assert_eq!(args[0], "volumes:/");
    assert!(args.contains(&"iam_role=arn:aws:iam::000000000000:role/csi".to_string()));
    assert!(args.contains(&"endpoint=us-east-1".to_string()));
    assert!(!args.iter().any(|arg| arg.starts_with("passwd_file=")));
    assert!(!args.iter().any(|arg| arg.starts_with("url=")));
}

#[tokio::test]
async fn test_s3fs_waits_for_mount_point() {
    let runner = Arc::new(FakeRunner::new());
    let probe = Arc::new(FakeProbe::empty());
    probe.mount("/mnt/t");
    let dir = tempfile::tempdir().unwrap();
    let ctx = MountContextBuilder::new()
        .runner(runner)
        .probe(probe.clone())
        .passwd_file(dir.path().join("passwd"))
        .build();
    let meta = VolumeMeta::new("volumes", "pvc-1").with_mounter(MounterKind::S3fs);

    Mounter::new(meta, static_config(), ctx)
        .mount("/mnt/t", "pvc-1")
        .await
        .unwrap();
    assert_eq!(probe.checks(), 1);
}
