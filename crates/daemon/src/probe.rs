use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Answers whether something is mounted at a path.
#[async_trait::async_trait]
pub trait MountProbe: Send + Sync {
    async fn is_mounted(&self, target: &str) -> io::Result<bool>;
}

/// Reads the kernel's mount table.
#[derive(Debug, Clone)]
pub struct ProcMountInfo {
    path: PathBuf,
}

impl Default for ProcMountInfo {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MOUNTINFO),
        }
    }
}

impl ProcMountInfo {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl MountProbe for ProcMountInfo {
    async fn is_mounted(&self, target: &str) -> io::Result<bool> {
        let table = tokio::fs::read_to_string(&self.path).await?;
        let target = normalize(target);
        let found = mount_points(&table).any(|point| normalize(&point) == target);
        Ok(found)
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Mount point column of each mountinfo line, with the kernel's octal
/// escapes (`\040` for space and so on) undone.
fn mount_points(table: &str) -> impl Iterator<Item = String> + '_ {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(unescape_octal)
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Poll `probe` until `target` is mounted or `timeout` passes.
pub async fn wait_for_mount(
    probe: &dyn MountProbe,
    target: &str,
    timeout: Duration,
) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        if probe.is_mounted(target).await.map_err(WaitError::Probe)? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(WaitError::Timeout);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out")]
    Timeout,

    #[error("failed to read mount table: {0}")]
    Probe(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TABLE: &str = "\
22 1 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
1042 29 0:88 / /var/lib/kubelet/pods/abc/volumes/kubernetes.io~csi/pvc-1/mount rw,nosuid,nodev,relatime shared:500 - fuse.geesefs volumes:pvc-1 rw,user_id=0,group_id=0,allow_other
1043 29 0:89 / /mnt/with\\040space rw,relatime shared:501 - fuse.rclone :s3:volumes rw
";

    struct Countdown {
        mounted_after: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MountProbe for Countdown {
        async fn is_mounted(&self, _target: &str) -> io::Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(n >= self.mounted_after)
        }
    }

    #[tokio::test]
    async fn test_reads_mountinfo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mountinfo");
        std::fs::write(&path, TABLE).unwrap();
        let probe = ProcMountInfo::with_path(&path);

        assert!(probe
            .is_mounted("/var/lib/kubelet/pods/abc/volumes/kubernetes.io~csi/pvc-1/mount/")
            .await
            .unwrap());
        assert!(probe.is_mounted("/mnt/with space").await.unwrap());
        assert!(!probe.is_mounted("/mnt").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_once_mounted() {
        let probe = Countdown {
            mounted_after: 5,
            calls: AtomicUsize::new(0),
        };
        wait_for_mount(&probe, "/mnt/x", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let probe = Countdown {
            mounted_after: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let started = Instant::now();
        let err = wait_for_mount(&probe, "/mnt/x", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }
}
