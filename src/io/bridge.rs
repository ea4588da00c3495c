//! Export/fetch bridge between the remote inference engine and local disk.
//!
//! The engine exports prediction tiles to a shared folder tree:
//! `<run_name>_quadkeys_predictions/<start>_<end>/*.tif`. The
//! [`StorageBridge`] trait abstracts listing and fetching from that tree so
//! the pipeline can be driven from a synced drive or any other client.
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Entries in a bridge listing that are never tiles.
const IGNORED_ENTRIES: &[&str] = &["cfg.yaml"];

/// Read access to the export folder tree. Folder names are `/`-separated
/// paths relative to the bridge root.
pub trait StorageBridge: Send + Sync {
    /// Immediate sub-folders of `parent`, sorted by name.
    fn list_folders(&self, parent: &str) -> Result<Vec<String>>;

    /// File names directly inside `folder`, sorted by name.
    fn list_files(&self, folder: &str) -> Result<Vec<String>>;

    /// Copy `folder/name` to `dest`.
    fn download_file(&self, folder: &str, name: &str, dest: &Path) -> Result<()>;

    fn folder_exists(&self, folder: &str) -> bool;
}

/// A bridge over a local (synced or mounted) directory.
#[derive(Debug, Clone)]
pub struct LocalFolderBridge {
    root: PathBuf,
}

impl LocalFolderBridge {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, folder: &str) -> PathBuf {
        folder
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |p, s| p.join(s))
    }

    fn entries(&self, folder: &str, dirs: bool) -> Result<Vec<String>> {
        let path = self.resolve(folder);
        if !path.is_dir() {
            return Err(Error::missing(path));
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() != dirs {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !IGNORED_ENTRIES.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl StorageBridge for LocalFolderBridge {
    fn list_folders(&self, parent: &str) -> Result<Vec<String>> {
        self.entries(parent, true)
    }

    fn list_files(&self, folder: &str) -> Result<Vec<String>> {
        self.entries(folder, false)
    }

    fn download_file(&self, folder: &str, name: &str, dest: &Path) -> Result<()> {
        let src = self.resolve(folder).join(name);
        if !src.is_file() {
            return Err(Error::missing(src));
        }
        std::fs::copy(&src, dest)?;
        Ok(())
    }

    fn folder_exists(&self, folder: &str) -> bool {
        self.resolve(folder).is_dir()
    }
}

/// Stage every `.tif` of `folder` into `dest` and return the staged paths.
///
/// A tile that fails to download is logged and left out; the caller merges
/// whatever was staged.
pub fn download_folder(bridge: &dyn StorageBridge, folder: &str, dest: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dest)?;
    let files: Vec<String> = bridge
        .list_files(folder)?
        .into_iter()
        .filter(|f| f.ends_with(".tif"))
        .collect();
    info!("Downloading {} tiles from {}", files.len(), folder);

    let mut staged = Vec::with_capacity(files.len());
    for name in files {
        let target = dest.join(&name);
        match bridge.download_file(folder, &name, &target) {
            Ok(()) => staged.push(target),
            Err(e) => warn!("Could not download {}/{}: {}", folder, name, e),
        }
    }
    Ok(staged)
}

/// Bounded exponential backoff for waiting on remote exports. Durations are
/// in seconds so the policy reads naturally in config files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_secs: f64,
    pub factor: f64,
    pub max_interval_secs: f64,
    /// Give up after this long
    pub deadline_secs: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_secs: 10.0,
            factor: 2.0,
            max_interval_secs: 300.0,
            deadline_secs: 6.0 * 3600.0,
        }
    }
}

fn seconds(arg: &'static str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| Error::InvalidArgument {
        arg,
        value: secs.to_string(),
    })
}

impl PollPolicy {
    /// `(initial, max_interval, deadline)`; negative values count as zero.
    fn durations(&self) -> Result<(Duration, Duration, Duration)> {
        Ok((
            seconds("poll.initial_secs", self.initial_secs)?,
            seconds("poll.max_interval_secs", self.max_interval_secs)?,
            seconds("poll.deadline_secs", self.deadline_secs)?,
        ))
    }

    /// Reject durations that do not fit a `Duration`.
    pub fn validate(&self) -> Result<()> {
        self.durations().map(|_| ())
    }
}

/// Call `probe` until it returns `true`, sleeping with exponential backoff in
/// between. Returns `Error::Timeout` once the deadline has passed.
pub fn poll_until<F>(policy: &PollPolicy, what: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    let (mut interval, max_interval, deadline) = policy.durations()?;

    loop {
        if probe()? {
            debug!("{} ready after {:?}", what, start.elapsed());
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(Error::Timeout {
                what: what.to_string(),
                elapsed,
            });
        }
        debug!("{} not ready, retrying in {:?}", what, interval);
        thread::sleep(interval.min(deadline - elapsed));
        interval = Duration::try_from_secs_f64(interval.as_secs_f64() * policy.factor.max(1.0))
            .map_or(max_interval, |next| next.min(max_interval));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("r1_quadkeys_predictions");
        for w in ["2023-02-24_2023-05-24", "2022-02-24_2022-05-24"] {
            fs::create_dir_all(run.join(w)).unwrap();
            fs::write(run.join(w).join("a.tif"), b"a").unwrap();
            fs::write(run.join(w).join("b.tif"), b"b").unwrap();
            fs::write(run.join(w).join("notes.txt"), b"").unwrap();
        }
        fs::write(run.join("cfg.yaml"), b"").unwrap();
        root
    }

    #[test]
    fn lists_sorted_folders_and_files() {
        let root = tree();
        let bridge = LocalFolderBridge::new(root.path());
        assert_eq!(
            bridge.list_folders("r1_quadkeys_predictions").unwrap(),
            vec!["2022-02-24_2022-05-24", "2023-02-24_2023-05-24"]
        );
        assert!(bridge.list_files("r1_quadkeys_predictions").unwrap().is_empty());
        assert!(bridge.folder_exists("r1_quadkeys_predictions/2022-02-24_2022-05-24"));
        assert!(bridge.list_folders("missing").is_err());
    }

    #[test]
    fn download_folder_stages_tifs_only() {
        let root = tree();
        let dest = tempfile::tempdir().unwrap();
        let bridge = LocalFolderBridge::new(root.path());
        let staged = download_folder(
            &bridge,
            "r1_quadkeys_predictions/2023-02-24_2023-05-24",
            dest.path(),
        )
        .unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(fs::read(dest.path().join("b.tif")).unwrap(), b"b");
    }

    struct FlakyBridge;

    impl StorageBridge for FlakyBridge {
        fn list_folders(&self, _: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn list_files(&self, _: &str) -> Result<Vec<String>> {
            Ok(vec!["ok.tif".into(), "broken.tif".into()])
        }
        fn download_file(&self, _: &str, name: &str, dest: &Path) -> Result<()> {
            if name == "broken.tif" {
                return Err(Error::External("connection reset".into()));
            }
            fs::write(dest, b"x")?;
            Ok(())
        }
        fn folder_exists(&self, _: &str) -> bool {
            true
        }
    }

    #[test]
    fn failed_tiles_are_skipped() {
        let dest = tempfile::tempdir().unwrap();
        let staged = download_folder(&FlakyBridge, "any", dest.path()).unwrap();
        assert_eq!(staged, vec![dest.path().join("ok.tif")]);
    }

    fn fast_policy(deadline_secs: f64) -> PollPolicy {
        PollPolicy {
            initial_secs: 0.001,
            factor: 2.0,
            max_interval_secs: 0.01,
            deadline_secs,
        }
    }

    #[test]
    fn poll_returns_once_probe_succeeds() {
        let mut calls = 0;
        poll_until(&fast_policy(5.0), "export", || {
            calls += 1;
            Ok(calls == 4)
        })
        .unwrap();
        assert_eq!(calls, 4);
    }

    #[test]
    fn poll_times_out() {
        let err = poll_until(&fast_policy(0.05), "export", || Ok(false)).unwrap_err();
        assert!(matches!(err, Error::Timeout { ref what, .. } if what == "export"));
    }

    #[test]
    fn probe_errors_propagate() {
        let err = poll_until(&fast_policy(1.0), "export", || {
            Err(Error::External("auth".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::External(_)));
    }

    #[test]
    fn oversized_durations_are_rejected_not_panicking() {
        let policy: PollPolicy = serde_json::from_str(r#"{"deadline_secs": 1e20}"#).unwrap();
        assert!(matches!(
            policy.validate(),
            Err(Error::InvalidArgument { arg: "poll.deadline_secs", .. })
        ));
        let err = poll_until(&policy, "export", || Ok(true)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn huge_growth_factor_caps_at_max_interval() {
        let policy = PollPolicy {
            factor: 1e300,
            ..fast_policy(0.05)
        };
        let err = poll_until(&policy, "export", || Ok(false)).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
