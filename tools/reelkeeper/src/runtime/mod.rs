use crate::errors::ReelError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReelError>;

    fn sleep_for(&self, duration: Duration) -> Result<(), ReelError> {
        if duration.is_zero() {
            return Ok(());
        }
        self.sleep_until(self.now() + duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub len: u64,
    pub modified: SystemTime,
    pub is_file: bool,
}

/// Filesystem surface the engine needs over the shared artifact directory.
pub trait ArtifactFs: Send + Sync {
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ReelError>;
    fn metadata(&self, path: &Path) -> Result<EntryMeta, ReelError>;
    /// Returns the number of bytes copied.
    fn copy(&self, from: &Path, to: &Path) -> Result<u64, ReelError>;
    fn remove_file(&self, path: &Path) -> Result<(), ReelError>;
    fn read_to_string(&self, path: &Path) -> Result<String, ReelError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReelError>;
    /// Appends to `path`, creating it when absent.
    fn append_string(&self, path: &Path, contents: &str) -> Result<(), ReelError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), ReelError>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdout_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), ReelError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReelError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionArtifactFs;

impl ArtifactFs for ProductionArtifactFs {
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ReelError> {
        let entries = std::fs::read_dir(dir).map_err(|e| ReelError::Io(e.to_string()))?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect())
    }

    fn metadata(&self, path: &Path) -> Result<EntryMeta, ReelError> {
        let meta = std::fs::metadata(path).map_err(|e| ReelError::Io(e.to_string()))?;
        let modified = meta.modified().map_err(|e| ReelError::Io(e.to_string()))?;
        Ok(EntryMeta {
            len: meta.len(),
            modified,
            is_file: meta.is_file(),
        })
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<u64, ReelError> {
        std::fs::copy(from, to).map_err(|e| ReelError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReelError> {
        std::fs::remove_file(path).map_err(|e| ReelError::Io(e.to_string()))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, ReelError> {
        std::fs::read_to_string(path).map_err(|e| ReelError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReelError> {
        std::fs::write(path, contents).map_err(|e| ReelError::Io(e.to_string()))
    }

    fn append_string(&self, path: &Path, contents: &str) -> Result<(), ReelError> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ReelError::Io(e.to_string()))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| ReelError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReelError> {
        std::fs::create_dir_all(path).map_err(|e| ReelError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdout_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdout())
    }

    fn write_line(&self, line: &str) -> Result<(), ReelError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ReelError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn ArtifactFs>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionArtifactFs),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReelError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

/// Failure injected into the next `FakeArtifactFs::copy` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFailure {
    /// Writes `bytes` to the destination, then reports an error.
    ErrorAfterPartial { bytes: u64 },
    /// Reports success but only `bytes` reach the destination.
    Truncated { bytes: u64 },
}

#[derive(Debug, Clone)]
struct FakeEntry {
    len: u64,
    modified: SystemTime,
    samples: VecDeque<(u64, SystemTime)>,
    contents: Option<String>,
}

#[derive(Debug, Default)]
struct FakeFsState {
    files: BTreeMap<PathBuf, FakeEntry>,
    dirs: BTreeSet<PathBuf>,
    copy_failure: Option<CopyFailure>,
    failing_removals: BTreeSet<PathBuf>,
    read_only: bool,
}

/// In-memory artifact directory. Files carry only a size and mtime; a
/// scripted sample queue makes successive `metadata` calls observe a file
/// that is still being written.
#[derive(Default, Clone)]
pub struct FakeArtifactFs {
    state: Arc<Mutex<FakeFsState>>,
}

impl FakeArtifactFs {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        let fs = Self::default();
        fs.add_dir(dir);
        fs
    }

    pub fn add_dir(&self, dir: impl Into<PathBuf>) {
        self.state.lock().expect("fs lock").dirs.insert(dir.into());
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, len: u64, modified: SystemTime) {
        self.state.lock().expect("fs lock").files.insert(
            path.into(),
            FakeEntry {
                len,
                modified,
                samples: VecDeque::new(),
                contents: None,
            },
        );
    }

    /// Queues the (size, mtime) pairs returned by the next `metadata` calls.
    /// The last observed pair sticks once the queue drains.
    pub fn script_samples(&self, path: &Path, samples: Vec<(u64, SystemTime)>) {
        if let Some(entry) = self.state.lock().expect("fs lock").files.get_mut(path) {
            entry.samples = samples.into();
        }
    }

    pub fn fail_next_copy(&self, failure: CopyFailure) {
        self.state.lock().expect("fs lock").copy_failure = Some(failure);
    }

    pub fn fail_removal_of(&self, path: impl Into<PathBuf>) {
        self.state
            .lock()
            .expect("fs lock")
            .failing_removals
            .insert(path.into());
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.state.lock().expect("fs lock").read_only = read_only;
    }

    pub fn file_len(&self, path: &Path) -> Option<u64> {
        self.state
            .lock()
            .expect("fs lock")
            .files
            .get(path)
            .map(|entry| entry.len)
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        self.state
            .lock()
            .expect("fs lock")
            .files
            .get(path)
            .and_then(|entry| entry.contents.clone())
    }

    pub fn file_names(&self, dir: &Path) -> Vec<String> {
        self.state
            .lock()
            .expect("fs lock")
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect()
    }
}

impl ArtifactFs for FakeArtifactFs {
    fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, ReelError> {
        let state = self.state.lock().expect("fs lock");
        if !state.dirs.contains(dir) {
            return Err(ReelError::Io(format!("missing directory {}", dir.display())));
        }
        let files = state
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned();
        let dirs = state
            .dirs
            .iter()
            .filter(|path| path.parent() == Some(dir))
            .cloned();
        Ok(files.chain(dirs).collect())
    }

    fn metadata(&self, path: &Path) -> Result<EntryMeta, ReelError> {
        let mut state = self.state.lock().expect("fs lock");
        if let Some(entry) = state.files.get_mut(path) {
            if let Some((len, modified)) = entry.samples.pop_front() {
                entry.len = len;
                entry.modified = modified;
            }
            return Ok(EntryMeta {
                len: entry.len,
                modified: entry.modified,
                is_file: true,
            });
        }
        if state.dirs.contains(path) {
            return Ok(EntryMeta {
                len: 0,
                modified: SystemTime::UNIX_EPOCH,
                is_file: false,
            });
        }
        Err(ReelError::Io(format!("missing file {}", path.display())))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<u64, ReelError> {
        let mut state = self.state.lock().expect("fs lock");
        if state.read_only {
            return Err(ReelError::Io("read-only file system".to_string()));
        }
        let source = state
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| ReelError::Io(format!("missing file {}", from.display())))?;
        let mut copied = FakeEntry {
            samples: VecDeque::new(),
            ..source
        };
        match state.copy_failure.take() {
            Some(CopyFailure::ErrorAfterPartial { bytes }) => {
                copied.len = bytes;
                state.files.insert(to.to_path_buf(), copied);
                Err(ReelError::Io("injected copy failure".to_string()))
            }
            Some(CopyFailure::Truncated { bytes }) => {
                copied.len = bytes;
                state.files.insert(to.to_path_buf(), copied);
                Ok(bytes)
            }
            None => {
                let len = copied.len;
                state.files.insert(to.to_path_buf(), copied);
                Ok(len)
            }
        }
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReelError> {
        let mut state = self.state.lock().expect("fs lock");
        if state.failing_removals.contains(path) {
            return Err(ReelError::Io(format!("permission denied {}", path.display())));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ReelError::Io(format!("missing file {}", path.display())))
    }

    fn read_to_string(&self, path: &Path) -> Result<String, ReelError> {
        self.contents(path)
            .ok_or_else(|| ReelError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReelError> {
        let mut state = self.state.lock().expect("fs lock");
        if state.read_only {
            return Err(ReelError::Io("read-only file system".to_string()));
        }
        state.files.insert(
            path.to_path_buf(),
            FakeEntry {
                len: contents.len() as u64,
                modified: SystemTime::UNIX_EPOCH,
                samples: VecDeque::new(),
                contents: Some(contents.to_string()),
            },
        );
        Ok(())
    }

    fn append_string(&self, path: &Path, contents: &str) -> Result<(), ReelError> {
        let existing = self.contents(path).unwrap_or_default();
        self.write_string(path, &format!("{existing}{contents}"))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReelError> {
        let mut state = self.state.lock().expect("fs lock");
        if state.read_only {
            return Err(ReelError::Io("read-only file system".to_string()));
        }
        for ancestor in path.ancestors() {
            if !ancestor.as_os_str().is_empty() {
                state.dirs.insert(ancestor.to_path_buf());
            }
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().expect("fs lock");
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state.lock().expect("fs lock").dirs.contains(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdout_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), ReelError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactFs, Clock, CopyFailure, FakeArtifactFs, FakeClock};
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    #[test]
    fn fake_clock_sleep_advances_time() {
        let clock = FakeClock::default();
        clock.sleep_for(Duration::from_secs(3)).expect("sleep");
        clock.sleep_for(Duration::ZERO).expect("sleep");
        assert_eq!(
            clock.now(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(3)
        );
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[test]
    fn scripted_samples_drain_then_stick() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let path = Path::new("/videos/a.mp4");
        let t = SystemTime::UNIX_EPOCH;
        fs.add_file(path, 10, t);
        fs.script_samples(path, vec![(20, t), (30, t)]);
        assert_eq!(fs.metadata(path).expect("meta").len, 20);
        assert_eq!(fs.metadata(path).expect("meta").len, 30);
        assert_eq!(fs.metadata(path).expect("meta").len, 30);
    }

    #[test]
    fn injected_copy_failure_leaves_partial_destination() {
        let fs = FakeArtifactFs::with_dir("/videos");
        fs.add_file("/videos/a.mp4", 1_000, SystemTime::UNIX_EPOCH);
        fs.fail_next_copy(CopyFailure::ErrorAfterPartial { bytes: 10 });
        assert!(fs
            .copy(Path::new("/videos/a.mp4"), Path::new("/videos/b.mp4"))
            .is_err());
        assert_eq!(fs.file_len(Path::new("/videos/b.mp4")), Some(10));
        assert!(fs.read_dir(Path::new("/missing")).is_err());
    }
}
