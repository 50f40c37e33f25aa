use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use notify::event::{EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::listing::{is_visible, FileInfo, FileListingFilter, FileTree};

/// 監控檔案變更時可能回傳的錯誤。 / Error type for file monitoring operations.
#[derive(Debug, Error)]
pub enum FileMonitorError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("failed to list {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("monitor {0} is not registered")]
    UnknownHandle(u64),
    #[error("monitor channel disconnected")]
    ChannelDisconnected,
    #[error("failed to start monitor thread: {0}")]
    Spawn(#[source] io::Error),
}

/// 已註冊監視器的識別。 / Identifies one registered directory monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorHandle {
    id: u64,
    path: PathBuf,
}

impl MonitorHandle {
    pub fn new(id: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 受監控的根目錄。 / Root directory being monitored.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 監控到的變更種類。 / Classifies observed file system changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Removed,
}

/// 單一檔案變更。 / One add/modify/remove event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeEvent {
    pub kind: FileChangeKind,
    pub file: FileInfo,
}

impl FileChangeEvent {
    pub fn new(kind: FileChangeKind, file: FileInfo) -> Self {
        Self { kind, file }
    }
}

/// 註冊成功時附帶的初始檔案樹。 / Payload delivered when registration completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRegistration {
    pub handle: MonitorHandle,
    pub tree: FileTree,
}

/// 監視器送往控制執行緒的生命週期訊息。 / Lifecycle messages a watcher sends to the control thread.
///
/// Every message names the monitor (or requested path) it belongs to, so the
/// receiver can discard leftovers from a monitor it no longer owns.
#[derive(Debug)]
pub enum MonitorMessage {
    Registered(MonitorRegistration),
    RegistrationError {
        path: PathBuf,
        error: FileMonitorError,
    },
    MonitoringError {
        handle: MonitorHandle,
        error: FileMonitorError,
    },
    FilesChanged {
        handle: MonitorHandle,
        events: Vec<FileChangeEvent>,
    },
    Unregistered(MonitorHandle),
}

/// Sending half used by watchers; the receiving half is the control thread's inbox.
pub type MonitorSender = Sender<MonitorMessage>;

/// 建立監視器訊息通道。 / Creates the watcher-to-control-thread channel.
pub fn monitor_channel() -> (MonitorSender, Receiver<MonitorMessage>) {
    mpsc::channel()
}

/// 目錄監視機制必須滿足的介面。 / Contract every directory watching facility satisfies.
///
/// Outcomes of `register_monitor` are reported asynchronously through the
/// watcher's [`MonitorSender`] as `Registered` or `RegistrationError`. An `Err`
/// return is an immediate failure and no message is sent for it.
pub trait DirectoryWatcher {
    fn register_monitor(
        &mut self,
        path: &Path,
        recursive: bool,
        filter: FileListingFilter,
    ) -> Result<(), FileMonitorError>;

    /// 釋放監視器；完成後送出 `Unregistered`。 / Releases the monitor; `Unregistered` acknowledges it.
    fn unregister_monitor(&mut self, handle: &MonitorHandle) -> Result<(), FileMonitorError>;
}

type LiveWatchers = Arc<Mutex<HashMap<u64, RecommendedWatcher>>>;

/// 以 `notify` 實作的目錄監視器。 / Directory watcher backed by `notify`.
///
/// The initial scan and the watch setup run on a worker thread, so
/// `register_monitor` returns as soon as the request is validated.
pub struct NotifyWatcher {
    tx: MonitorSender,
    next_id: u64,
    watchers: LiveWatchers,
}

impl NotifyWatcher {
    pub fn new(tx: MonitorSender) -> Self {
        Self {
            tx,
            next_id: 1,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 建立監視器與其收件匣。 / Creates a watcher together with its inbox.
    pub fn with_inbox() -> (Self, Receiver<MonitorMessage>) {
        let (tx, rx) = monitor_channel();
        (Self::new(tx), rx)
    }

    /// 目前仍在運作的監視器數量。 / Number of live monitors.
    pub fn active_monitors(&self) -> usize {
        lock(&self.watchers).len()
    }
}

fn lock(watchers: &LiveWatchers) -> MutexGuard<'_, HashMap<u64, RecommendedWatcher>> {
    // A panic while holding the lock leaves the map itself consistent.
    watchers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn start(
    tx: &MonitorSender,
    handle: &MonitorHandle,
    recursive: bool,
    filter: FileListingFilter,
) -> Result<(RecommendedWatcher, FileTree), FileMonitorError> {
    let tree = FileTree::scan(handle.path(), recursive, &filter)?;

    let tx = tx.clone();
    let root = handle.path().to_path_buf();
    let event_handle = handle.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            let message = match res {
                Ok(event) => {
                    let events = map_event(event)
                        .into_iter()
                        .filter(|change| is_visible(&root, &change.file, &filter))
                        .collect::<Vec<_>>();
                    if events.is_empty() {
                        return;
                    }
                    MonitorMessage::FilesChanged {
                        handle: event_handle.clone(),
                        events,
                    }
                }
                Err(err) => MonitorMessage::MonitoringError {
                    handle: event_handle.clone(),
                    error: err.into(),
                },
            };
            let _ = tx.send(message);
        },
        Config::default(),
    )?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(handle.path(), mode)?;
    Ok((watcher, tree))
}

impl DirectoryWatcher for NotifyWatcher {
    fn register_monitor(
        &mut self,
        path: &Path,
        recursive: bool,
        filter: FileListingFilter,
    ) -> Result<(), FileMonitorError> {
        if !path.is_dir() {
            return Err(FileMonitorError::NotADirectory(path.to_path_buf()));
        }

        let handle = MonitorHandle::new(self.next_id, path);
        self.next_id += 1;

        let tx = self.tx.clone();
        let watchers = Arc::clone(&self.watchers);
        thread::Builder::new()
            .name(format!("monitor-{}", handle.id()))
            .spawn(move || {
                let message = match start(&tx, &handle, recursive, filter) {
                    Ok((watcher, tree)) => {
                        debug!(
                            id = handle.id(),
                            path = %handle.path().display(),
                            entries = tree.len(),
                            "monitor registered"
                        );
                        lock(&watchers).insert(handle.id(), watcher);
                        MonitorMessage::Registered(MonitorRegistration { handle, tree })
                    }
                    Err(error) => MonitorMessage::RegistrationError {
                        path: handle.path().to_path_buf(),
                        error,
                    },
                };
                if let Err(mpsc::SendError(MonitorMessage::Registered(registration))) =
                    tx.send(message)
                {
                    // Nobody will ever unregister it.
                    lock(&watchers).remove(&registration.handle.id());
                }
            })
            .map_err(FileMonitorError::Spawn)?;
        Ok(())
    }

    fn unregister_monitor(&mut self, handle: &MonitorHandle) -> Result<(), FileMonitorError> {
        let mut watcher = lock(&self.watchers)
            .remove(&handle.id())
            .ok_or(FileMonitorError::UnknownHandle(handle.id()))?;
        // 監視路徑可能已被刪除，失敗無妨。 / The root may already be gone; dropping the watcher stops it regardless.
        let _ = watcher.unwatch(handle.path());
        drop(watcher);
        debug!(id = handle.id(), "monitor unregistered");
        self.tx
            .send(MonitorMessage::Unregistered(handle.clone()))
            .map_err(|_| FileMonitorError::ChannelDisconnected)
    }
}

fn map_event(event: notify::Event) -> Vec<FileChangeEvent> {
    let removed_is_dir = matches!(event.kind, EventKind::Remove(RemoveKind::Folder));
    let added = |path: &PathBuf| describe(FileChangeKind::Added, path, false);
    let removed = |path: &PathBuf| describe(FileChangeKind::Removed, path, removed_is_dir);

    match event.kind {
        EventKind::Create(_) => event.paths.iter().map(added).collect(),
        EventKind::Remove(_) => event.paths.iter().map(removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(added).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            vec![removed(&event.paths[0]), added(&event.paths[1])]
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                if path.exists() {
                    added(path)
                } else {
                    removed(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|path| describe(FileChangeKind::Modified, path, false))
            .collect(),
        _ => Vec::new(),
    }
}

fn describe(kind: FileChangeKind, path: &Path, removed_is_dir: bool) -> FileChangeEvent {
    let file = match kind {
        FileChangeKind::Removed => FileInfo::removed(path, removed_is_dir),
        _ => FileInfo::from_path(path).unwrap_or_else(|_| FileInfo::removed(path, false)),
    };
    FileChangeEvent::new(kind, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::default_listing_filter;
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn rename_both_maps_to_remove_then_add() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("old.txt");
        let to = dir.path().join("new.txt");
        fs::write(&to, "x").unwrap();

        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        let mapped = map_event(event);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].kind, FileChangeKind::Removed);
        assert_eq!(mapped[0].file.path, from);
        assert_eq!(mapped[1].kind, FileChangeKind::Added);
        assert_eq!(mapped[1].file.path, to);
        assert_eq!(mapped[1].file.size, 1);
    }

    #[test]
    fn access_events_are_ignored() {
        let event = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/tmp/whatever"));
        assert!(map_event(event).is_empty());
    }

    #[test]
    fn register_missing_directory_fails_immediately() {
        let dir = tempdir().unwrap();
        let (mut watcher, inbox) = NotifyWatcher::with_inbox();
        let err = watcher
            .register_monitor(&dir.path().join("absent"), true, default_listing_filter())
            .unwrap_err();
        assert!(matches!(err, FileMonitorError::NotADirectory(_)));
        assert!(inbox.try_recv().is_err());
    }

    #[test]
    fn detect_file_creation_after_registration() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("existing.txt"), "initial").unwrap();

        let (mut watcher, inbox) = NotifyWatcher::with_inbox();
        watcher
            .register_monitor(dir.path(), true, default_listing_filter())
            .unwrap();

        let handle = match inbox.recv_timeout(Duration::from_secs(2)).unwrap() {
            MonitorMessage::Registered(registration) => {
                assert!(registration.tree.contains(dir.path().join("existing.txt")));
                registration.handle
            }
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(watcher.active_monitors(), 1);

        // 等待 watcher 啟動。 / Allow watcher to settle.
        thread::sleep(Duration::from_millis(100));
        let created = dir.path().join("created.txt");
        fs::write(&created, "hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while Instant::now() < deadline && !seen {
            if let Ok(MonitorMessage::FilesChanged { events, .. }) =
                inbox.recv_timeout(Duration::from_millis(200))
            {
                seen = events.iter().any(|event| event.file.path.ends_with("created.txt"));
            }
        }
        assert!(seen, "expected a change event for created.txt");

        watcher.unregister_monitor(&handle).unwrap();
        assert_eq!(watcher.active_monitors(), 0);
        let acknowledged = inbox
            .try_iter()
            .any(|message| matches!(message, MonitorMessage::Unregistered(ref h) if *h == handle));
        assert!(acknowledged);
        assert!(matches!(
            watcher.unregister_monitor(&handle),
            Err(FileMonitorError::UnknownHandle(_))
        ));
    }
}
