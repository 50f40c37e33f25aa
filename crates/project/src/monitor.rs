use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};

use rsession_core::{
    ClientEventQueue, DirectoryWatcher, FileChangeEvent, FileListingFilter, FileMonitorError,
    MonitorHandle, MonitorMessage, MonitorRegistration, Signal,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// 監視器的狀態。 / Lifecycle state of the project directory monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NotMonitoring,
    Registering,
    Monitoring,
    Errored,
}

/// 訂閱者可選擇性提供的回呼。 / Optional callbacks a subscriber may attach, one per event kind.
#[derive(Default)]
pub struct FileMonitorCallbacks {
    pub on_registered: Option<Box<dyn FnMut(&MonitorRegistration)>>,
    pub on_registration_error: Option<Box<dyn FnMut(&FileMonitorError)>>,
    pub on_monitoring_error: Option<Box<dyn FnMut(&FileMonitorError)>>,
    pub on_files_changed: Option<Box<dyn FnMut(&[FileChangeEvent])>>,
    pub on_unregistered: Option<Box<dyn FnMut(&MonitorHandle)>>,
}

impl FileMonitorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_registered(mut self, f: impl FnMut(&MonitorRegistration) + 'static) -> Self {
        self.on_registered = Some(Box::new(f));
        self
    }

    pub fn on_registration_error(mut self, f: impl FnMut(&FileMonitorError) + 'static) -> Self {
        self.on_registration_error = Some(Box::new(f));
        self
    }

    pub fn on_monitoring_error(mut self, f: impl FnMut(&FileMonitorError) + 'static) -> Self {
        self.on_monitoring_error = Some(Box::new(f));
        self
    }

    pub fn on_files_changed(mut self, f: impl FnMut(&[FileChangeEvent]) + 'static) -> Self {
        self.on_files_changed = Some(Box::new(f));
        self
    }

    pub fn on_unregistered(mut self, f: impl FnMut(&MonitorHandle) + 'static) -> Self {
        self.on_unregistered = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Default)]
struct Subscribers {
    registered: Signal<MonitorRegistration>,
    registration_error: Signal<FileMonitorError>,
    monitoring_error: Signal<FileMonitorError>,
    files_changed: Signal<[FileChangeEvent]>,
    unregistered: Signal<MonitorHandle>,
}

/// 專案目錄監視器的生命週期與事件轉播。
/// Owns the project directory monitor and rebroadcasts its lifecycle to subscribers.
///
/// Every watcher message passes through one inbox drained on the control
/// thread, so state changes and callbacks are never concurrent.
pub struct FileMonitorBridge {
    watcher: Box<dyn DirectoryWatcher>,
    inbox: Receiver<MonitorMessage>,
    client_events: ClientEventQueue,
    state: MonitorState,
    handle: Option<MonitorHandle>,
    directory: Option<PathBuf>,
    released: Vec<MonitorHandle>,
    subscribers: Subscribers,
}

impl FileMonitorBridge {
    pub fn new(
        watcher: Box<dyn DirectoryWatcher>,
        inbox: Receiver<MonitorMessage>,
        client_events: ClientEventQueue,
    ) -> Self {
        Self {
            watcher,
            inbox,
            client_events,
            state: MonitorState::NotMonitoring,
            handle: None,
            directory: None,
            released: Vec::new(),
            subscribers: Subscribers::default(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn has_file_monitor(&self) -> bool {
        self.state == MonitorState::Monitoring
    }

    pub fn handle(&self) -> Option<&MonitorHandle> {
        self.handle.as_ref()
    }

    /// 啟動前先假設監視中，避免檔案清單重複註冊監視器。
    /// Marks the directory as monitored before any registration attempt so the
    /// initial file listing does not register a duplicate monitor. The first
    /// registration outcome corrects it.
    pub fn assume_monitoring(&mut self, directory: &Path) {
        self.directory = Some(directory.to_path_buf());
        self.handle = None;
        self.state = MonitorState::Monitoring;
    }

    /// Forgets the active directory without touching the watcher.
    pub fn reset(&mut self) {
        self.directory = None;
        self.handle = None;
        self.state = MonitorState::NotMonitoring;
    }

    /// 送出遞迴監視請求。 / Issues the recursive watch request for the project directory.
    ///
    /// No retry happens after a registration failure; callers react to the
    /// `RegistrationError` broadcast instead.
    pub fn arm_deferred_registration(&mut self, directory: &Path, filter: FileListingFilter) {
        self.directory = Some(directory.to_path_buf());
        if self.state != MonitorState::Monitoring {
            self.state = MonitorState::Registering;
        }
        info!(path = %directory.display(), "registering project file monitor");
        if let Err(err) = self.watcher.register_monitor(directory, true, filter) {
            self.on_registration_error(directory, err);
        }
    }

    /// 要求釋放監視器；`on_unregistered` 為最終確認。 / Asks the watcher to release the owned handle.
    pub fn unregister(&mut self) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        if let Err(err) = self.watcher.unregister_monitor(&handle) {
            error!(id = handle.id(), %err, "failed to unregister project file monitor");
        }
    }

    pub fn register_subscriber(&mut self, callbacks: FileMonitorCallbacks) {
        let FileMonitorCallbacks {
            on_registered,
            on_registration_error,
            on_monitoring_error,
            on_files_changed,
            on_unregistered,
        } = callbacks;
        if let Some(f) = on_registered {
            self.subscribers.registered.connect_boxed(f);
        }
        if let Some(f) = on_registration_error {
            self.subscribers.registration_error.connect_boxed(f);
        }
        if let Some(f) = on_monitoring_error {
            self.subscribers.monitoring_error.connect_boxed(f);
        }
        if let Some(f) = on_files_changed {
            self.subscribers.files_changed.connect_boxed(f);
        }
        if let Some(f) = on_unregistered {
            self.subscribers.unregistered.connect_boxed(f);
        }
    }

    /// 依序處理收件匣中的所有訊息，回傳處理筆數。 / Drains the inbox in order, returning how many messages were handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(message) => {
                    self.dispatch(message);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("monitor inbox disconnected");
                    break;
                }
            }
        }
        handled
    }

    pub fn dispatch(&mut self, message: MonitorMessage) {
        match message {
            MonitorMessage::Registered(registration) => self.on_registered(registration),
            MonitorMessage::RegistrationError { path, error } => {
                self.on_registration_error(&path, error)
            }
            MonitorMessage::MonitoringError { handle, error } => {
                self.on_monitoring_error(&handle, error)
            }
            MonitorMessage::FilesChanged { handle, events } => {
                self.on_files_changed(&handle, &events)
            }
            MonitorMessage::Unregistered(handle) => self.on_unregistered(handle),
        }
    }

    /// 是否為目前專案目錄的請求。 / Whether `path` is the directory of the active project.
    fn is_current_directory(&self, path: &Path) -> bool {
        self.directory.as_deref() == Some(path)
    }

    /// Messages from a monitor this bridge does not own belong to a closed project.
    fn owns(&self, handle: &MonitorHandle) -> bool {
        match &self.handle {
            Some(owned) => owned == handle,
            // Optimistic window: nothing registered yet, match by directory.
            None => self.is_current_directory(handle.path()),
        }
    }

    /// Registrations for another directory, or a second one for this directory,
    /// are released immediately and never reach subscribers.
    pub fn on_registered(&mut self, registration: MonitorRegistration) {
        let handle = registration.handle.clone();
        let duplicate = self.handle.as_ref().is_some_and(|owned| *owned != handle);
        if !self.is_current_directory(handle.path()) || duplicate {
            debug!(
                id = handle.id(),
                path = %handle.path().display(),
                "releasing stale project file monitor"
            );
            self.released.push(handle.clone());
            if let Err(err) = self.watcher.unregister_monitor(&handle) {
                error!(id = handle.id(), %err, "failed to release stale project file monitor");
            }
            return;
        }

        debug!(
            id = handle.id(),
            entries = registration.tree.len(),
            "project file monitor registered"
        );
        self.state = MonitorState::Monitoring;
        self.handle = Some(handle);
        self.subscribers.registered.emit(&registration);
    }

    pub fn on_registration_error(&mut self, path: &Path, err: FileMonitorError) {
        if !self.is_current_directory(path) || self.handle.is_some() {
            debug!(path = %path.display(), %err, "ignoring stale registration failure");
            return;
        }
        error!(%err, "project file monitor registration failed");
        self.state = MonitorState::Errored;
        self.subscribers.registration_error.emit(&err);
    }

    pub fn on_monitoring_error(&mut self, handle: &MonitorHandle, err: FileMonitorError) {
        if !self.owns(handle) {
            debug!(id = handle.id(), %err, "ignoring error from stale monitor");
            return;
        }
        error!(%err, "project file monitor error");
        self.subscribers.monitoring_error.emit(&err);
    }

    /// Batches are keyed by the monitored directory; leftovers from a
    /// previous project's monitor are dropped.
    pub fn on_files_changed(&mut self, handle: &MonitorHandle, events: &[FileChangeEvent]) {
        if !self.owns(handle) {
            debug!(id = handle.id(), count = events.len(), "dropping changes from stale monitor");
            return;
        }
        self.client_events
            .enqueue_file_changed_events(handle.path(), events);
        self.subscribers.files_changed.emit(events);
    }

    /// Acknowledgments for a handle this bridge no longer owns (a previous
    /// project's monitor) are rebroadcast but leave the state alone. Monitors
    /// released as stale were never announced, so their acknowledgment is not
    /// rebroadcast either.
    pub fn on_unregistered(&mut self, handle: MonitorHandle) {
        if let Some(index) = self.released.iter().position(|released| *released == handle) {
            self.released.swap_remove(index);
            debug!(id = handle.id(), "stale project file monitor released");
            return;
        }
        debug!(id = handle.id(), "project file monitor unregistered");
        if self.handle.as_ref() == Some(&handle) {
            self.state = MonitorState::NotMonitoring;
            self.handle = None;
        }
        self.subscribers.unregistered.emit(&handle);
    }
}
