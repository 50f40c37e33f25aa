use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::Receiver;

use rsession_core::{
    default_listing_filter, ClientEventQueue, DeferredInitSignal, DeferredInitSubscription,
    DirectoryWatcher, FileListingFilter, MonitorMessage,
};
use rsession_settings::SettingsProvider;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{
    default_config, load_project_config, ConfigError, ProjectConfig, ProjectFileCodec,
};
use crate::dcf::DcfProjectFile;
use crate::encoding::{resolve_encoding, EncodingError, EncodingNormalizer};
use crate::monitor::{FileMonitorBridge, FileMonitorCallbacks, MonitorState};
use crate::scratch::{compute_scratch_path, current_username, ScratchPathError};
use crate::util::can_write_to_dir;

/// 開啟或操作專案時的錯誤。 / Errors raised while opening or operating on a project.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project file {0} does not exist")]
    NotFound(PathBuf),
    #[error("project directory {0} is not writeable")]
    PermissionDenied(PathBuf),
    #[error(transparent)]
    Scratch(#[from] ScratchPathError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("no project is open")]
    NoProject,
}

impl ProjectError {
    /// 可直接顯示給使用者的訊息。 / Message suitable for direct display to the user.
    pub fn user_message(&self) -> String {
        match self {
            ProjectError::NotFound(_) => "the project file does not exist".to_string(),
            ProjectError::PermissionDenied(_) => {
                "the project directory is not writeable".to_string()
            }
            ProjectError::Scratch(err) => {
                format!("unable to initialize project - {}", err.summary())
            }
            ProjectError::Config(err) => err.user_message(),
            ProjectError::Encoding(err) => err.to_string(),
            ProjectError::NoProject => "no project is open".to_string(),
        }
    }
}

/// 目前專案的身分與衍生路徑。 / Identity and derived paths of the active project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIdentity {
    pub project_file: PathBuf,
    pub directory: PathBuf,
    pub scratch_path: PathBuf,
}

/// 提供給編輯器偏好介面的快照。 / Snapshot consumed by the editor-preferences UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiPrefs {
    pub use_spaces_for_tab: bool,
    pub num_spaces_for_tab: u32,
    pub default_encoding: String,
}

impl UiPrefs {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 目前開啟的專案。 / The single active project of the session.
///
/// Startup is split in two: [`startup`](Self::startup) runs before the
/// scripting engine exists and only touches the filesystem and settings;
/// [`initialize`](Self::initialize) runs once the engine can normalize the
/// encoding, and defers monitor registration until the deferred-init signal.
pub struct ProjectContext {
    codec: Box<dyn ProjectFileCodec>,
    client_events: ClientEventQueue,
    listing_filter: FileListingFilter,
    username: Option<String>,
    monitor: FileMonitorBridge,
    identity: Option<ProjectIdentity>,
    config: ProjectConfig,
    default_encoding: String,
    deferred_init: Option<DeferredInitSubscription>,
}

impl ProjectContext {
    pub fn new(
        watcher: Box<dyn DirectoryWatcher>,
        inbox: Receiver<MonitorMessage>,
        client_events: ClientEventQueue,
    ) -> Self {
        Self {
            codec: Box::new(DcfProjectFile),
            monitor: FileMonitorBridge::new(watcher, inbox, client_events.clone()),
            client_events,
            listing_filter: default_listing_filter(),
            username: current_username(),
            identity: None,
            config: ProjectConfig::default(),
            default_encoding: String::new(),
            deferred_init: None,
        }
    }

    pub fn with_codec(mut self, codec: impl ProjectFileCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_listing_filter(mut self, filter: FileListingFilter) -> Self {
        self.listing_filter = filter;
        self
    }

    /// 覆寫作業系統使用者（`None` 代表略過使用者層級）。 / Overrides the OS user; `None` skips the per-user level.
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// 驗證專案檔、建立暫存目錄並載入設定。
    /// Validates the project file and directory, prepares the scratch path and loads the config.
    ///
    /// Nothing is created on disk when the file is missing or the directory is
    /// not writeable. On success the previous project, if any, is closed.
    pub fn startup(
        &mut self,
        project_file: &Path,
        settings: &dyn SettingsProvider,
    ) -> Result<(), ProjectError> {
        let project_file = absolute(project_file);
        if !project_file.exists() {
            return Err(ProjectError::NotFound(project_file));
        }

        let directory = project_file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ProjectError::NotFound(project_file.clone()))?;
        if !can_write_to_dir(&directory) {
            return Err(ProjectError::PermissionDenied(directory));
        }

        let scratch_path = compute_scratch_path(
            &project_file,
            self.username.as_deref(),
            &settings.context_id(),
        )?;

        let loaded =
            load_project_config(self.codec.as_ref(), &project_file, &default_config(settings))?;

        if self.has_project() {
            self.close();
        }

        info!(
            project = %project_file.display(),
            scratch = %scratch_path.display(),
            "project started"
        );
        self.identity = Some(ProjectIdentity {
            project_file,
            directory: directory.clone(),
            scratch_path,
        });
        self.config = loaded.config;
        self.default_encoding.clear();
        self.monitor.assume_monitoring(&directory);
        Ok(())
    }

    /// 解析編碼並訂閱延遲初始化。 / Resolves the encoding and subscribes to deferred init.
    pub fn initialize(
        &mut self,
        normalizer: &dyn EncodingNormalizer,
        deferred_init: &mut DeferredInitSignal,
    ) -> Result<(), ProjectError> {
        if !self.has_project() {
            return Ok(());
        }

        self.default_encoding =
            resolve_encoding(normalizer, &self.config.encoding, &self.client_events)?;
        self.deferred_init = Some(deferred_init.subscribe());
        Ok(())
    }

    /// 在控制執行緒上處理待辦事件。 / Runs pending work on the control thread.
    ///
    /// Arms monitor registration the first time the deferred-init signal is
    /// observed, then dispatches queued watcher messages. Returns the number of
    /// watcher messages handled.
    pub fn process_events(&mut self) -> usize {
        let fired = self
            .deferred_init
            .as_mut()
            .map_or(false, DeferredInitSubscription::poll);
        if fired {
            self.deferred_init = None;
            if let Some(identity) = &self.identity {
                self.monitor
                    .arm_deferred_registration(&identity.directory, self.listing_filter.clone());
            }
        }
        self.monitor.dispatch_pending()
    }

    pub fn register_file_monitor_callbacks(&mut self, callbacks: FileMonitorCallbacks) {
        self.monitor.register_subscriber(callbacks);
    }

    pub fn has_project(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&ProjectIdentity> {
        self.identity.as_ref()
    }

    pub fn file(&self) -> Option<&Path> {
        self.identity.as_ref().map(|id| id.project_file.as_path())
    }

    pub fn directory(&self) -> Option<&Path> {
        self.identity.as_ref().map(|id| id.directory.as_path())
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.identity.as_ref().map(|id| id.scratch_path.as_path())
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// 空字串代表尚未初始化。 / Empty until `initialize` succeeds.
    pub fn default_encoding(&self) -> &str {
        &self.default_encoding
    }

    pub fn has_file_monitor(&self) -> bool {
        self.monitor.has_file_monitor()
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// `dir` 是否位於受監控的專案目錄內。 / Whether `dir` is the monitored project directory or nested under it.
    ///
    /// `dir` is made absolute and `.`/`..` are resolved lexically first, so
    /// `<project>/../other` does not count as nested.
    pub fn is_monitoring_directory(&self, dir: &Path) -> bool {
        match &self.identity {
            Some(identity) => {
                self.has_file_monitor() && absolute(dir).starts_with(&identity.directory)
            }
            None => false,
        }
    }

    pub fn ui_prefs(&self) -> UiPrefs {
        UiPrefs {
            use_spaces_for_tab: self.config.use_spaces_for_tab,
            num_spaces_for_tab: self.config.num_spaces_for_tab,
            default_encoding: self.default_encoding.clone(),
        }
    }

    /// 寫入並套用新的專案設定。 / Persists and applies a new project config.
    pub fn update_config(&mut self, config: ProjectConfig) -> Result<(), ProjectError> {
        let file = self.file().ok_or(ProjectError::NoProject)?.to_path_buf();
        self.codec.write(&file, &config)?;
        self.config = config;
        Ok(())
    }

    /// 關閉專案並釋放監視器。 / Closes the project and releases its monitor.
    pub fn close(&mut self) {
        self.monitor.unregister();
        self.monitor.reset();
        self.identity = None;
        self.config = ProjectConfig::default();
        self.default_encoding.clear();
        self.deferred_init = None;
    }
}

/// Absolute form of `path` with `.` and `..` resolved without touching the filesystem.
fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_lexically(&joined)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
