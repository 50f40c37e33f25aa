//! Active project context: scratch path, project config, encoding and the
//! project directory monitor.
//! 目前專案的情境：暫存目錄、專案設定、編碼與專案目錄監視器。

mod util;

pub mod config;
pub mod context;
pub mod dcf;
pub mod encoding;
pub mod monitor;
pub mod scratch;

pub use config::{
    default_config, load_project_config, ConfigError, LoadedConfig, ProjectConfig,
    ProjectFileCodec, YesNoAsk, FALLBACK_ENCODING,
};
pub use context::{ProjectContext, ProjectError, ProjectIdentity, UiPrefs};
pub use dcf::{parse_project_file, render_project_file, DcfProjectFile};
pub use encoding::{resolve_encoding, EncodingError, EncodingNormalizer, EncodingRsNormalizer};
pub use monitor::{FileMonitorBridge, FileMonitorCallbacks, MonitorState};
pub use scratch::{compute_scratch_path, current_username, ScratchPathError};
