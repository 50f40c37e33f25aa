use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rsession_settings::SettingsProvider;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Encoding used when neither the project nor the user settings name one.
pub const FALLBACK_ENCODING: &str = "UTF-8";

/// 專案檔格式版本。 / Project file format version understood by this reader.
pub const PROJECT_FILE_VERSION: f64 = 1.0;

/// Tri-state workspace option; `Default` defers to the user's global setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum YesNoAsk {
    #[default]
    Default,
    Yes,
    No,
    Ask,
}

impl YesNoAsk {
    pub fn as_str(&self) -> &'static str {
        match self {
            YesNoAsk::Default => "Default",
            YesNoAsk::Yes => "Yes",
            YesNoAsk::No => "No",
            YesNoAsk::Ask => "Ask",
        }
    }
}

impl fmt::Display for YesNoAsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for YesNoAsk {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Default" => Ok(YesNoAsk::Default),
            "Yes" => Ok(YesNoAsk::Yes),
            "No" => Ok(YesNoAsk::No),
            "Ask" => Ok(YesNoAsk::Ask),
            _ => Err(()),
        }
    }
}

/// 專案層級設定。 / Project-level configuration stored in the project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub version: f64,
    pub restore_workspace: YesNoAsk,
    pub save_workspace: YesNoAsk,
    pub always_save_history: YesNoAsk,
    pub enable_code_indexing: bool,
    pub use_spaces_for_tab: bool,
    pub num_spaces_for_tab: u32,
    pub encoding: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: PROJECT_FILE_VERSION,
            restore_workspace: YesNoAsk::Default,
            save_workspace: YesNoAsk::Default,
            always_save_history: YesNoAsk::Default,
            enable_code_indexing: true,
            use_spaces_for_tab: true,
            num_spaces_for_tab: 2,
            encoding: FALLBACK_ENCODING.to_string(),
        }
    }
}

/// 以使用者設定推導預設值。 / Defaults derived from the user settings.
pub fn default_config(settings: &dyn SettingsProvider) -> ProjectConfig {
    let encoding = settings.default_encoding();
    ProjectConfig {
        use_spaces_for_tab: settings.use_spaces_for_tab(),
        num_spaces_for_tab: settings.num_spaces_for_tab(),
        encoding: if encoding.is_empty() {
            FALLBACK_ENCODING.to_string()
        } else {
            encoding
        },
        ..ProjectConfig::default()
    }
}

/// 載入或寫入專案檔時的錯誤。 / Errors raised while reading or writing a project file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read project file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid project file {path}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("failed to write project file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    /// 可直接顯示給使用者的訊息。 / Message suitable for direct display to the user.
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Read { source, .. } => {
                format!("the project file could not be read ({source})")
            }
            ConfigError::Invalid { message, .. } => message.clone(),
            ConfigError::Write { source, .. } => {
                format!("the project file could not be written ({source})")
            }
        }
    }
}

/// 讀取的設定以及是否補上了預設值。 / A loaded config plus whether any field was defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: ProjectConfig,
    pub used_defaults: bool,
}

/// 專案檔的讀寫器。 / Reader/writer for the project file's textual format.
pub trait ProjectFileCodec {
    fn read(&self, path: &Path, defaults: &ProjectConfig) -> Result<LoadedConfig, ConfigError>;
    fn write(&self, path: &Path, config: &ProjectConfig) -> Result<(), ConfigError>;
}

/// 載入設定；若補上預設值則寫回專案檔（失敗只記錄）。
/// Loads the project config, rewriting the file once when defaults were injected.
/// A rewrite failure is logged and the in-memory config is still returned.
pub fn load_project_config(
    codec: &dyn ProjectFileCodec,
    path: &Path,
    defaults: &ProjectConfig,
) -> Result<LoadedConfig, ConfigError> {
    let loaded = codec.read(path, defaults)?;
    if loaded.used_defaults {
        debug!(path = %path.display(), "project file missing fields; writing defaults");
        if let Err(err) = codec.write(path, &loaded.config) {
            error!(path = %path.display(), %err, "failed to rewrite project file with defaults");
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsession_settings::UserSettings;
    use std::cell::{Cell, RefCell};

    struct FakeCodec {
        loaded: LoadedConfig,
        fail_write: bool,
        writes: Cell<usize>,
        written: RefCell<Option<ProjectConfig>>,
    }

    impl FakeCodec {
        fn new(used_defaults: bool, fail_write: bool) -> Self {
            Self {
                loaded: LoadedConfig {
                    config: ProjectConfig {
                        num_spaces_for_tab: 4,
                        ..ProjectConfig::default()
                    },
                    used_defaults,
                },
                fail_write,
                writes: Cell::new(0),
                written: RefCell::new(None),
            }
        }
    }

    impl ProjectFileCodec for FakeCodec {
        fn read(&self, _path: &Path, _defaults: &ProjectConfig) -> Result<LoadedConfig, ConfigError> {
            Ok(self.loaded.clone())
        }

        fn write(&self, path: &Path, config: &ProjectConfig) -> Result<(), ConfigError> {
            self.writes.set(self.writes.get() + 1);
            *self.written.borrow_mut() = Some(config.clone());
            if self.fail_write {
                Err(ConfigError::Write {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn defaults_follow_user_settings() {
        let settings = UserSettings {
            use_spaces_for_tab: false,
            num_spaces_for_tab: 8,
            default_encoding: "ISO-8859-1".into(),
            ..UserSettings::default()
        };
        let config = default_config(&settings);
        assert!(!config.use_spaces_for_tab);
        assert_eq!(config.num_spaces_for_tab, 8);
        assert_eq!(config.encoding, "ISO-8859-1");

        let unset = UserSettings::default();
        assert_eq!(default_config(&unset).encoding, FALLBACK_ENCODING);
    }

    #[test]
    fn defaults_used_triggers_exactly_one_rewrite() {
        let codec = FakeCodec::new(true, false);
        let loaded =
            load_project_config(&codec, Path::new("/p/proj.Rproj"), &ProjectConfig::default())
                .unwrap();
        assert_eq!(codec.writes.get(), 1);
        assert_eq!(codec.written.borrow().as_ref(), Some(&loaded.config));
    }

    #[test]
    fn rewrite_failure_keeps_loaded_config() {
        let codec = FakeCodec::new(true, true);
        let loaded =
            load_project_config(&codec, Path::new("/p/proj.Rproj"), &ProjectConfig::default())
                .unwrap();
        assert_eq!(codec.writes.get(), 1);
        assert_eq!(loaded, codec.loaded);
    }

    #[test]
    fn complete_file_is_not_rewritten() {
        let codec = FakeCodec::new(false, false);
        load_project_config(&codec, Path::new("/p/proj.Rproj"), &ProjectConfig::default())
            .unwrap();
        assert_eq!(codec.writes.get(), 0);
    }
}
