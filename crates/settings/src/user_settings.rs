use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::provider::SettingsProvider;

const SETTINGS_VERSION: u32 = 1;
const MAX_TAB_WIDTH: u32 = 64;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize settings {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 使用者層級的編輯設定。 / Per-user settings consulted when a project is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    /// 區分機器/工作階段設定的穩定代號。 / Stable id distinguishing this machine/session configuration.
    #[serde(default)]
    pub context_id: String,
    #[serde(default = "default_true")]
    pub use_spaces_for_tab: bool,
    #[serde(default = "default_tab_width")]
    pub num_spaces_for_tab: u32,
    /// 空字串代表未設定。 / Empty means "not configured".
    #[serde(default)]
    pub default_encoding: String,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_true() -> bool {
    true
}

fn default_tab_width() -> u32 {
    2
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            context_id: String::new(),
            use_spaces_for_tab: true,
            num_spaces_for_tab: default_tab_width(),
            default_encoding: String::new(),
        }
    }
}

impl UserSettings {
    /// 修正不合法的值；若補上了 context id 則回傳 `true`。 / Repairs invalid values, returning `true` when a context id was generated.
    pub fn sanitize(&mut self) -> bool {
        if self.version == 0 {
            self.version = SETTINGS_VERSION;
        }
        if self.num_spaces_for_tab == 0 {
            self.num_spaces_for_tab = default_tab_width();
        }
        self.num_spaces_for_tab = self.num_spaces_for_tab.clamp(1, MAX_TAB_WIDTH);
        self.default_encoding = self.default_encoding.trim().to_string();

        if self.context_id.trim().is_empty() {
            self.context_id = generate_context_id();
            true
        } else {
            false
        }
    }
}

/// Eight upper-case hex digits taken from a random uuid.
pub fn generate_context_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    uuid[..8].to_ascii_uppercase()
}

impl SettingsProvider for UserSettings {
    fn context_id(&self) -> String {
        self.context_id.clone()
    }

    fn use_spaces_for_tab(&self) -> bool {
        self.use_spaces_for_tab
    }

    fn num_spaces_for_tab(&self) -> u32 {
        self.num_spaces_for_tab
    }

    fn default_encoding(&self) -> String {
        self.default_encoding.clone()
    }
}

/// 以 JSON 檔案保存 [`UserSettings`]。 / JSON-backed persistence for [`UserSettings`].
#[derive(Debug)]
pub struct UserSettingsStore {
    path: PathBuf,
    data: UserSettings,
}

impl UserSettingsStore {
    pub fn new(path: impl Into<PathBuf>, settings: UserSettings) -> Self {
        Self {
            path: path.into(),
            data: settings,
        }
    }

    /// 載入設定；檔案不存在時使用預設值。新產生的 context id 會立即寫回。
    /// Loads settings (defaults when missing). A freshly generated context id is persisted immediately
    /// so every later session sees the same scratch directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            UserSettings::default()
        };

        let generated = data.sanitize();
        let store = Self { path, data };
        if generated {
            debug!(context_id = %store.data.context_id, "generated settings context id");
            store.save()?;
        }
        Ok(store)
    }

    pub fn settings(&self) -> &UserSettings {
        &self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), SettingsError>
    where
        F: FnMut(&mut UserSettings),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            SettingsError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| SettingsError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for UserSettingsStore {
    fn context_id(&self) -> String {
        self.data.context_id()
    }

    fn use_spaces_for_tab(&self) -> bool {
        self.data.use_spaces_for_tab()
    }

    fn num_spaces_for_tab(&self) -> u32 {
        self.data.num_spaces_for_tab()
    }

    fn default_encoding(&self) -> String {
        self.data.default_encoding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_tab_width_and_fills_context_id() {
        let mut settings = UserSettings {
            num_spaces_for_tab: 500,
            default_encoding: "  latin1 ".into(),
            ..UserSettings::default()
        };
        assert!(settings.sanitize());
        assert_eq!(settings.num_spaces_for_tab, MAX_TAB_WIDTH);
        assert_eq!(settings.default_encoding, "latin1");
        assert_eq!(settings.context_id.len(), 8);
        assert!(settings.context_id.chars().all(|c| c.is_ascii_hexdigit()));

        // 已有 context id 時不再重新產生。 / Existing ids are kept.
        let existing = settings.context_id.clone();
        assert!(!settings.sanitize());
        assert_eq!(settings.context_id, existing);
    }

    #[test]
    fn zero_tab_width_falls_back_to_default() {
        let mut settings = UserSettings {
            num_spaces_for_tab: 0,
            context_id: "ctx".into(),
            ..UserSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.num_spaces_for_tab, 2);
    }
}
