//! User-level settings consulted when a project is opened.
//! 開啟專案時使用的使用者層級設定。

pub mod provider;
pub mod user_settings;

pub use provider::SettingsProvider;
pub use user_settings::{generate_context_id, SettingsError, UserSettings, UserSettingsStore};
