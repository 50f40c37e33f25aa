use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::{
    ConfigError, LoadedConfig, ProjectConfig, ProjectFileCodec, YesNoAsk, PROJECT_FILE_VERSION,
};
use crate::util::write_atomic;

const MAX_TAB_WIDTH: u32 = 64;

/// 以 `Key: Value` 文字格式儲存的專案檔。 / Project file stored as `Key: Value` lines.
///
/// Blank lines separate groups and are otherwise ignored; a line starting
/// with whitespace continues the previous value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcfProjectFile;

impl ProjectFileCodec for DcfProjectFile {
    fn read(&self, path: &Path, defaults: &ProjectConfig) -> Result<LoadedConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_project_file(&contents, defaults).map_err(|message| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        })
    }

    fn write(&self, path: &Path, config: &ProjectConfig) -> Result<(), ConfigError> {
        write_atomic(path, render_project_file(config).as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// 解析專案檔內容；錯誤訊息可直接顯示給使用者。 / Parses project file text; errors are user-displayable.
pub fn parse_project_file(
    contents: &str,
    defaults: &ProjectConfig,
) -> Result<LoadedConfig, String> {
    let fields = parse_fields(contents)?;
    let mut used_defaults = false;

    let version = match fields.get("Version") {
        None => {
            return Err("The project file did not include a Version attribute \
                        (it may have been created by a more recent version of the application)"
                .to_string())
        }
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| "The project file has an invalid Version attribute".to_string())?,
    };
    if version != PROJECT_FILE_VERSION {
        return Err(
            "The project file was created by a more recent version of the application".to_string(),
        );
    }

    let restore_workspace = workspace_option(&fields, "RestoreWorkspace", false)?;
    let save_workspace = workspace_option(&fields, "SaveWorkspace", true)?;
    let always_save_history = workspace_option(&fields, "AlwaysSaveHistory", false)?;

    let enable_code_indexing = match yes_no(&fields, "EnableCodeIndexing")? {
        Some(value) => value,
        None => {
            used_defaults = true;
            defaults.enable_code_indexing
        }
    };

    let use_spaces_for_tab = match yes_no(&fields, "UseSpacesForTab")? {
        Some(value) => value,
        None => {
            used_defaults = true;
            defaults.use_spaces_for_tab
        }
    };

    let num_spaces_for_tab = match fields.get("NumSpacesForTab") {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|width| (1..=MAX_TAB_WIDTH).contains(width))
            .ok_or_else(|| invalid_value("NumSpacesForTab"))?,
        None => {
            used_defaults = true;
            defaults.num_spaces_for_tab
        }
    };

    let encoding = match fields.get("Encoding").filter(|value| !value.is_empty()) {
        Some(value) => value.clone(),
        None => {
            used_defaults = true;
            defaults.encoding.clone()
        }
    };

    Ok(LoadedConfig {
        config: ProjectConfig {
            version,
            restore_workspace,
            save_workspace,
            always_save_history,
            enable_code_indexing,
            use_spaces_for_tab,
            num_spaces_for_tab,
            encoding,
        },
        used_defaults,
    })
}

/// 輸出標準格式的專案檔。 / Renders the canonical project file layout.
pub fn render_project_file(config: &ProjectConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("Version: {:.1}\n\n", config.version));
    out.push_str(&format!("RestoreWorkspace: {}\n", config.restore_workspace));
    out.push_str(&format!("SaveWorkspace: {}\n", config.save_workspace));
    out.push_str(&format!("AlwaysSaveHistory: {}\n\n", config.always_save_history));
    out.push_str(&format!(
        "EnableCodeIndexing: {}\n",
        yes_no_str(config.enable_code_indexing)
    ));
    out.push_str(&format!(
        "UseSpacesForTab: {}\n",
        yes_no_str(config.use_spaces_for_tab)
    ));
    out.push_str(&format!("NumSpacesForTab: {}\n", config.num_spaces_for_tab));
    out.push_str(&format!("Encoding: {}\n", config.encoding));
    out
}

fn parse_fields(contents: &str) -> Result<HashMap<String, String>, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in contents.lines() {
        if line.trim().is_empty() {
            last_key = None;
            continue;
        }
        if line.starts_with([' ', '\t']) {
            let key = last_key.as_ref().ok_or_else(|| invalid_line(line))?;
            if let Some(value) = fields.get_mut(key) {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(line.trim());
            }
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| invalid_line(line))?;
        let key = key.trim().to_string();
        fields.insert(key.clone(), value.trim().to_string());
        last_key = Some(key);
    }

    Ok(fields)
}

fn workspace_option(
    fields: &HashMap<String, String>,
    key: &str,
    allow_ask: bool,
) -> Result<YesNoAsk, String> {
    match fields.get(key) {
        None => Ok(YesNoAsk::Default),
        Some(raw) => match raw.parse::<YesNoAsk>() {
            Ok(YesNoAsk::Ask) if !allow_ask => Err(invalid_value(key)),
            Ok(value) => Ok(value),
            Err(()) => Err(invalid_value(key)),
        },
    }
}

fn yes_no(fields: &HashMap<String, String>, key: &str) -> Result<Option<bool>, String> {
    match fields.get(key).map(String::as_str) {
        None => Ok(None),
        Some("Yes") => Ok(Some(true)),
        Some("No") => Ok(Some(false)),
        Some(_) => Err(invalid_value(key)),
    }
}

fn yes_no_str(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn invalid_line(line: &str) -> String {
    format!("The project file contains an invalid line: '{}'", line.trim())
}

fn invalid_value(key: &str) -> String {
    format!("The project file has an invalid value for {key}")
}
