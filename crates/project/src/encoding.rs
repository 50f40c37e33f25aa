use rsession_core::ClientEventQueue;
use thiserror::Error;
use tracing::warn;

use crate::config::FALLBACK_ENCODING;

/// 編碼正規化呼叫失敗。 / The normalize-encoding call itself failed.
#[derive(Debug, Error)]
#[error("failed to normalize encoding '{encoding}': {message}")]
pub struct EncodingError {
    pub encoding: String,
    pub message: String,
}

impl EncodingError {
    pub fn new(encoding: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            encoding: encoding.into(),
            message: message.into(),
        }
    }
}

/// 外部的編碼正規化操作。 / External normalize-encoding operation.
///
/// `Ok("")` means the call worked but the encoding is unavailable here.
pub trait EncodingNormalizer {
    fn normalize_encoding(&self, name: &str) -> Result<String, EncodingError>;
}

impl<F> EncodingNormalizer for F
where
    F: Fn(&str) -> Result<String, EncodingError>,
{
    fn normalize_encoding(&self, name: &str) -> Result<String, EncodingError> {
        self(name)
    }
}

/// 以 `encoding_rs` 的 WHATWG 標籤表正規化。 / Normalizes through the WHATWG label table in `encoding_rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingRsNormalizer;

impl EncodingNormalizer for EncodingRsNormalizer {
    fn normalize_encoding(&self, name: &str) -> Result<String, EncodingError> {
        Ok(encoding_rs::Encoding::for_label(name.trim().as_bytes())
            .map(|encoding| encoding.name().to_string())
            .unwrap_or_default())
    }
}

/// 解析專案編碼；不支援時改用 UTF-8 並送出警告列事件。
/// Resolves the project encoding, falling back to UTF-8 with a warning-bar event when it is unavailable.
pub fn resolve_encoding(
    normalizer: &dyn EncodingNormalizer,
    requested: &str,
    client_events: &ClientEventQueue,
) -> Result<String, EncodingError> {
    let normalized = normalizer.normalize_encoding(requested)?;
    if !normalized.is_empty() {
        return Ok(normalized);
    }

    warn!(encoding = requested, "project text encoding unavailable; using {FALLBACK_ENCODING}");
    client_events.enqueue_warning(
        false,
        format!(
            "Project text encoding '{requested}' not available (using {FALLBACK_ENCODING}). \
             You can specify an alternate text encoding via Project Options."
        ),
    );
    Ok(FALLBACK_ENCODING.to_string())
}
