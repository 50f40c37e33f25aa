/// 唯讀的使用者設定來源。 / Read-only view over the user settings consulted at project startup.
///
/// Project code only ever reads these values, so fixed in-memory
/// implementations can stand in for the persisted store in tests.
pub trait SettingsProvider {
    /// 機器/工作階段代號。 / Opaque machine/session context identifier.
    fn context_id(&self) -> String;
    fn use_spaces_for_tab(&self) -> bool;
    fn num_spaces_for_tab(&self) -> u32;
    /// 未設定時回傳空字串。 / Empty when no default encoding is configured.
    fn default_encoding(&self) -> String;
}

impl<T: SettingsProvider + ?Sized> SettingsProvider for &T {
    fn context_id(&self) -> String {
        (**self).context_id()
    }

    fn use_spaces_for_tab(&self) -> bool {
        (**self).use_spaces_for_tab()
    }

    fn num_spaces_for_tab(&self) -> u32 {
        (**self).num_spaces_for_tab()
    }

    fn default_encoding(&self) -> String {
        (**self).default_encoding()
    }
}
