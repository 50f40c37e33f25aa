pub mod events;
pub mod file_monitor;
pub mod listing;
pub mod signal;

pub use events::{
    client_event_queue, ClientEvent, ClientEventQueue, DeferredInitSignal,
    DeferredInitSubscription,
};
pub use file_monitor::{
    monitor_channel, DirectoryWatcher, FileChangeEvent, FileChangeKind, FileMonitorError,
    MonitorHandle, MonitorMessage, MonitorRegistration, MonitorSender, NotifyWatcher,
};
pub use listing::{
    accept_all_filter, default_listing_filter, is_visible, FileInfo, FileListingFilter, FileTree,
    PROJECT_USER_DIR,
};
pub use signal::Signal;
