use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::Serialize;
use tracing::debug;

use crate::file_monitor::FileChangeEvent;

/// 送往前端的事件。 / Events queued for the client (UI) side of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    ShowWarningBar {
        severe: bool,
        message: String,
    },
    FileChanged {
        directory: PathBuf,
        event: FileChangeEvent,
    },
}

impl ClientEvent {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// 全程序共用的前端事件佇列。 / Process-wide client event queue; cheap to clone.
#[derive(Debug, Clone)]
pub struct ClientEventQueue {
    tx: Sender<ClientEvent>,
}

/// 建立事件佇列與其接收端。 / Creates the queue together with its consuming end.
pub fn client_event_queue() -> (ClientEventQueue, Receiver<ClientEvent>) {
    let (tx, rx) = mpsc::channel();
    (ClientEventQueue { tx }, rx)
}

impl ClientEventQueue {
    pub fn enqueue(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            debug!("client event dropped: no consumer attached");
        }
    }

    pub fn enqueue_warning(&self, severe: bool, message: impl Into<String>) {
        self.enqueue(ClientEvent::ShowWarningBar {
            severe,
            message: message.into(),
        });
    }

    /// 以目錄為鍵廣播檔案變更。 / Broadcasts a change batch keyed by the monitored directory.
    pub fn enqueue_file_changed_events(&self, directory: &Path, events: &[FileChangeEvent]) {
        for event in events {
            self.enqueue(ClientEvent::FileChanged {
                directory: directory.to_path_buf(),
                event: event.clone(),
            });
        }
    }
}

/// 一次性的延遲初始化訊號。 / One-shot "deferred init" signal fired once non-core subsystems are ready.
#[derive(Debug, Default)]
pub struct DeferredInitSignal {
    fired: bool,
    subscribers: Vec<Sender<()>>,
}

impl DeferredInitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribing after the signal fired yields an already-ready subscription.
    pub fn subscribe(&mut self) -> DeferredInitSubscription {
        let (tx, rx) = mpsc::channel();
        if self.fired {
            let _ = tx.send(());
        } else {
            self.subscribers.push(tx);
        }
        DeferredInitSubscription { rx, done: false }
    }

    /// 觸發訊號；重複觸發時回傳 `false`。 / Fires the signal, returning `false` if it already fired.
    pub fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        for tx in self.subscribers.drain(..) {
            let _ = tx.send(());
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// 延遲初始化的訂閱。 / A pending subscription to [`DeferredInitSignal`].
#[derive(Debug)]
pub struct DeferredInitSubscription {
    rx: Receiver<()>,
    done: bool,
}

impl DeferredInitSubscription {
    /// Returns `true` exactly once, on the first poll after the signal fired.
    pub fn poll(&mut self) -> bool {
        if self.done {
            return false;
        }
        match self.rx.try_recv() {
            Ok(()) => {
                self.done = true;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_monitor::FileChangeKind;
    use crate::listing::FileInfo;

    #[test]
    fn deferred_init_fires_once_per_subscription() {
        let mut signal = DeferredInitSignal::new();
        let mut early = signal.subscribe();
        assert!(!early.poll());
        assert!(!signal.has_fired());

        assert!(signal.fire());
        assert!(signal.has_fired());
        assert!(!signal.fire());
        assert!(early.poll());
        assert!(!early.poll());

        let mut late = signal.subscribe();
        assert!(late.poll());
        assert!(!late.poll());
    }

    #[test]
    fn dropped_signal_never_fires() {
        let mut signal = DeferredInitSignal::new();
        let mut subscription = signal.subscribe();
        drop(signal);
        assert!(!subscription.poll());
    }

    #[test]
    fn file_changes_are_keyed_by_directory() {
        let (queue, rx) = client_event_queue();
        let events = vec![
            FileChangeEvent::new(FileChangeKind::Added, FileInfo::removed("/p/a.R", false)),
            FileChangeEvent::new(FileChangeKind::Removed, FileInfo::removed("/p/b.R", false)),
        ];
        queue.enqueue_file_changed_events(Path::new("/p"), &events);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 2);
        for (client_event, original) in received.iter().zip(&events) {
            match client_event {
                ClientEvent::FileChanged { directory, event } => {
                    assert_eq!(directory, Path::new("/p"));
                    assert_eq!(event, original);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn warning_serializes_with_type_tag() {
        let (queue, rx) = client_event_queue();
        queue.enqueue_warning(false, "careful");
        let json = rx.try_recv().unwrap().to_json();
        assert_eq!(json["type"], "show_warning_bar");
        assert_eq!(json["data"]["severe"], false);
        assert_eq!(json["data"]["message"], "careful");
    }
}
