use std::fmt;

/// 依註冊順序同步呼叫的監聽器清單。 / Ordered listener list invoked synchronously on the owning thread.
///
/// Listeners are additive; there is no disconnect.
pub struct Signal<T: ?Sized> {
    listeners: Vec<Box<dyn FnMut(&T)>>,
}

impl<T: ?Sized> Signal<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn connect<F>(&mut self, listener: F)
    where
        F: FnMut(&T) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// 附加已封裝的監聽器。 / Attaches an already boxed listener.
    pub fn connect_boxed(&mut self, listener: Box<dyn FnMut(&T)>) {
        self.listeners.push(listener);
    }

    pub fn emit(&mut self, value: &T) {
        for listener in &mut self.listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_fire_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut signal: Signal<str> = Signal::new();
        for tag in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            signal.connect(move |value: &str| log.borrow_mut().push(format!("{tag}:{value}")));
        }

        signal.emit("a");
        signal.emit("b");

        assert_eq!(signal.len(), 3);
        assert_eq!(
            *log.borrow(),
            vec!["first:a", "second:a", "third:a", "first:b", "second:b", "third:b"]
        );
    }
}
