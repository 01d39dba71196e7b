//! Bounded display log
//! Every component appends human-readable lines here; the shell renders a
//! snapshot and is notified after each append.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::info;

use crate::core::bluetooth::LOG_CAPACITY;

/// Callback invoked with each appended line.
pub type LogObserver = Arc<dyn Fn(&str) + Send + Sync>;

struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

/// A clonable handle to a fixed-capacity FIFO of log lines.
#[derive(Clone)]
pub struct LogSink {
    buffer: Arc<Mutex<LogBuffer>>,
    observer: Arc<Mutex<Option<LogObserver>>>,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer {
                lines: VecDeque::with_capacity(capacity),
                capacity,
            })),
            observer: Arc::new(Mutex::new(None)),
        }
    }

    /// Appends a line at the tail, evicting from the head until the log fits.
    pub fn append(&self, message: impl Into<String>) {
        let line = message.into();
        info!("{}", line);

        {
            let mut buffer = lock(&self.buffer);
            buffer.lines.push_back(line.clone());
            while buffer.lines.len() > buffer.capacity {
                buffer.lines.pop_front();
            }
        }

        // Cloned out so the observer may call back into the sink.
        let observer = lock(&self.observer).clone();
        if let Some(observer) = observer {
            observer(&line);
        }
    }

    /// Returns the current lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.buffer).lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.buffer).capacity
    }

    /// Registers the "log changed" observer, replacing any previous one.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *lock(&self.observer) = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        *lock(&self.observer) = None;
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
