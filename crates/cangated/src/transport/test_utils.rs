//! Test helpers for the transport module.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ConnectionHandler, ConnectionStream, RequestLines};

/// Counts connections and echoes each request line back.
pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
        let mut lines = RequestLines::new(stream);
        while let Ok(Some(line)) = lines.next_line() {
            let writer = lines.get_mut();
            if writer.write_all(&line).and_then(|()| writer.write_all(b"\n")).is_err() {
                return;
            }
        }
    }
}
