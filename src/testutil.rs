use parking_lot::Mutex;

use crate::error::{Error, ErrorSink};

/// Keeps reported errors so tests can assert on them.
#[derive(Default)]
pub struct CapturingSink {
    errors: Mutex<Vec<Error>>,
}

impl CapturingSink {
    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().iter().map(|e| e.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }
}

impl ErrorSink for CapturingSink {
    fn report(&self, err: Error) {
        self.errors.lock().push(err);
    }
}

/// Lets every spawned task run until it blocks again.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
