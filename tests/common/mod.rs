//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use loadtest_worker::reporter::Reporter;
use loadtest_worker::result::TestResult;
use std::sync::Mutex;

/// Reporter that keeps everything it is sent.
#[derive(Default)]
pub struct RecordingReporter {
    pub progress: Mutex<Vec<(String, f64)>>,
    pub results: Mutex<Vec<TestResult>>,
    pub errors: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn progress(&self, test_id: &str, percent: f64) {
        self.progress
            .lock()
            .unwrap()
            .push((test_id.to_string(), percent));
    }

    async fn result(&self, result: &TestResult) {
        self.results.lock().unwrap().push(result.clone());
    }

    async fn error(&self, test_id: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((test_id.to_string(), message.to_string()));
    }
}
