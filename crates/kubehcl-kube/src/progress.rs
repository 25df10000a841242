//! Keep-alive output while resources are applied
//!
//! Each in-flight resource gets a ticker printing how long it has been
//! waiting, then a final line with the operation performed.

use console::Term;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Interval between keep-alive lines
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
enum Sink {
    Term(Term),
    Buffer(Arc<Mutex<Vec<String>>>),
    Silent,
}

/// Where progress lines go
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Sink,
    interval: Duration,
}

impl ProgressReporter {
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Term(Term::stdout()),
            interval: PROGRESS_INTERVAL,
        }
    }

    pub fn silent() -> Self {
        Self {
            sink: Sink::Silent,
            interval: PROGRESS_INTERVAL,
        }
    }

    /// Collect lines in memory, returning the shared buffer
    pub fn buffered() -> (Self, Arc<Mutex<Vec<String>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reporter = Self {
            sink: Sink::Buffer(buffer.clone()),
            interval: PROGRESS_INTERVAL,
        };
        (reporter, buffer)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn line(&self, message: &str) {
        match &self.sink {
            Sink::Term(term) => {
                if let Err(e) = term.write_line(message) {
                    tracing::debug!(error = %e, "progress output failed");
                }
            }
            Sink::Buffer(buffer) => buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(message.to_string()),
            Sink::Silent => {}
        }
    }

    /// Start the keep-alive ticker for `key`
    pub fn track(&self, key: &str) -> Ticker {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let reporter = self.clone();
        let name = key.to_string();
        let handle = tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            loop {
                reporter.line(&format!(
                    "Creating/Updating kube_resource: {} ({} seconds has passed)",
                    name,
                    elapsed.as_secs()
                ));
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(reporter.interval) => elapsed += reporter.interval,
                }
            }
        });
        Ticker {
            stop: Some(stop),
            handle: Some(handle),
            key: key.to_string(),
            reporter: self.clone(),
        }
    }
}

/// Running keep-alive ticker for one resource
pub struct Ticker {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    key: String,
    reporter: ProgressReporter,
}

impl Ticker {
    /// Stop ticking and print `<operation> kube_resource: <key>`
    pub async fn finish(mut self, operation: &str) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::debug!(error = %e, "progress ticker ended abnormally");
        }
        self.reporter
            .line(&format!("{} kube_resource: {}", operation, self.key));
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ticker_prints_start_and_outcome() {
        let (reporter, lines) = ProgressReporter::buffered();
        let ticker = reporter.track("kube_resource.web");
        ticker.finish("Created").await;

        let lines = lines.lock().unwrap().clone();
        assert_eq!(
            lines.first().map(String::as_str),
            Some("Creating/Updating kube_resource: kube_resource.web (0 seconds has passed)")
        );
        assert_eq!(
            lines.last().map(String::as_str),
            Some("Created kube_resource: kube_resource.web")
        );
    }

    #[tokio::test]
    async fn test_ticker_repeats_every_interval() {
        let (reporter, lines) = ProgressReporter::buffered();
        let reporter = reporter.with_interval(Duration::from_millis(10));
        let ticker = reporter.track("kube_resource.slow");
        tokio::time::sleep(Duration::from_millis(45)).await;
        ticker.finish("Updated").await;

        let lines = lines.lock().unwrap().clone();
        let keep_alive = lines.iter().filter(|l| l.starts_with("Creating/Updating")).count();
        assert!(keep_alive >= 2, "{lines:?}");
        assert_eq!(lines.last().map(String::as_str), Some("Updated kube_resource: kube_resource.slow"));
    }
}
