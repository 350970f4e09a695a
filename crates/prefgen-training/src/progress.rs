use crate::framework::Metrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run: String },
    Message { run: String, message: String },
    Epoch { run: String, epoch: u32, step: u64, loss: f64 },
    Evaluated { run: String, split: String, metrics: Metrics },
    Finished { run: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run } => println!("[{run}] started"),
            ProgressEvent::Message { run, message } => println!("[{run}] {message}"),
            ProgressEvent::Epoch { run, epoch, step, loss } => {
                println!("[{run}] epoch {epoch:>3} | step {step:>6} | loss {loss:.4}");
            }
            ProgressEvent::Evaluated { run, split, metrics } => {
                let rendered: Vec<String> = metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
                println!("[{run}] {split}: {}", rendered.join(" "));
            }
            ProgressEvent::Finished { run } => println!("[{run}] finished"),
        }
    }
}

/// Forwards events to `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run } => tracing::info!(%run, "run started"),
            ProgressEvent::Message { run, message } => tracing::info!(%run, "{message}"),
            ProgressEvent::Epoch { run, epoch, step, loss } => tracing::info!(%run, epoch, step, loss, "epoch finished"),
            ProgressEvent::Evaluated { run, split, metrics } => {
                tracing::info!(%run, %split, metrics = ?metrics, "evaluated");
            }
            ProgressEvent::Finished { run } => tracing::info!(%run, "run finished"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
