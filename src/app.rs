// ABOUTME: App orchestrator: wires config, the shared store, and a coordinator for one CLI command.
// ABOUTME: Runs the intent, prints delivered signals and the session list, then tears down.

use std::sync::Arc;

use crate::cli::Command;
use crate::config::{Config, LoggingConfig};
use crate::format::PlainFormatter;
use crate::store::{self, RecordId, StoreContext, StoreHandle};
use crate::tracker::{Coordinator, CoordinatorOptions, DerivedViewState, ViewSignal};

/// Top-level application for a single command invocation.
pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Acquire the process-wide store, run `command`, and print the result.
    pub async fn run(self, command: Command) -> anyhow::Result<()> {
        let context = StoreContext::from_config(&self.config);
        let store = store::acquire(&context)?;
        let output = self.run_with_store(store, command).await?;
        println!("{}", output);
        Ok(())
    }

    /// Run `command` against `store` and return the text to show the user.
    pub async fn run_with_store(&self, store: StoreHandle, command: Command) -> anyhow::Result<String> {
        let formatter = PlainFormatter::new(self.config.display.time_format.clone());
        let coordinator = Coordinator::spawn(
            store,
            CoordinatorOptions::default().with_formatter(Arc::new(formatter)),
        );
        let signals = coordinator.signals();

        let outcome = match &command {
            Command::Start => coordinator.start().await,
            Command::Stop => coordinator.stop().await,
            Command::Rate { id, quality } => coordinator.rate(RecordId(*id), *quality).await,
            Command::Clear => coordinator.clear().await,
            Command::List { .. } => coordinator.refresh().await,
        };

        let state = coordinator.state();
        let mut lines: Vec<String> = signals.drain_pending().await.iter().map(describe_signal).collect();
        coordinator.shutdown();

        if let Err(e) = outcome {
            // Storage failures were already turned into a signal line.
            if !e.is_storage_failure() {
                lines.push(format!("Error: {}", e));
            }
            return Err(anyhow::anyhow!(lines.join("\n")));
        }

        match command {
            Command::List { json: true } => {
                lines.push(serde_json::to_string_pretty(&*state.all_sessions)?);
            }
            _ => {
                lines.push(status_line(&state));
                lines.push(state.sessions_text.clone());
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Install the stderr tracing subscriber. RUST_LOG wins over the configured filter.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// User-facing text for a one-shot signal.
fn describe_signal(signal: &ViewSignal) -> String {
    match signal {
        ViewSignal::NavigateToRating(id) => {
            format!("Session {id} ended. Rate it with `sleeptrack rate {id} <0-5>`.")
        }
        ViewSignal::Cleared => "All sleep sessions cleared.".to_string(),
        ViewSignal::RatingSaved(id) => format!("Saved rating for session {id}."),
        ViewSignal::StorageFailure(message) => format!("Storage error: {message}"),
    }
}

fn status_line(state: &DerivedViewState) -> String {
    match &state.open_session {
        Some(open) => match open.id {
            Some(id) => format!("Tracking session {id}. Run `sleeptrack stop` when you wake up."),
            None => "Tracking a session.".to_string(),
        },
        None => "Not tracking. Run `sleeptrack start` when you go to bed.".to_string(),
    }
}
