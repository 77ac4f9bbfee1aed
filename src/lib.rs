// ABOUTME: Library root for sleeptrack: session store, dispatcher, and reactive coordinator.
// ABOUTME: The binary entry point is in main.rs, which uses this crate as a library.

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
