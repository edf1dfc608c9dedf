//! # rplink - Batch Command Automation for Network Devices
//!
//! `rplink` drives interactive CLI sessions on many network devices over SSH,
//! captures their output reliably despite pagination and unpredictable
//! response latency, and can repeat the same work on a daily, weekly or
//! monthly schedule.
//!
//! ## Features
//!
//! - **Inactivity-Windowed Reads**: A response is complete when the device stays silent for the chunk timeout
//! - **Pager Handling**: `--More--` prompts are continued automatically
//! - **Privileged Mode**: Optional `enable` negotiation with a dedicated password
//! - **Batch Execution**: One command set across many devices with a bounded worker pool
//! - **Scheduling**: Named daily, weekly and monthly triggers
//! - **Offline Replay**: Recorded sessions can be replayed without a network
//! - **Maximum Compatibility**: Legacy SSH algorithm profile for older devices
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rplink::batch::{BatchOptions, FileLogStore, NoopListener, Orchestrator};
//! use rplink::device::{Credentials, Device};
//! use rplink::session::SshTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(
//!         SshTransport::default(),
//!         Arc::new(FileLogStore::new("logs")),
//!     );
//!
//!     orchestrator.start(
//!         vec![Device::new("192.168.1.1", "core-rtr1")],
//!         vec!["show version".to_string()],
//!         Credentials::new("admin", "password"),
//!         BatchOptions::default(),
//!         Arc::new(NoopListener),
//!     )?;
//!     orchestrator.wait().await;
//!
//!     for result in orchestrator.results() {
//!         println!("{}: {}", result.device.display_name(), result.success);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionAutomator`] - Drives one device session from banner to exit
//! - [`batch::Orchestrator`] - Runs a command set across a device set
//! - [`scheduler::Scheduler`] - Fires batches from time-based triggers
//! - [`error::PlinkError`] - Error types for sessions, batches and triggers
//! - [`config`] - Timing constants and SSH algorithm lists

pub mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod scheduler;
pub mod session;
