//! Spreadsheet-driven poster rendering.
//!
//! Rows of a product sheet are gated into work items, each work item is
//! submitted once to a remote rendering service, every job is polled to a
//! terminal outcome under a deadline, and the outcomes are folded into a run
//! report for a chat webhook.

pub mod aggregate;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod notify;
pub mod pipeline;
pub mod poller;
pub mod render;
pub mod report;
pub mod schema;
pub mod secrets;
pub mod sheets;
pub mod state_machine;
pub mod storage;
pub mod submitter;
pub mod ui;
