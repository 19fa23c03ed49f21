//! Side-effecting adapters: filesystem, configuration, templates, processes.

pub mod attachments;
pub mod config;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod sandbox;
pub mod schema;
pub mod terminal;
