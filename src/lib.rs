//! Agent tool execution and sandbox file synchronization for an AI app builder.
//!
//! An agent loop (not part of this crate) calls tools from [`tools`] one at a
//! time. Tools act on a project's ephemeral sandbox through [`sandbox`] and
//! keep the durable file map in [`store`] consistent with it via [`sync`],
//! while [`stream`] carries incremental write progress to an observer.

pub mod config;
pub mod sandbox;
pub mod store;
pub mod stream;
pub mod sync;
pub mod tools;

pub use config::Config;
pub use tools::{ToolCallRecord, ToolExecutor, ToolResult, ToolServices, TOOL_CATALOG_VERSION};
