//! Tool framework for finq
//!
//! Tools are the actions the agent loop can take between model turns.
//! Each tool is addressed by name through a [`ToolRegistry`] and takes
//! JSON arguments described by its input schema.

pub mod error;
pub mod registry;
pub mod tool;

pub use error::{Result, ToolError};
pub use registry::ToolRegistry;
pub use tool::{Tool, parse_params};
