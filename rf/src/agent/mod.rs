//! Single-call agents
//!
//! Each agent renders one prompt, makes one model call and turns the
//! answer into a typed result. Neither holds state between calls.

mod extract;
mod generate;

pub use extract::{EXTRACT_TOOL, extract};
pub use generate::{generate, select_facts};
