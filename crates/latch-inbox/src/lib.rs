//! Human-in-the-loop requests in the agent-inbox shape.
//!
//! A node calls [`request_human`] with the action it wants to take. The
//! request is surfaced as an interrupt payload; the resume value is parsed
//! into a [`HumanResponse`] and checked against what the request allowed.

pub mod error;
pub mod graph;
pub mod request;
pub mod tools;
pub mod types;

pub mod prelude {
    pub use crate::error::InboxError;
    pub use crate::graph::{TOOL_CALLS, TOOL_RESULTS, build_tool_graph};
    pub use crate::request::request_human;
    pub use crate::tools::{
        FAST_ANALYSIS, SLOW_PROCESSING, ToolSettings, fast_analysis, slow_processing,
    };
    pub use crate::types::{ActionRequest, HumanInterrupt, HumanInterruptConfig, HumanResponse};
}
