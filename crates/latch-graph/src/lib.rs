pub mod channel;
pub mod compiled;
pub mod constants;
pub mod context;
pub mod edge;
pub mod frontier;
pub mod node;
pub mod observer;
mod resume;
mod runner;
pub mod state_graph;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use latch_checkpoint::prelude::{Command, GraphInput, GraphOutput, Interrupt, SendDirective};

    pub use crate::channel::{
        AggregateOp, AppendChannel, BinaryOperatorAggregate, Channel, ChannelSpec, LastValue,
    };
    pub use crate::compiled::{CompiledStateGraph, StateSnapshot};
    pub use crate::constants::{END, START};
    pub use crate::context::NodeContext;
    pub use crate::edge::{ConditionalEdge, Edge, Route};
    pub use crate::node::NodeFn;
    pub use crate::observer::{ExecutionCounter, ExecutionObserver, TaskOutcome};
    pub use crate::state_graph::StateGraph;
}
