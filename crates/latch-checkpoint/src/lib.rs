pub mod command;
pub mod ids;
pub mod interrupt;
pub mod memory;
pub mod send;
pub mod sqlite;
pub mod store;
pub mod types;

pub mod prelude {
    pub use crate::command::{COMMAND_KEY, Command, GraphInput};
    pub use crate::ids::{derive_interrupt_id, derive_task_id};
    pub use crate::interrupt::{INTERRUPT_KEY, Interrupt};
    pub use crate::memory::MemoryCheckpointStore;
    pub use crate::send::{SEND_KEY, SendDirective, extract_sends, is_send, send_output};
    pub use crate::sqlite::SqliteCheckpointStore;
    pub use crate::store::CheckpointStore;
    pub use crate::types::{
        Checkpoint, CheckpointMetadata, GraphOutput, TaskRecord, TaskStatus,
    };
}
