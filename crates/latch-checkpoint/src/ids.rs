//! Deterministic identities for tasks and interrupts.
//!
//! Both are name-based (v5) UUIDs so that re-entering the same superstep
//! re-derives the same ids. Resume routing depends on this: a resume map
//! built from one invocation must still address the same call sites in
//! the next one.

use uuid::Uuid;

const TASK_NAMESPACE: Uuid = Uuid::from_u128(0x6c61_7463_685f_7461_736b_5f6e_735f_7631);
const INTERRUPT_NAMESPACE: Uuid = Uuid::from_u128(0x6c61_7463_685f_696e_7472_5f6e_735f_7631);

/// Path of a task triggered by an edge into `node`.
pub fn pull_path(node: &str) -> String {
    format!("pull:{node}")
}

/// Path of the `index`-th fan-out task sent by `source_task_id` to `target`.
pub fn push_path(source_task_id: &str, target: &str, index: usize) -> String {
    format!("push:{source_task_id}:{target}:{index}")
}

/// Derive a task id from its superstep and trigger path.
pub fn derive_task_id(step: usize, path: &str) -> String {
    Uuid::new_v5(&TASK_NAMESPACE, format!("{step}|{path}").as_bytes()).to_string()
}

/// Derive the id of the `occurrence`-th suspend call inside a task execution.
pub fn derive_interrupt_id(
    thread_id: &str,
    step: usize,
    task_id: &str,
    occurrence: usize,
) -> String {
    Uuid::new_v5(
        &INTERRUPT_NAMESPACE,
        format!("{thread_id}|{step}|{task_id}|{occurrence}").as_bytes(),
    )
    .to_string()
}
