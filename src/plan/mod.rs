//! Conversion of decisions into an atomic, validated task DAG.

pub mod generator;
pub mod task;

pub use generator::PlanGenerator;
pub use task::{
    AtomicTask, ChildFileRef, ChildKbRef, ExecutionPlan, TaskMetadata, TaskType, priority,
};
