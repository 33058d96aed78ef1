//! Collection and inspection: the engine that evaluates compiled schemes
//! against the rolling signal history, and the worker thread that drives
//! it from the input queues to the upstream-facing output queue.

mod engine;
mod worker;

pub use engine::CollectionInspectionEngine;
pub use worker::{InputQueues, InspectionController, InspectionHandle, InspectionService};
