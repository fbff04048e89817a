//! Per-subsystem concurrency runtime: the bounded circular-buffer queue, the
//! message processor, and the cooperative round-robin scheduler
//! (spec.md §4.2, §4.8, §5).

pub mod processor;
pub mod queue;
pub mod scheduler;

pub use processor::{Processor, ProcessorStats, SubsystemRuntimeHost};
pub use queue::{CircularBuffer, EnqueueOutcome};
pub use scheduler::{Scheduler, SchedulerHandle, Tickable};
