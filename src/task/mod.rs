pub mod scheduler;
pub mod store;
pub mod types;
pub mod worker;

pub use scheduler::TaskScheduler;
pub use store::{InMemoryTaskStore, StoredTask, TaskStore};
pub use types::{GenerationJob, Task, TaskStatus, VideoSettings};
pub use worker::{GenerationWorker, WorkerConfig};
