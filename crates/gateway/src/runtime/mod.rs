pub mod cancel;
pub mod chat_exec;
pub mod pool;
pub mod recorder;
pub mod runner;

pub use cancel::CancelMap;
pub use chat_exec::{ChatExecutor, ChatSubmission};
pub use pool::{PoolCondition, PoolHealth, WorkerPool};
pub use recorder::ExecutionRecorder;
pub use runner::InvestigationRunner;
