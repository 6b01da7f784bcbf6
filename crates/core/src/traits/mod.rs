pub mod task_mirror;
pub mod worker_process;

pub use task_mirror::*;
pub use worker_process::*;
