pub mod event_bus;
pub mod repository;
pub mod scheduler;
pub mod task_executor;

pub use event_bus::*;
pub use repository::*;
pub use scheduler::*;
pub use task_executor::*;
