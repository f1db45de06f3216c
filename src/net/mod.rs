pub mod cache;
pub mod disk;
pub mod fetch;
pub mod queue;
