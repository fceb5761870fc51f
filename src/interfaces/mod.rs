pub mod alerts;
pub mod scheduler;
