pub mod core;
pub mod evaluations;
pub mod groups;
pub mod reports;
pub mod setup;
pub mod submissions;
pub mod tasks;
