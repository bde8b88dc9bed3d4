pub mod core;
pub mod events;
pub mod grading;
pub mod pins;
pub mod records;
pub mod results;
pub mod sheets;
