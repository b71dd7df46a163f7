pub mod assignment;
pub mod period;
pub mod report;
pub mod state;
pub mod timestamp;
