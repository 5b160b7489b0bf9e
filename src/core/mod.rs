pub mod date;
pub mod order;
pub mod score;
pub mod store;
pub mod task;
