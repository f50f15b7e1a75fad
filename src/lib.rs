pub mod args;
pub mod errors;
pub mod event_recorder;
pub mod heap;
pub mod parser;
pub mod problem_recorder;
pub mod slurp;
pub mod utils;
