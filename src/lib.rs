pub mod cli;
pub mod config;
pub mod infrastructure;
pub mod storage;
pub mod sync;
pub mod view;
