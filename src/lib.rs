pub mod calendar;
pub mod config;
pub mod etl;
pub mod fetch;
pub mod logging;
pub mod storage;
pub mod utils;
