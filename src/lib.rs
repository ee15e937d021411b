pub mod cli;
pub mod errors;
pub mod models;
pub mod resolver;
pub mod storage;
