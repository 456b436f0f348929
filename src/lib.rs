pub mod config;
pub mod core;
pub mod report;
pub mod scan;
pub mod script;
