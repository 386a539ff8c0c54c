pub mod config;
pub mod policy;
pub mod run;
pub mod study;
