pub mod classify;
pub mod config;
pub mod run;
pub mod validate;
