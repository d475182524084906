// src/cli/handlers/mod.rs

// One module per `procrun` action.

pub mod commons;
pub mod jobs;
pub mod run;
pub mod table;
