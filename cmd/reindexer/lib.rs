pub mod cli;
pub mod initializers;
pub mod mapping;
pub mod report;
