//! CLI command implementations.

pub mod faults;
pub mod harnesses;
pub mod oracle;
pub mod run;
pub mod scenarios;
