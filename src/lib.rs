pub mod aggregate;
pub mod change;
pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod findings;
pub mod git;
pub mod machine;
pub mod phase;
pub mod process;
pub mod prompts;
pub mod reasoner;
pub mod retry;
pub mod runlog;
pub mod schema;
pub mod session;
pub mod subworker;
pub mod tools;
pub mod transition;

#[cfg(test)]
pub mod test_helpers;
