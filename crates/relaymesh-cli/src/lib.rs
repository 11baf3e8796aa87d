//! Library half of the `relaymesh` command line tool

pub mod rules_file;
#[cfg(feature = "openapi")]
pub mod schema;

pub use rules_file::{AgentEntry, RuleEntry, RulesFile};
