//! REM Agents - schema-driven agent construction
//!
//! Agents are defined by JSON-Schema documents: the `description` is the
//! system prompt, `properties` the output contract, and the extension block
//! declares tool bindings against the in-process tool registry. The factory
//! assembles a typed runtime from a schema name, a resolved model, and the
//! caller context; the runtime drives the tool-using loop with a hard
//! iteration cap.
//!
//! The query planner agent and the moment-compaction pipeline live here as
//! the two built-in consumers of the factory.

mod context;
mod contract;
mod events;
mod factory;
mod moments;
mod planner;
mod schema;
mod tools;

pub use context::*;
pub use contract::*;
pub use events::*;
pub use factory::*;
pub use moments::*;
pub use planner::*;
pub use schema::*;
pub use tools::*;
