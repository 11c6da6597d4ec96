//! REM Context - session history and prompt assembly
//!
//! Loads and persists conversation turns with read-time compression (long
//! assistant turns become head + tail plus a LOOKUP hint), and composes the
//! full prompt: system hint, compressed history, new turns. No content is
//! ever discarded; compression is purely a read-time transformation.

mod assemble;
mod compress;
mod store;

pub use assemble::*;
pub use compress::*;
pub use store::*;
