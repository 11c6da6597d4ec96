//! REM Dialect - lexer, parser, and formatter
//!
//! The textual surface over the five query modes:
//!
//! ```text
//! LOOKUP <key-or-key-list>
//! FUZZY  <text> [threshold=<f>] [limit=<i>]
//! SEARCH <text> table=<name> [field=<name>] [limit=<i>]
//! SQL    table=<name> where="<clause>" [limit=<i>]
//! TRAVERSE <key> [rel_type=<a,b,...>|*] [depth=<i>]
//! ```
//!
//! Quoting is shell-like, commas split list values, and unknown keys are
//! rejected at parse time. The parser never executes anything; it returns a
//! typed [`QueryParams`](rem_core::QueryParams). Formatting a parsed query
//! and re-parsing it is a bijection on canonical forms.

mod format;
mod lexer;
mod parser;

pub use format::format_params;
pub use lexer::tokenize;
pub use parser::parse;
