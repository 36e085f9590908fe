//! Lexer and recursive-descent parser for the intent grammar (§3.1-§3.2,
//! §4.1):
//!
//! ```text
//! intent NAME(param: type, ...) {
//!     guard { <constraint>; ... }
//!     solve { }
//!     verify { <post_condition>; ... }
//! }
//! ```
//!
//! The parser does not evaluate expressions (§4.1) — it only builds the IR.
//! Any token the grammar recognizes but the whitelist excludes (`|`, `&`,
//! `**`, `//`, `<<`, `>>`, `and`, `or`, `.`, `[`, `(` as a call) is rejected
//! at parse time with the specific `NodeKind` it names, never silently
//! dropped (§3.2, §7).

mod lexer;
mod grammar;

pub use grammar::{parse_intent, Parser};
pub use lexer::{Lexer, Token, TokenKind};
