//! Glipt Compiler Library
//!
//! Front end for the Glipt scripting language: scanner, arena-allocated
//! parse tree, and bytecode code generator. The main entry point is
//! [`compile`], which turns source text into a script-level function
//! object on the caller's heap:
//!
//! ```rust,ignore
//! use glipt_core::Heap;
//!
//! let mut heap = Heap::new();
//! let script = gliptc::compile(&mut heap, "print(1 + 2)\n")?;
//! ```

pub mod ast;
pub mod codegen;
pub mod parser;
pub mod scanner;

pub use codegen::compile;
pub use parser::parse;
pub use scanner::{Scanner, Token, TokenKind};
