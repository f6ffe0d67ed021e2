//! A compiler and runtime for the Slate language: a small line-oriented language that
//! compiles to a typed, stack-based virtual machine.
//!
//! The pipeline is strictly staged. Each source line is tokenized ([`lexer`]) and handed to
//! an ordered registry of line parsers ([`parser`]) that grows the unit's block tree
//! ([`ast`]); the tree then allocates local variable slots, and the code generator
//! ([`bytecode`]) flattens every method into an ordered instruction list, packaged together
//! with a deduplicated constant table into a binary [`bytecode::Module`] container.
//! [`process::Process`] executes a compiled module. Compiling the same source twice yields
//! byte-identical output.
//!
//! # Features
//!
//! | name    | description |
//! | ------- | ----------- |
//! | `serde` | Enables serde derives on the container types |
//! | `cli`   | Enables the [`cli`] module and the `slate` binary (implies `serde`) |

#![forbid(unsafe_code)]

pub mod meta;
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod bytecode;
pub mod process;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test;
