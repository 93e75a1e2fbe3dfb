//! # atf2ael
//!
//! Toolchain for the AEL electronic-design-automation scripting language.
//! Given AEL source, produces a flat, position-annotated IR log; given an
//! IR log (or an ATF file via an external converter), reconstructs AEL
//! source close to the original.
//!
//! ## Pipelines
//!
//! 1. **Compile.** `lexer::tokenize` → `parser::parse` (recursive descent,
//!    emits IR directly) → `ir::codec::write_program`.
//! 2. **Reconstruct.** ATF → (external converter) → `ir::codec::parse_program`
//!    → `reconstruct::reconstruct` → `emitter::Emitter`.
//!
//! Both flows share the IR model (`ir`) and the IR text codec
//! (`ir::codec`).

pub mod driver;
pub mod emitter;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod reconstruct;
pub mod units;
