#![warn(missing_docs)]
//! # tsn - An Embeddable Statically-Typed Scripting Language
//!
//! Source text is parsed to an AST, lowered to a three-address IR,
//! optimized, register-allocated and executed by a register-based
//! virtual machine. Host programs embed it by binding native functions,
//! methods, properties and types; script code calls into the host with
//! bit-exact argument marshalling.
//!
//! ## Quick Start
//!
//! ```
//! use tsn::{CallArg, Config, Runtime};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = Runtime::new(Config::default())?;
//! let (module, _log) = rt.compile(
//!     "main.tsn",
//!     "export function main() : i32 { return 2 + 3 * 4; }",
//! )?;
//! rt.init_module(&module)?;
//!
//! let main = rt.find_function(&module, "main").expect("main exists");
//! let result = rt.call(main, &[])?;
//! assert_eq!(result.as_i32(), Some(14));
//! # Ok(())
//! # }
//! ```
//!
//! ## Binding host functions
//!
//! ```
//! use tsn::{CallArg, Config, Runtime};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = Runtime::new(Config::default())?;
//! rt.bind_function("square", |x: i32| -> i32 { x * x })?;
//!
//! let (module, _log) = rt.compile(
//!     "sq.tsn",
//!     "export function main(n: i32) : i32 { return square(n) + 1; }",
//! )?;
//! rt.init_module(&module)?;
//! let main = rt.find_function(&module, "main").expect("main exists");
//! assert_eq!(rt.call(main, &[CallArg::I32(6)])?.as_i32(), Some(37));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! source -> lexer -> parser -> AST
//!        -> lowering (three-address IR, per-function builders)
//!        -> optimizer (code holder + label map)
//!        -> register allocator (linear scan, GP/FP, stack spills)
//!        -> VM encoder (64-bit instruction words)
//!        -> interpreter (register file + flat memory + host trampoline)
//! ```
//!
//! The [`Runtime`] is the explicit handle everything threads through:
//! type/function registries, the backend, host objects and the heap.
//! There are no process-wide singletons; teardown is drop.

pub mod backend;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod error;
pub mod ffi;
pub mod lexer;
pub mod module;
pub mod optimizer;
pub mod parser;
pub mod runtime;
pub mod types;
pub mod workspace;

pub use backend::{RegAllocStats, VmBackend};
pub use builtins::Builtins;
pub use compiler::logger::{LogCode, LogMessage, Logger, Severity};
pub use config::Config;
pub use error::{BindError, Error, Result, RuntimeError};
pub use ffi::{
    ByVal, Callback, HostObject, ObjectTypeBinder, ObjectTypeExtender, PrimitiveTypeBinder,
};
pub use lexer::{Scanner, SourceSpan, Token, TokenKind};
pub use module::{DataSlot, Module};
pub use parser::{Ast, Parser};
pub use runtime::{CallArg, ExecutionContext, Object, ObjectData, Runtime};
pub use types::{
    AccessModifier, ArgKind, DataType, Function, FunctionId, ModuleId, TypeId, TypeKind, TypeMeta,
};
pub use workspace::{ScriptInfo, WorkspaceIndex};
