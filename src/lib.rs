//! KnitScript interpreter
//!
//! This library runs KnitScript programs against a simulated V-bed knitting
//! machine and produces the knitout instruction stream for the program along
//! with the knit graph of the fabric it made.
//!
//! # Example
//!
//! ```rust
//! use knit_script::{interpret, InterpreterOptions};
//!
//! let source = "Carrier = c1;\nin Leftward direction { knit f2, f1, f0; }";
//! let output = interpret(source, InterpreterOptions::default().without_error_dump()).unwrap();
//! assert!(output.knitout.to_knitout().contains("knit - f2 1"));
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod knit_graph;
pub mod knitout;
pub mod lexer;
pub mod machine;
pub mod parser;

use std::path::Path;

pub use ast::{Location, Program, Statement};
pub use config::{InterpreterOptions, MachineConfig};
pub use error::{ErrorKind, KnitScriptError, KnitScriptResult, LocatedWarning, MachineError, Warning};
pub use interpreter::{InterpretOutput, Interpreter, Value};
pub use knit_graph::{KnitGraph, LoopId};
pub use knitout::{KnitoutStream, Operation};
pub use machine::knitting_machine::KnittingMachine;
pub use parser::{parse, Parser};

/// Run KnitScript source text on a fresh machine
pub fn interpret(source: &str, options: InterpreterOptions) -> KnitScriptResult<InterpretOutput> {
    let mut interpreter = Interpreter::new(options);
    interpreter.run_source(source, None)?;
    Ok(interpreter.into_output())
}

/// Run a `.ks` file on a fresh machine; imports resolve next to the file
pub fn interpret_file(
    path: impl AsRef<Path>,
    options: InterpreterOptions,
) -> KnitScriptResult<InterpretOutput> {
    let mut interpreter = Interpreter::new(options);
    interpreter.run_file(path)?;
    Ok(interpreter.into_output())
}
