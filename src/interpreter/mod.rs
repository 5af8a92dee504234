//! Tree-walking evaluation of KnitScript programs
//!
//! - [`value`]: runtime values and operators
//! - [`builtins`]: host functions, methods and attributes
//! - [`machine_scope`]: per-scope machine settings and their setters
//! - [`scope`]: lexical frames
//! - [`eval`]: the [`Interpreter`] itself

pub mod builtins;
pub mod eval;
pub mod machine_scope;
pub mod scope;
pub mod value;

use serde::Serialize;

use crate::error::LocatedWarning;
use crate::knitout::KnitoutStream;
use crate::machine::knitting_machine::KnittingMachine;

pub use eval::Interpreter;
pub use value::Value;

/// Everything a finished run produced
#[derive(Debug)]
pub struct InterpretOutput {
    pub knitout: KnitoutStream,
    /// Final machine state, including the knit graph
    pub machine: KnittingMachine,
    /// Value of a top-level `return`
    pub exit_value: Option<Value>,
    /// Text of each `print`, in order
    pub printed: Vec<String>,
    pub warnings: Vec<LocatedWarning>,
}

/// Summary of a run for `--json` output
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub knitout: &'a KnitoutStream,
    pub printed: &'a [String],
    pub warnings: Vec<String>,
    pub exit_value: Option<String>,
}

impl InterpretOutput {
    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            knitout: &self.knitout,
            printed: &self.printed,
            warnings: self.warnings.iter().map(ToString::to_string).collect(),
            exit_value: self.exit_value.as_ref().map(Value::repr),
        }
    }
}
