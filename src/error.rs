//! Error and warning types for the KnitScript interpreter
//!
//! Every error raised while executing a program is a [`KnitScriptError`]:
//! an [`ErrorKind`] plus the source [`Location`] of the statement that
//! produced it. Machine-level failures are described by [`MachineError`]
//! and carried inside `ErrorKind::Machine`.

use std::fmt;

use thiserror::Error;

use crate::ast::Location;
use crate::machine::carriage_pass::NeedleInstruction;
use crate::machine::needle::Needle;

/// Result type for interpreter operations
pub type KnitScriptResult<T> = Result<T, KnitScriptError>;

/// Failures of the simulated knitting machine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    #[error("racking {racking} is outside the legal range of +/-{max_rack}")]
    RackOutOfRange { racking: f64, max_rack: f64 },

    #[error("cannot transfer {from} to {to} at racking {racking}; the pair requires racking {required}")]
    XferRack {
        from: Needle,
        to: Needle,
        racking: f64,
        required: f64,
    },

    #[error("cannot transfer between {from} and {to} on the same bed")]
    SameBedXfer { from: Needle, to: Needle },

    #[error("cannot {operation} on slider {needle}")]
    SliderOperation {
        operation: &'static str,
        needle: Needle,
    },

    #[error("{needle} is not clear: its slider still holds loops")]
    SliderNotClear { needle: Needle },

    #[error("carrier {carrier} is not active")]
    InactiveCarrier { carrier: u32 },

    #[error("carrier {carrier} does not exist on a machine with {count} carriers")]
    UnknownCarrier { carrier: u32, count: u32 },

    #[error("cannot inhook carrier {carrier} while carrier {hooked} is on the inserting hook")]
    InhookWhileHooked { carrier: u32, hooked: u32 },

    #[error("all-needle operation on {first} and {second} requires both to knit or both to tuck")]
    AllNeedle { first: Needle, second: Needle },

    #[error("{needle} is used more than once in a carriage pass")]
    RepeatedNeedle { needle: Needle },

    #[error("{first} and {second} cannot share a carriage pass")]
    IncompatiblePass {
        first: NeedleInstruction,
        second: NeedleInstruction,
    },

    #[error("{instruction} requires a carriage pass direction")]
    RequiresDirection { instruction: NeedleInstruction },

    #[error("{instruction} on {needle} requires an active carrier set")]
    NoCarrier {
        instruction: NeedleInstruction,
        needle: Needle,
    },

    #[error("{needle} is outside a bed of {needle_count} needles")]
    NeedleOutOfRange { needle: Needle, needle_count: usize },

    #[error("positions {first} and {second} do not share a sheet-local index")]
    LayerGroup { first: usize, second: usize },

    #[error("layer {layer} is outside gauge {gauge}")]
    LayerOutOfRange { layer: u32, gauge: u32 },
}

impl MachineError {
    /// Name used by `catch` clauses to select this error
    pub fn type_name(&self) -> &'static str {
        match self {
            MachineError::RackOutOfRange { .. } | MachineError::XferRack { .. } => {
                "Valid_Rack_Error"
            }
            MachineError::SameBedXfer { .. } => "Same_Bed_Xfer_Error",
            MachineError::SliderOperation { .. } => "Slider_Operation_Error",
            MachineError::SliderNotClear { .. } => "Clear_Slider_Error",
            MachineError::InactiveCarrier { .. } => "Inactive_Carrier_Error",
            MachineError::UnknownCarrier { .. } => "Carrier_Range_Error",
            MachineError::InhookWhileHooked { .. } => "Inhooked_Carrier_Error",
            MachineError::AllNeedle { .. } => "All_Needle_Operation_Error",
            MachineError::RepeatedNeedle { .. } => "Repeated_Needle_In_Pass",
            MachineError::IncompatiblePass { .. } => "Incompatible_Carriage_Pass",
            MachineError::RequiresDirection { .. } => "Instruction_Requires_Direction",
            MachineError::NoCarrier { .. } => "No_Carrier_Error",
            MachineError::NeedleOutOfRange { .. } => "Needle_Range_Error",
            MachineError::LayerGroup { .. } | MachineError::LayerOutOfRange { .. } => {
                "Layer_Error"
            }
        }
    }
}

/// Categories of interpreter errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("name error: {0}")]
    Name(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("import error: {0}")]
    Import(String),

    #[error("attribute error: {0}")]
    Attribute(String),

    #[error("division by zero: {0}")]
    ZeroDivision(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("knitting machine error: {0}")]
    Machine(#[from] MachineError),
}

impl ErrorKind {
    /// Name used by `catch` clauses to select this error
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::Parse(_) => "Parse_Error",
            ErrorKind::Name(_) => "NameError",
            ErrorKind::Type(_) => "TypeError",
            ErrorKind::Value(_) => "ValueError",
            ErrorKind::Index(_) => "IndexError",
            ErrorKind::Key(_) => "KeyError",
            ErrorKind::Import(_) => "ImportError",
            ErrorKind::Attribute(_) => "AttributeError",
            ErrorKind::ZeroDivision(_) => "ZeroDivisionError",
            ErrorKind::Assertion(_) => "Assertion_Exception",
            ErrorKind::Machine(e) => e.type_name(),
        }
    }
}

/// An interpreter error tied to the statement that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct KnitScriptError {
    pub kind: ErrorKind,
    pub location: Option<Location>,
}

impl KnitScriptError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(msg.into()))
    }

    pub fn name_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name(msg.into()))
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type(msg.into()))
    }

    pub fn value_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value(msg.into()))
    }

    pub fn index_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index(msg.into()))
    }

    pub fn key_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Key(msg.into()))
    }

    pub fn import_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import(msg.into()))
    }

    pub fn attribute_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attribute(msg.into()))
    }

    pub fn zero_division(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivision(msg.into()))
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assertion(msg.into()))
    }

    /// Attach a location unless a more specific one is already present
    pub fn located(mut self, location: &Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }

    /// Name used by `catch` clauses to select this error
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_machine_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Machine(_))
    }

    /// Check whether a `catch` filter name selects this error
    pub fn matches_filter(&self, filter: &str) -> bool {
        match filter {
            "Knit_Script_Error" | "Exception" => true,
            "Knitting_Machine_Error" => self.is_machine_error(),
            name => self.type_name() == name,
        }
    }

    /// The explanation without location information
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl From<MachineError> for KnitScriptError {
    fn from(error: MachineError) -> Self {
        Self::new(ErrorKind::Machine(error))
    }
}

impl From<ErrorKind> for KnitScriptError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for KnitScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => {
                write!(f, "{}: {} ({})", location, self.kind, self.type_name())?;
                if !location.excerpt.is_empty() {
                    write!(f, "\n  | {}", location.excerpt)?;
                }
                Ok(())
            }
            None => write!(f, "{} ({})", self.kind, self.type_name()),
        }
    }
}

impl std::error::Error for KnitScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Non-fatal conditions reported while a program runs
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A local variable hides a global with the same name
    ShadowsGlobal { name: String },
    /// The requested sheet does not exist in the gauge; it was clamped
    SheetBeyondGauge { sheet: u32, gauge: u32 },
    /// A carrier was listed twice in a carrier set and the repeat dropped
    DuplicateCarrier { carrier: u32 },
    /// A carrier floated further than the configured maximum
    LongFloat {
        carrier: u32,
        from: i64,
        to: i64,
        max_float: i64,
    },
    /// A carrier with a loose yarn end was brought in without the hook
    LooseYarn { carrier: u32 },
}

impl Warning {
    pub fn type_name(&self) -> &'static str {
        match self {
            Warning::ShadowsGlobal { .. } => "Shadows_Global",
            Warning::SheetBeyondGauge { .. } => "Sheet_Beyond_Gauge",
            Warning::DuplicateCarrier { .. } => "Duplicate_Carrier",
            Warning::LongFloat { .. } => "Long_Float",
            Warning::LooseYarn { .. } => "Loose_Yarn",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ShadowsGlobal { name } => {
                write!(f, "local variable '{}' shadows a global of the same name", name)
            }
            Warning::SheetBeyondGauge { sheet, gauge } => write!(
                f,
                "sheet {} is beyond gauge {}; using sheet {}",
                sheet,
                gauge,
                gauge.saturating_sub(1)
            ),
            Warning::DuplicateCarrier { carrier } => {
                write!(f, "carrier {} appears twice in a carrier set", carrier)
            }
            Warning::LongFloat {
                carrier,
                from,
                to,
                max_float,
            } => write!(
                f,
                "carrier {} floats from {} to {}, beyond the maximum float of {}",
                carrier, from, to, max_float
            ),
            Warning::LooseYarn { carrier } => write!(
                f,
                "carrier {} has a loose yarn end and was brought in without the inserting hook",
                carrier
            ),
        }
    }
}

/// A warning with the statement that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedWarning {
    pub warning: Warning,
    pub location: Option<Location>,
}

impl fmt::Display for LocatedWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(
                f,
                "{}: {} ({})",
                location,
                self.warning,
                self.warning.type_name()
            ),
            None => write!(f, "{} ({})", self.warning, self.warning.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_filters() {
        let err: KnitScriptError = MachineError::RackOutOfRange {
            racking: 5.0,
            max_rack: 4.25,
        }
        .into();
        assert!(err.matches_filter("Knit_Script_Error"));
        assert!(err.matches_filter("Knitting_Machine_Error"));
        assert!(err.matches_filter("Valid_Rack_Error"));
        assert!(!err.matches_filter("NameError"));

        let name = KnitScriptError::name_error("x is not defined");
        assert!(name.matches_filter("NameError"));
        assert!(!name.matches_filter("Knitting_Machine_Error"));
    }

    #[test]
    fn test_display_with_location() {
        let location = Location::new(Some("knit.ks".into()), 3, "x = y;");
        let err = KnitScriptError::name_error("'y' is not defined").located(&location);
        let text = err.to_string();
        assert!(text.starts_with("knit.ks:3: name error"));
        assert!(text.contains("| x = y;"));
    }

    #[test]
    fn test_located_keeps_innermost() {
        let inner = Location::new(None, 7, "inner;");
        let outer = Location::new(None, 2, "outer;");
        let err = KnitScriptError::value_error("bad").located(&inner).located(&outer);
        assert_eq!(err.location.map(|l| l.line), Some(7));
    }
}
