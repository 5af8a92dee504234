//! Machine and interpreter configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the simulated knitting machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Machine model written to the knitout header
    pub machine_type: String,
    /// Needles per bed
    pub needle_count: usize,
    /// Largest legal racking magnitude
    pub max_rack: f64,
    /// Number of yarn carriers
    pub carrier_count: u32,
    /// Needles reserved to the side of the inserting hook
    pub hook_size: i64,
    /// Longest float a carrier may make before a warning
    pub max_float: i64,
    pub knitout_version: u32,
    /// Passes after which releasing the hook is recommended
    pub release_passes: usize,
    /// Loops after which releasing the hook is recommended
    pub release_loops: usize,
    /// Default carriage position written to the header
    pub position: String,
    /// Loose yarn goes in on the inserting hook; without one it is brought
    /// in directly and warned about
    pub inserting_hook: bool,
}

impl MachineConfig {
    pub fn new(needle_count: usize, carrier_count: u32) -> Self {
        Self {
            needle_count,
            carrier_count,
            ..Self::default()
        }
    }

    /// Default configuration for a Shima Seiki SWG091N2
    pub fn swg091n2() -> Self {
        Self {
            machine_type: "SWG091N2".to_string(),
            needle_count: 540,
            max_rack: 4.25,
            carrier_count: 10,
            hook_size: 5,
            max_float: 5,
            knitout_version: 2,
            release_passes: 2,
            release_loops: 10,
            position: "Center".to_string(),
            inserting_hook: true,
        }
    }

    /// Load a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::swg091n2()
    }
}

/// Options for a single interpreter run
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    pub machine: MachineConfig,
    /// Dotted prefix under which host modules of the standard library live
    pub stdlib_prefix: String,
    /// Directory searched for `.ks` standard library modules
    pub stdlib_path: Option<PathBuf>,
    /// File receiving the partial knitout when a program fails
    pub error_dump: Option<PathBuf>,
}

impl InterpreterOptions {
    pub fn new(machine: MachineConfig) -> Self {
        Self {
            machine,
            ..Self::default()
        }
    }

    /// Keep failed runs from writing the partial knitout to disk
    pub fn without_error_dump(mut self) -> Self {
        self.error_dump = None;
        self
    }
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            stdlib_prefix: "ks_stdlib".to_string(),
            stdlib_path: None,
            error_dump: Some(PathBuf::from("error.k")),
        }
    }
}
