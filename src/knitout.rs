//! The knitout instruction stream
//!
//! Append-only list of comments and operations in execution order. Nothing
//! is reordered after it is pushed; every decision happens before emission.

use std::fmt;

use serde::Serialize;

use crate::config::MachineConfig;
use crate::machine::carrier::CarrierSet;
use crate::machine::needle::{Needle, PassDirection};

/// A single knitout operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operation {
    In(CarrierSet),
    Inhook(CarrierSet),
    Releasehook(CarrierSet),
    Out(CarrierSet),
    Outhook(CarrierSet),
    Knit {
        direction: PassDirection,
        needle: Needle,
        carriers: CarrierSet,
    },
    Tuck {
        direction: PassDirection,
        needle: Needle,
        carriers: CarrierSet,
    },
    Miss {
        direction: PassDirection,
        needle: Needle,
        carriers: CarrierSet,
    },
    Split {
        direction: PassDirection,
        needle: Needle,
        target: Needle,
        carriers: CarrierSet,
    },
    Xfer {
        needle: Needle,
        target: Needle,
    },
    Drop {
        needle: Needle,
    },
    Rack(f64),
    Pause,
}

impl Operation {
    pub fn opcode(&self) -> &'static str {
        match self {
            Operation::In(_) => "in",
            Operation::Inhook(_) => "inhook",
            Operation::Releasehook(_) => "releasehook",
            Operation::Out(_) => "out",
            Operation::Outhook(_) => "outhook",
            Operation::Knit { .. } => "knit",
            Operation::Tuck { .. } => "tuck",
            Operation::Miss { .. } => "miss",
            Operation::Split { .. } => "split",
            Operation::Xfer { .. } => "xfer",
            Operation::Drop { .. } => "drop",
            Operation::Rack(_) => "rack",
            Operation::Pause => "pause",
        }
    }
}

/// Render a racking value the way knitout expects (`0`, `-2`, `0.25`)
pub fn format_racking(racking: f64) -> String {
    if racking == 0.0 {
        "0".to_string()
    } else if racking.fract() == 0.0 {
        format!("{}", racking as i64)
    } else {
        format!("{}", racking)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = self.opcode();
        match self {
            Operation::In(cs)
            | Operation::Inhook(cs)
            | Operation::Releasehook(cs)
            | Operation::Out(cs)
            | Operation::Outhook(cs) => write!(f, "{} {}", opcode, cs),
            Operation::Knit {
                direction,
                needle,
                carriers,
            }
            | Operation::Tuck {
                direction,
                needle,
                carriers,
            }
            | Operation::Miss {
                direction,
                needle,
                carriers,
            } => write!(f, "{} {} {} {}", opcode, direction.symbol(), needle, carriers),
            Operation::Split {
                direction,
                needle,
                target,
                carriers,
            } => write!(
                f,
                "{} {} {} {} {}",
                opcode,
                direction.symbol(),
                needle,
                target,
                carriers
            ),
            Operation::Xfer { needle, target } => write!(f, "{} {} {}", opcode, needle, target),
            Operation::Drop { needle } => write!(f, "{} {}", opcode, needle),
            Operation::Rack(racking) => write!(f, "{} {}", opcode, format_racking(*racking)),
            Operation::Pause => write!(f, "{}", opcode),
        }
    }
}

/// One line of the stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KnitoutLine {
    Comment(String),
    Operation {
        operation: Operation,
        comment: Option<String>,
    },
}

impl fmt::Display for KnitoutLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnitoutLine::Comment(text) => write!(f, ";{}", text),
            KnitoutLine::Operation {
                operation,
                comment: Some(comment),
            } => write!(f, "{} ;{}", operation, comment),
            KnitoutLine::Operation {
                operation,
                comment: None,
            } => write!(f, "{}", operation),
        }
    }
}

/// Header block plus the append-only instruction stream
#[derive(Debug, Clone, Serialize)]
pub struct KnitoutStream {
    header: Vec<String>,
    lines: Vec<KnitoutLine>,
}

impl KnitoutStream {
    /// Start a stream with the header describing `config`
    pub fn new(config: &MachineConfig) -> Self {
        let carriers: Vec<String> = (1..=config.carrier_count).map(|c| c.to_string()).collect();
        let header = vec![
            format!(";!knitout-{}", config.knitout_version),
            format!(";;Machine: {}", config.machine_type),
            format!(";;Width: {}", config.needle_count),
            format!(";;Position: {}", config.position),
            format!(";;Carriers: {}", carriers.join(" ")),
        ];
        Self {
            header,
            lines: Vec::new(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn lines(&self) -> &[KnitoutLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a comment line; a leading space is added after the `;`
    pub fn push_comment(&mut self, text: impl Into<String>) {
        self.lines.push(KnitoutLine::Comment(format!(" {}", text.into())));
    }

    pub fn push(&mut self, operation: Operation) {
        self.lines.push(KnitoutLine::Operation {
            operation,
            comment: None,
        });
    }

    pub fn push_with_comment(&mut self, operation: Operation, comment: impl Into<String>) {
        self.lines.push(KnitoutLine::Operation {
            operation,
            comment: Some(format!(" {}", comment.into())),
        });
    }

    /// Operations in emission order, without comments
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.lines.iter().filter_map(|line| match line {
            KnitoutLine::Operation { operation, .. } => Some(operation),
            KnitoutLine::Comment(_) => None,
        })
    }

    /// Operations rendered without their comments
    pub fn operation_lines(&self) -> Vec<String> {
        self.operations().map(Operation::to_string).collect()
    }

    /// Render the stream as knitout text
    pub fn to_knitout(&self) -> String {
        let mut output = String::new();
        for line in &self.header {
            output.push_str(line);
            output.push('\n');
        }
        for line in &self.lines {
            output.push_str(&line.to_string());
            output.push('\n');
        }
        output
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for KnitoutStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_knitout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_text() {
        let knit = Operation::Knit {
            direction: PassDirection::Rightward,
            needle: Needle::front(0),
            carriers: CarrierSet::single(1),
        };
        assert_eq!(knit.to_string(), "knit + f0 1");

        let split = Operation::Split {
            direction: PassDirection::Leftward,
            needle: Needle::back(3),
            target: Needle::front_slider(3),
            carriers: CarrierSet::new([2, 3]).0,
        };
        assert_eq!(split.to_string(), "split - b3 fs3 2 3");

        assert_eq!(Operation::Rack(0.25).to_string(), "rack 0.25");
        assert_eq!(Operation::Rack(-2.0).to_string(), "rack -2");
        assert_eq!(Operation::Rack(-0.0).to_string(), "rack 0");
    }

    #[test]
    fn test_stream_rendering() {
        let config = MachineConfig::new(10, 3);
        let mut stream = KnitoutStream::new(&config);
        stream.push_with_comment(Operation::Inhook(CarrierSet::single(1)), "bring in");
        stream.push_comment("a note");
        stream.push(Operation::Drop {
            needle: Needle::back(2),
        });

        let text = stream.to_knitout();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ";!knitout-2");
        assert_eq!(lines[2], ";;Width: 10");
        assert_eq!(lines[4], ";;Carriers: 1 2 3");
        assert_eq!(&lines[5..], &["inhook 1 ; bring in", "; a note", "drop b2"]);
        assert_eq!(stream.operation_lines(), vec!["inhook 1", "drop b2"]);
    }
}
