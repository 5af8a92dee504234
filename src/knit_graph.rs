//! Record of the fabric produced by a program
//!
//! Every loop the machine creates is registered here together with the yarn
//! it was made from, and every stitch (a parent loop pulled through by a
//! child loop) becomes an edge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a loop in the knit graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Which way a child loop was pulled through its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullDirection {
    BackToFront,
    FrontToBack,
}

/// A loop and the yarn it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub id: LoopId,
    pub carrier: u32,
    /// Yarn generation of the carrier; bumped every time the yarn is cut
    pub yarn: u32,
    /// Previous loop made on the same yarn
    pub prior_on_yarn: Option<LoopId>,
}

/// A stitch edge between a parent loop and the loop pulled through it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stitch {
    pub parent: LoopId,
    pub child: LoopId,
    pub pull_direction: PullDirection,
}

/// Graph of loops and stitches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnitGraph {
    loops: Vec<LoopRecord>,
    stitches: Vec<Stitch>,
}

impl KnitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new loop on the given yarn
    pub fn add_loop(&mut self, carrier: u32, yarn: u32, prior_on_yarn: Option<LoopId>) -> LoopId {
        let id = LoopId(self.loops.len() as u32);
        self.loops.push(LoopRecord {
            id,
            carrier,
            yarn,
            prior_on_yarn,
        });
        id
    }

    /// Record that `child` was pulled through `parent`
    pub fn connect(&mut self, parent: LoopId, child: LoopId, pull_direction: PullDirection) {
        self.stitches.push(Stitch {
            parent,
            child,
            pull_direction,
        });
    }

    pub fn loops(&self) -> &[LoopRecord] {
        &self.loops
    }

    pub fn stitches(&self) -> &[Stitch] {
        &self.stitches
    }

    pub fn loop_record(&self, id: LoopId) -> Option<&LoopRecord> {
        self.loops.get(id.0 as usize)
    }

    /// Loops that `child` was pulled through
    pub fn parents_of(&self, child: LoopId) -> Vec<LoopId> {
        self.stitches
            .iter()
            .filter(|s| s.child == child)
            .map(|s| s.parent)
            .collect()
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
