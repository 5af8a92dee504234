//! Simulated V-bed knitting machine
//!
//! Needles, beds, carriers and sheets make up the machine state; the
//! carriage pass engine is the only code that drives the primitives and
//! writes the resulting knitout.

pub mod bed;
pub mod carriage_pass;
pub mod carrier;
pub mod knitting_machine;
pub mod needle;
pub mod sheet;

pub use bed::NeedleBed;
pub use carriage_pass::{CarriagePassSpec, NeedleInstruction, PassResult};
pub use carrier::{Carrier, CarrierSet, CarrierSystem};
pub use knitting_machine::KnittingMachine;
pub use needle::{Bed, Needle, PassDirection};
pub use sheet::{GaugedSheetRecord, SheetId};
