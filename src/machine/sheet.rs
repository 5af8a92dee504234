//! Gauged sheets: interleaved virtual beds sharing one physical bed
//!
//! Under gauge `g` the bed is cut into groups of `g` adjacent positions that
//! share a sheet-local index. Each position carries a layer giving its
//! front-to-back order within the group. Resetting to a sheet peels every
//! other sheet's loops out of the way so the active sheet can be worked as
//! if it were alone on the machine.

use std::fmt;

use tracing::debug;

use crate::error::MachineError;
use crate::machine::knitting_machine::KnittingMachine;
use crate::machine::needle::{Bed, Needle};

/// A sheet within a gauge, `0 <= sheet < gauge`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetId {
    pub sheet: u32,
    pub gauge: u32,
}

impl SheetId {
    pub fn new(sheet: u32, gauge: u32) -> Self {
        Self { sheet, gauge }
    }

    /// Actual bed position of sheet-local position `local`
    pub fn actual_position(&self, local: i64) -> i64 {
        local * i64::from(self.gauge) + i64::from(self.sheet)
    }

    /// Sheet-local index of an actual position
    pub fn local_position(&self, actual: i64) -> i64 {
        actual.div_euclid(i64::from(self.gauge))
    }

    /// Sheet an actual position belongs to under this gauge
    pub fn sheet_of(&self, actual: i64) -> u32 {
        actual.rem_euclid(i64::from(self.gauge)) as u32
    }

    pub fn contains(&self, actual: i64) -> bool {
        self.sheet_of(actual) == self.sheet
    }

    /// Convert a sheet-local needle to the actual needle on the bed
    pub fn actual_needle(&self, local: Needle) -> Needle {
        Needle::new(local.bed, self.actual_position(local.position), local.is_slider)
    }

    /// Convert an actual needle to its sheet-local address
    pub fn local_needle(&self, actual: Needle) -> Needle {
        Needle::new(actual.bed, self.local_position(actual.position), actual.is_slider)
    }
}

impl Default for SheetId {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}:g{}", self.sheet, self.gauge)
    }
}

const BEDS: [Bed; 2] = [Bed::Front, Bed::Back];

fn slot(bed: Bed) -> usize {
    match bed {
        Bed::Front => 0,
        Bed::Back => 1,
    }
}

/// Needle holding the loops that live on `bed` once their position is
/// stacked onto `side`
///
/// When both beds hold loops, the stacked-over bed's loops ride on the
/// slider of `side` so the two stacks can be separated again.
fn placement(home: [bool; 2], bed: Bed, side: Option<Bed>, position: i64) -> Needle {
    match side {
        Some(side) if side != bed => Needle::new(side, position, home[slot(side)]),
        _ => Needle::new(bed, position, false),
    }
}

/// Transfers planned by [`GaugedSheetRecord::reset_to_sheet`]
///
/// Returns run before peels so every peel lands on a needle whose slider
/// has already been emptied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetReset {
    /// `(from, to)` pairs bringing loops back to their home bed
    pub returns: Vec<(Needle, Needle)>,
    /// `(from, to)` pairs stacking loops out of the active sheet's way
    pub peels: Vec<(Needle, Needle)>,
}

impl SheetReset {
    pub fn is_empty(&self) -> bool {
        self.returns.is_empty() && self.peels.is_empty()
    }

    /// Every transfer in the order it runs
    pub fn transfers(&self) -> Vec<(Needle, Needle)> {
        self.returns.iter().chain(&self.peels).copied().collect()
    }
}

/// Layer order and peel bookkeeping for every position under one gauge
#[derive(Debug, Clone, PartialEq)]
pub struct GaugedSheetRecord {
    gauge: u32,
    layers: Vec<u32>,
    /// Beds holding a position's loops while its sheet is worked, front then back
    home: Vec<[bool; 2]>,
    /// Bed the last reset stacked the position's loops onto
    peeled: Vec<Option<Bed>>,
}

impl GaugedSheetRecord {
    pub fn new(gauge: u32, needle_count: usize) -> Self {
        let gauge = gauge.max(1);
        Self {
            gauge,
            layers: (0..needle_count).map(|p| p as u32 % gauge).collect(),
            home: vec![[false; 2]; needle_count],
            peeled: vec![None; needle_count],
        }
    }

    pub fn gauge(&self) -> u32 {
        self.gauge
    }

    pub fn needle_count(&self) -> usize {
        self.layers.len()
    }

    fn check_position(&self, position: usize) -> Result<(), MachineError> {
        if position >= self.layers.len() {
            return Err(MachineError::NeedleOutOfRange {
                needle: Needle::front(position as i64),
                needle_count: self.layers.len(),
            });
        }
        Ok(())
    }

    fn check_layer(&self, layer: u32) -> Result<(), MachineError> {
        if layer >= self.gauge {
            return Err(MachineError::LayerOutOfRange {
                layer,
                gauge: self.gauge,
            });
        }
        Ok(())
    }

    /// Positions sharing a sheet-local index with `position`
    fn group(&self, position: usize) -> std::ops::Range<usize> {
        let g = self.gauge as usize;
        let start = position / g * g;
        start..(start + g).min(self.layers.len())
    }

    pub fn layer(&self, position: usize) -> Result<u32, MachineError> {
        self.check_position(position)?;
        Ok(self.layers[position])
    }

    /// Move `position` to `layer`
    ///
    /// With `rotate_siblings` the whole group rotates by the same offset;
    /// otherwise the position swaps layers with the sibling holding `layer`.
    pub fn set_layer_position(
        &mut self,
        position: usize,
        layer: u32,
        rotate_siblings: bool,
    ) -> Result<(), MachineError> {
        self.check_position(position)?;
        self.check_layer(layer)?;
        let old = self.layers[position];
        if old == layer {
            return Ok(());
        }
        let group = self.group(position);
        if rotate_siblings {
            let delta = (layer + self.gauge - old) % self.gauge;
            for q in group {
                self.layers[q] = (self.layers[q] + delta) % self.gauge;
            }
        } else {
            if let Some(sibling) = group.clone().find(|&q| self.layers[q] == layer) {
                self.layers[sibling] = old;
            }
            self.layers[position] = layer;
        }
        Ok(())
    }

    /// Exchange the layers of two positions in the same group
    pub fn swap_layer_at_positions(&mut self, first: usize, second: usize) -> Result<(), MachineError> {
        self.check_position(first)?;
        self.check_position(second)?;
        if self.group(first) != self.group(second) {
            return Err(MachineError::LayerGroup { first, second });
        }
        self.layers.swap(first, second);
        Ok(())
    }

    /// Bring `position` `steps` layers closer to the front
    pub fn push_forward(&mut self, position: usize, steps: u32) -> Result<(), MachineError> {
        let layer = self.layer(position)?;
        let steps = steps % self.gauge;
        self.set_layer_position(position, (layer + self.gauge - steps) % self.gauge, true)
    }

    /// Send `position` `steps` layers further back
    pub fn push_backward(&mut self, position: usize, steps: u32) -> Result<(), MachineError> {
        let layer = self.layer(position)?;
        self.set_layer_position(position, (layer + steps % self.gauge) % self.gauge, true)
    }

    pub fn set_to_front(&mut self, position: usize) -> Result<(), MachineError> {
        self.set_layer_position(position, 0, true)
    }

    pub fn set_to_back(&mut self, position: usize) -> Result<(), MachineError> {
        self.set_layer_position(position, self.gauge - 1, true)
    }

    /// Check that every full group holds each layer exactly once
    pub fn is_consistent(&self) -> bool {
        let g = self.gauge as usize;
        self.layers.chunks(g).all(|group| {
            let mut seen = vec![false; g];
            group.iter().all(|&layer| {
                let slot = layer as usize;
                slot < g && !std::mem::replace(&mut seen[slot], true)
            })
        })
    }

    /// Plan the transfers that make `sheet` the working sheet
    ///
    /// Loops of the active sheet go back to their home beds. Every other
    /// sheet is stacked onto the front bed when its layer is lower than the
    /// active sheet's and onto the back bed when higher. A position holding
    /// loops on both beds keeps the stacked-over loops on the slider of the
    /// bed it is stacked onto.
    pub fn reset_to_sheet(&mut self, sheet: u32, machine: &KnittingMachine) -> SheetReset {
        let g = self.gauge as usize;
        let sheet = (sheet as usize).min(g - 1);
        let holds = |needle: Needle| !machine.loops_on(needle).is_empty();
        let mut reset = SheetReset::default();
        for position in 0..self.layers.len() {
            let p = position as i64;
            let recorded = self.home[position];
            // a stale record (loops moved behind our back) is re-read from the bed
            let peeled = self.peeled[position].filter(|&side| {
                BEDS.into_iter()
                    .filter(|&bed| recorded[slot(bed)])
                    .all(|bed| holds(placement(recorded, bed, Some(side), p)))
            });
            if peeled.is_none() {
                self.home[position] = [holds(Needle::front(p)), holds(Needle::back(p))];
            }
            let home = self.home[position];
            if home == [false, false] {
                self.peeled[position] = None;
                continue;
            }
            let active = position / g * g + sheet;
            let desired = if position % g == sheet || active >= self.layers.len() {
                None
            } else if self.layers[position] < self.layers[active] {
                Some(Bed::Front)
            } else {
                Some(Bed::Back)
            };
            if desired != peeled {
                for bed in BEDS.into_iter().filter(|&bed| home[slot(bed)]) {
                    let at_home = Needle::new(bed, p, false);
                    let here = placement(home, bed, peeled, p);
                    let there = placement(home, bed, desired, p);
                    if here != at_home {
                        reset.returns.push((here, at_home));
                    }
                    if there != at_home {
                        reset.peels.push((at_home, there));
                    }
                }
            }
            self.peeled[position] = desired;
        }
        debug!(
            target: "knit_script::sheet",
            sheet,
            gauge = self.gauge,
            returns = reset.returns.len(),
            peels = reset.peels.len(),
            "reset to sheet"
        );
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::machine::carrier::CarrierSet;

    fn knit_all(machine: &mut KnittingMachine, needles: &[Needle]) {
        let cs = CarrierSet::single(1);
        if !machine.carrier_system().carrier(1).unwrap().is_active() {
            machine.carrier_system_mut().bring_in(1).unwrap();
        }
        for needle in needles {
            machine.knit(*needle, &cs).unwrap();
        }
    }

    fn apply(machine: &mut KnittingMachine, reset: &SheetReset) {
        for (from, to) in reset.transfers() {
            machine.xfer(from, to).unwrap();
        }
    }

    #[test]
    fn test_sheet_addressing() {
        let sheet = SheetId::new(1, 3);
        assert_eq!(sheet.actual_position(2), 7);
        assert_eq!(sheet.local_position(7), 2);
        assert_eq!(sheet.sheet_of(7), 1);
        assert_eq!(sheet.actual_needle(Needle::back(4)), Needle::back(13));
        assert_eq!(sheet.to_string(), "s1:g3");
    }

    #[test]
    fn test_rotation_keeps_layers_distinct() {
        let mut record = GaugedSheetRecord::new(3, 9);
        record.set_layer_position(4, 0, true).unwrap();
        assert_eq!(&record.layers[3..6], &[2, 0, 1]);
        assert!(record.is_consistent());

        record.set_layer_position(4, 0, true).unwrap();
        assert_eq!(&record.layers[3..6], &[2, 0, 1]);

        record.set_layer_position(3, 1, false).unwrap();
        assert_eq!(&record.layers[3..6], &[1, 0, 2]);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_push_round_trip() {
        let mut record = GaugedSheetRecord::new(4, 8);
        record.swap_layer_at_positions(4, 6).unwrap();
        let before = record.clone();
        record.push_forward(6, 3).unwrap();
        record.push_backward(6, 3).unwrap();
        assert_eq!(record, before);
        record.set_to_back(5).unwrap();
        assert_eq!(record.layer(5).unwrap(), 3);
        record.set_to_front(5).unwrap();
        assert_eq!(record.layer(5).unwrap(), 0);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_swap_requires_same_group() {
        let mut record = GaugedSheetRecord::new(2, 6);
        let err = record.swap_layer_at_positions(1, 2).unwrap_err();
        assert_eq!(err, MachineError::LayerGroup { first: 1, second: 2 });
        assert!(matches!(
            record.set_layer_position(0, 2, true),
            Err(MachineError::LayerOutOfRange { layer: 2, gauge: 2 })
        ));
    }

    #[test]
    fn test_gauge_one_is_identity() {
        let mut machine = KnittingMachine::new(MachineConfig::new(6, 3));
        knit_all(&mut machine, &[Needle::front(0), Needle::back(3)]);
        let mut record = GaugedSheetRecord::new(1, 6);
        assert!(record.reset_to_sheet(0, &machine).is_empty());
    }

    #[test]
    fn test_peel_and_return() {
        let mut machine = KnittingMachine::new(MachineConfig::new(8, 3));
        let mut record = GaugedSheetRecord::new(2, 8);
        // sheet 0 at positions 0, 2 and sheet 1 at positions 1, 3, all on front
        knit_all(
            &mut machine,
            &[Needle::front(0), Needle::front(2), Needle::front(1), Needle::front(3)],
        );

        // working sheet 0: sheet 1 has the higher layer and moves behind
        let transfers = record.reset_to_sheet(0, &machine);
        assert!(transfers.returns.is_empty());
        assert_eq!(
            transfers.peels,
            vec![
                (Needle::front(1), Needle::back(1)),
                (Needle::front(3), Needle::back(3)),
            ]
        );
        apply(&mut machine, &transfers);
        assert!(record.reset_to_sheet(0, &machine).is_empty());

        // working sheet 1: its loops come home, sheet 0 stays in front
        let transfers = record.reset_to_sheet(1, &machine);
        assert!(transfers.peels.is_empty());
        assert_eq!(
            transfers.returns,
            vec![
                (Needle::back(1), Needle::front(1)),
                (Needle::back(3), Needle::front(3)),
            ]
        );
        apply(&mut machine, &transfers);
        assert!(record.reset_to_sheet(1, &machine).is_empty());
    }

    #[test]
    fn test_layer_order_drives_peel_direction() {
        let mut machine = KnittingMachine::new(MachineConfig::new(4, 3));
        let mut record = GaugedSheetRecord::new(2, 4);
        knit_all(&mut machine, &[Needle::back(0), Needle::back(1)]);
        record.set_to_front(1).unwrap();

        // sheet 0 now lies behind sheet 1, so its back-bed loop stays put
        // while working sheet 1
        assert!(record.reset_to_sheet(1, &machine).is_empty());
        // working sheet 0, sheet 1 is in front and must come forward
        assert_eq!(
            record.reset_to_sheet(0, &machine).transfers(),
            vec![(Needle::back(1), Needle::front(1))]
        );
    }

    #[test]
    fn test_tubular_sheets_stack_onto_sliders() {
        let mut machine = KnittingMachine::new(MachineConfig::new(4, 3));
        let mut record = GaugedSheetRecord::new(2, 4);
        // both sheets knit tubes: loops on front and back at every position
        knit_all(
            &mut machine,
            &[
                Needle::front(0),
                Needle::back(0),
                Needle::front(1),
                Needle::back(1),
            ],
        );
        let front_1 = machine.loops_on(Needle::front(1)).to_vec();
        let back_1 = machine.loops_on(Needle::back(1)).to_vec();

        // working sheet 0: sheet 1 stacks behind, its front loops on the back slider
        let reset = record.reset_to_sheet(0, &machine);
        assert!(reset.returns.is_empty());
        assert_eq!(reset.peels, vec![(Needle::front(1), Needle::back_slider(1))]);
        apply(&mut machine, &reset);
        assert!(machine.loops_on(Needle::front(1)).is_empty());
        assert_eq!(machine.loops_on(Needle::back_slider(1)), front_1.as_slice());
        assert!(record.reset_to_sheet(0, &machine).is_empty());

        // sheet 1 in front of sheet 0: the stack moves over to the front bed
        record.set_to_front(1).unwrap();
        let reset = record.reset_to_sheet(0, &machine);
        assert_eq!(reset.returns, vec![(Needle::back_slider(1), Needle::front(1))]);
        assert_eq!(reset.peels, vec![(Needle::back(1), Needle::front_slider(1))]);
        apply(&mut machine, &reset);
        assert_eq!(machine.loops_on(Needle::front(1)), front_1.as_slice());
        assert_eq!(machine.loops_on(Needle::front_slider(1)), back_1.as_slice());

        // working sheet 1 separates its tube and stacks sheet 0 behind it
        let reset = record.reset_to_sheet(1, &machine);
        assert_eq!(reset.returns, vec![(Needle::front_slider(1), Needle::back(1))]);
        assert_eq!(reset.peels, vec![(Needle::front(0), Needle::back_slider(0))]);
        apply(&mut machine, &reset);
        assert_eq!(machine.loops_on(Needle::front(1)), front_1.as_slice());
        assert_eq!(machine.loops_on(Needle::back(1)), back_1.as_slice());
        assert!(machine.loop_index_consistent());
    }
}
