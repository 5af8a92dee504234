//! Carriage pass engine
//!
//! A [`CarriagePassSpec`] collects needle instructions for one sweep of the
//! carriage. Executing it validates the mix, orders the needles for the
//! sweep direction, handles the inserting hook and all-needle racking, runs
//! the machine primitives, and emits the matching knitout block.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MachineError, Warning};
use crate::knitout::{KnitoutStream, Operation};
use crate::machine::carrier::CarrierSet;
use crate::machine::knitting_machine::KnittingMachine;
use crate::machine::needle::{Bed, Needle, PassDirection};

/// Needle-level instruction inside a carriage pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeedleInstruction {
    Knit,
    Tuck,
    Miss,
    Xfer,
    Split,
    Drop,
}

/// Instructions that may share a pass belong to the same class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassClass {
    Loops,
    Xfer,
    Split,
    Drop,
}

impl NeedleInstruction {
    fn class(self) -> PassClass {
        match self {
            NeedleInstruction::Knit | NeedleInstruction::Tuck | NeedleInstruction::Miss => {
                PassClass::Loops
            }
            NeedleInstruction::Xfer => PassClass::Xfer,
            NeedleInstruction::Split => PassClass::Split,
            NeedleInstruction::Drop => PassClass::Drop,
        }
    }

    pub fn requires_direction(self) -> bool {
        matches!(
            self,
            NeedleInstruction::Knit
                | NeedleInstruction::Tuck
                | NeedleInstruction::Miss
                | NeedleInstruction::Split
        )
    }

    pub fn requires_carrier(self) -> bool {
        self.requires_direction()
    }

    /// Knit, tuck and split create new loops
    pub fn makes_loops(self) -> bool {
        matches!(
            self,
            NeedleInstruction::Knit | NeedleInstruction::Tuck | NeedleInstruction::Split
        )
    }

    pub fn compatible_with(self, other: NeedleInstruction) -> bool {
        self.class() == other.class()
    }

    pub fn keyword(self) -> &'static str {
        match self {
            NeedleInstruction::Knit => "knit",
            NeedleInstruction::Tuck => "tuck",
            NeedleInstruction::Miss => "miss",
            NeedleInstruction::Xfer => "xfer",
            NeedleInstruction::Split => "split",
            NeedleInstruction::Drop => "drop",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "knit" => Some(NeedleInstruction::Knit),
            "tuck" => Some(NeedleInstruction::Tuck),
            "miss" => Some(NeedleInstruction::Miss),
            "xfer" => Some(NeedleInstruction::Xfer),
            "split" => Some(NeedleInstruction::Split),
            "drop" => Some(NeedleInstruction::Drop),
            _ => None,
        }
    }
}

impl fmt::Display for NeedleInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// The instructions and settings of one carriage pass
#[derive(Debug, Clone, Default)]
pub struct CarriagePassSpec {
    instructions: Vec<(Needle, NeedleInstruction)>,
    targets: HashMap<Needle, Needle>,
    pub direction: Option<PassDirection>,
    /// Xfer sources already on this bed are skipped
    pub target_bed: Option<Bed>,
    /// Racking the pass runs at; the previous racking is restored afterwards
    pub racking: Option<f64>,
    pub to_sliders: bool,
    pub carriers: Option<CarrierSet>,
    pub comment: Option<String>,
}

/// What a pass did, needle by needle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassResult {
    /// Source needle and, for xfer and split, the needle it sent loops to
    pub transfers: Vec<(Needle, Option<Needle>)>,
    pub direction: Option<PassDirection>,
    pub made_loops: bool,
}

impl CarriagePassSpec {
    pub fn new(direction: Option<PassDirection>, carriers: Option<CarrierSet>) -> Self {
        Self {
            direction,
            carriers,
            ..Self::default()
        }
    }

    /// Add an instruction; a needle may appear only once per pass
    pub fn add(&mut self, needle: Needle, instruction: NeedleInstruction) -> Result<(), MachineError> {
        if self.instructions.iter().any(|(n, _)| *n == needle) {
            return Err(MachineError::RepeatedNeedle { needle });
        }
        self.instructions.push((needle, instruction));
        Ok(())
    }

    /// Add a transfer or split with an explicit destination
    pub fn add_with_target(
        &mut self,
        needle: Needle,
        instruction: NeedleInstruction,
        target: Needle,
    ) -> Result<(), MachineError> {
        self.add(needle, instruction)?;
        self.targets.insert(needle, target);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn instructions(&self) -> &[(Needle, NeedleInstruction)] {
        &self.instructions
    }

    fn check_homogeneous(&self) -> Result<Option<NeedleInstruction>, MachineError> {
        let mut iter = self.instructions.iter().map(|(_, i)| *i);
        let first = match iter.next() {
            Some(first) => first,
            None => return Ok(None),
        };
        for other in iter {
            if !first.compatible_with(other) {
                return Err(MachineError::IncompatiblePass {
                    first,
                    second: other,
                });
            }
        }
        Ok(Some(first))
    }

    /// Order needles for the sweep
    ///
    /// Rightward passes run ascending with front before back at the same
    /// racked position; leftward passes run descending with back first.
    fn sorted(
        instructions: &[(Needle, NeedleInstruction)],
        direction: PassDirection,
        racking: f64,
    ) -> Vec<(Needle, NeedleInstruction)> {
        let mut ordered = instructions.to_vec();
        ordered.sort_by(|(a, _), (b, _)| {
            let ka = a.racked_position_on_front(racking);
            let kb = b.racked_position_on_front(racking);
            let by_position = ka.total_cmp(&kb).then(a.bed.cmp(&b.bed));
            match direction {
                PassDirection::Rightward => by_position,
                PassDirection::Leftward => by_position.reverse(),
            }
        });
        ordered
    }

    /// Find needles facing each other at the same racked position
    ///
    /// Returns true when the pass needs all-needle racking.
    fn detect_all_needle(
        ordered: &[(Needle, NeedleInstruction)],
        racking: f64,
    ) -> Result<bool, MachineError> {
        let mut all_needle = false;
        for pair in ordered.windows(2) {
            let (a, ia) = pair[0];
            let (b, ib) = pair[1];
            if a.racked_position_on_front(racking) != b.racked_position_on_front(racking) {
                continue;
            }
            if a.bed == b.bed {
                return Err(MachineError::RepeatedNeedle { needle: b });
            }
            let loop_forming = |i: NeedleInstruction| {
                matches!(i, NeedleInstruction::Knit | NeedleInstruction::Tuck)
            };
            if ia != ib || !loop_forming(ia) {
                return Err(MachineError::AllNeedle {
                    first: a,
                    second: b,
                });
            }
            all_needle = true;
        }
        Ok(all_needle)
    }

    fn target_of(&self, needle: Needle, racking: f64) -> Needle {
        match self.targets.get(&needle) {
            Some(target) => *target,
            None => needle.aligned_needle(racking.round() as i64, self.to_sliders),
        }
    }

    fn float_warnings(machine: &KnittingMachine, needle: Needle, carriers: &CarrierSet) -> Vec<Warning> {
        let max_float = machine.config().max_float;
        carriers
            .ids()
            .iter()
            .filter_map(|&id| {
                let previous = machine.carrier_system().carrier(id).ok()?.position()?;
                ((needle.position - previous).abs() > max_float).then_some(Warning::LongFloat {
                    carrier: id,
                    from: previous,
                    to: needle.position,
                    max_float,
                })
            })
            .collect()
    }

    /// Run the pass on `machine`, appending its instructions to `knitout`
    pub fn execute(
        &self,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> Result<PassResult, MachineError> {
        let kind = match self.check_homogeneous()? {
            Some(kind) => kind,
            None => return Ok(PassResult::default()),
        };

        let direction = match kind {
            NeedleInstruction::Drop => PassDirection::Rightward,
            _ if kind.requires_direction() => self
                .direction
                .ok_or(MachineError::RequiresDirection { instruction: kind })?,
            _ => self.direction.unwrap_or(PassDirection::Rightward),
        };

        let carriers = if kind.requires_carrier() {
            let carriers = match &self.carriers {
                Some(carriers) if !carriers.is_empty() => carriers.clone(),
                _ => {
                    return Err(MachineError::NoCarrier {
                        instruction: kind,
                        needle: self.instructions[0].0,
                    })
                }
            };
            machine.carrier_system().ensure_active(&carriers)?;
            Some(carriers)
        } else {
            None
        };

        let selected: Vec<(Needle, NeedleInstruction)> = self
            .instructions
            .iter()
            .copied()
            .filter(|(needle, instruction)| {
                !(*instruction == NeedleInstruction::Xfer && self.target_bed == Some(needle.bed))
            })
            .collect();
        if selected.is_empty() {
            return Ok(PassResult::default());
        }

        let base_racking = machine.racking();
        let mut racking = self.racking.unwrap_or(base_racking);
        let mut ordered = Self::sorted(&selected, direction, racking);
        let mut all_needle = false;
        if kind.class() == PassClass::Loops && Self::detect_all_needle(&ordered, racking)? {
            all_needle = true;
            racking += if racking >= 0.0 { 0.25 } else { -0.25 };
            ordered = Self::sorted(&selected, direction, racking);
        }
        machine.validate_racking(racking)?;

        let changes_rack = racking != base_racking;
        let transfers = matches!(kind.class(), PassClass::Xfer | PassClass::Split);
        let hook_conflict = kind.class() != PassClass::Drop
            && ordered.iter().any(|(needle, _)| {
                machine
                    .carrier_system()
                    .conflicts_with_inserting_hook(needle.position, direction)
            });
        if transfers || changes_rack || hook_conflict {
            if let Some(hooked) = machine.carrier_system_mut().releasehook() {
                knitout.push_with_comment(
                    Operation::Releasehook(CarrierSet::single(hooked)),
                    "release inserting hook before pass",
                );
            }
        }

        if changes_rack {
            machine.set_racking(racking)?;
            if all_needle {
                knitout.push_with_comment(Operation::Rack(racking), "All-needle racking");
            } else {
                knitout.push(Operation::Rack(racking));
            }
        }
        if let Some(comment) = &self.comment {
            knitout.push_comment(comment.clone());
        }

        debug!(
            target: "knit_script::pass",
            instruction = %kind,
            %direction,
            racking,
            needles = ordered.len(),
            "carriage pass"
        );

        let mut result = PassResult {
            transfers: Vec::with_capacity(ordered.len()),
            direction: Some(direction),
            made_loops: false,
        };
        for (needle, instruction) in ordered {
            let target = match instruction {
                NeedleInstruction::Xfer | NeedleInstruction::Split => {
                    Some(self.target_of(needle, racking))
                }
                _ => None,
            };
            let operation = match (instruction, &carriers, target) {
                (NeedleInstruction::Knit, Some(cs), _) | (NeedleInstruction::Tuck, Some(cs), _) => {
                    for warning in Self::float_warnings(machine, needle, cs) {
                        machine.push_warning(warning);
                    }
                    if instruction == NeedleInstruction::Knit {
                        machine.knit(needle, cs)?;
                        Operation::Knit {
                            direction,
                            needle,
                            carriers: cs.clone(),
                        }
                    } else {
                        machine.tuck(needle, cs)?;
                        Operation::Tuck {
                            direction,
                            needle,
                            carriers: cs.clone(),
                        }
                    }
                }
                (NeedleInstruction::Miss, Some(cs), _) => {
                    machine.miss(needle, cs)?;
                    Operation::Miss {
                        direction,
                        needle,
                        carriers: cs.clone(),
                    }
                }
                (NeedleInstruction::Split, Some(cs), Some(target)) => {
                    machine.split(needle, target, cs)?;
                    Operation::Split {
                        direction,
                        needle,
                        target,
                        carriers: cs.clone(),
                    }
                }
                (NeedleInstruction::Xfer, _, Some(target)) => {
                    machine.xfer(needle, target)?;
                    Operation::Xfer { needle, target }
                }
                (NeedleInstruction::Drop, _, _) => {
                    machine.drop(needle)?;
                    Operation::Drop { needle }
                }
                (instruction, _, _) => {
                    return Err(MachineError::NoCarrier {
                        instruction,
                        needle,
                    })
                }
            };
            result.made_loops |= instruction.makes_loops();
            result.transfers.push((needle, target));
            knitout.push(operation);
        }

        if changes_rack {
            machine.set_racking(base_racking)?;
            knitout.push(Operation::Rack(base_racking));
        }
        machine.set_last_direction(direction);

        if result.made_loops {
            let config = machine.config().clone();
            let carrier_system = machine.carrier_system_mut();
            carrier_system.record_pass();
            if carrier_system.try_releasehook(config.release_passes, config.release_loops) {
                if let Some(hooked) = carrier_system.releasehook() {
                    knitout.push(Operation::Releasehook(CarrierSet::single(hooked)));
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::knit_graph::LoopId;

    fn setup(needle_count: usize) -> (KnittingMachine, KnitoutStream) {
        let config = MachineConfig::new(needle_count, 10);
        let stream = KnitoutStream::new(&config);
        (KnittingMachine::new(config), stream)
    }

    fn knit_pass(
        machine: &mut KnittingMachine,
        stream: &mut KnitoutStream,
        direction: PassDirection,
        needles: &[Needle],
    ) -> PassResult {
        let mut pass = CarriagePassSpec::new(Some(direction), Some(CarrierSet::single(1)));
        for needle in needles {
            pass.add(*needle, NeedleInstruction::Knit).unwrap();
        }
        pass.execute(machine, stream).unwrap()
    }

    #[test]
    fn test_rightward_and_leftward_order() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Rightward,
            &[Needle::front(2), Needle::front(0), Needle::front(1)],
        );
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Leftward,
            &[Needle::front(0), Needle::front(2), Needle::front(1)],
        );
        assert_eq!(
            stream.operation_lines(),
            vec![
                "knit + f0 1",
                "knit + f1 1",
                "knit + f2 1",
                "knit - f2 1",
                "knit - f1 1",
                "knit - f0 1",
            ]
        );
        assert_eq!(machine.last_direction(), Some(PassDirection::Leftward));
    }

    #[test]
    fn test_incompatible_mix() {
        let (mut machine, mut stream) = setup(10);
        let mut pass = CarriagePassSpec::new(Some(PassDirection::Rightward), Some(CarrierSet::single(1)));
        pass.add(Needle::front(0), NeedleInstruction::Knit).unwrap();
        pass.add(Needle::front(1), NeedleInstruction::Xfer).unwrap();
        let err = pass.execute(&mut machine, &mut stream).unwrap_err();
        assert!(matches!(err, MachineError::IncompatiblePass { .. }));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_repeated_needle_rejected() {
        let mut pass = CarriagePassSpec::default();
        pass.add(Needle::front(3), NeedleInstruction::Drop).unwrap();
        let err = pass.add(Needle::front(3), NeedleInstruction::Drop).unwrap_err();
        assert_eq!(err, MachineError::RepeatedNeedle { needle: Needle::front(3) });
    }

    #[test]
    fn test_requires_direction_and_carrier() {
        let (mut machine, mut stream) = setup(10);
        let mut pass = CarriagePassSpec::new(None, Some(CarrierSet::single(1)));
        pass.add(Needle::front(0), NeedleInstruction::Tuck).unwrap();
        assert!(matches!(
            pass.execute(&mut machine, &mut stream),
            Err(MachineError::RequiresDirection { .. })
        ));

        let mut pass = CarriagePassSpec::new(Some(PassDirection::Leftward), None);
        pass.add(Needle::front(0), NeedleInstruction::Knit).unwrap();
        assert!(matches!(
            pass.execute(&mut machine, &mut stream),
            Err(MachineError::NoCarrier { .. })
        ));
    }

    #[test]
    fn test_all_needle_racking() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Rightward,
            &[Needle::back(0), Needle::front(0)],
        );
        assert_eq!(
            stream.operation_lines(),
            vec!["rack 0.25", "knit + f0 1", "knit + b0 1", "rack 0"]
        );
        assert!(stream.to_knitout().contains("rack 0.25 ; All-needle racking"));
        assert_eq!(machine.racking(), 0.0);
    }

    #[test]
    fn test_all_needle_requires_matching_instructions() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        let mut pass = CarriagePassSpec::new(Some(PassDirection::Rightward), Some(CarrierSet::single(1)));
        pass.add(Needle::front(1), NeedleInstruction::Knit).unwrap();
        pass.add(Needle::back(1), NeedleInstruction::Tuck).unwrap();
        assert!(matches!(
            pass.execute(&mut machine, &mut stream),
            Err(MachineError::AllNeedle { .. })
        ));
    }

    #[test]
    fn test_xfer_pass_with_racking_override() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Rightward,
            &[Needle::front(2), Needle::front(4)],
        );
        let mut pass = CarriagePassSpec::default();
        pass.racking = Some(-2.0);
        pass.add(Needle::front(4), NeedleInstruction::Xfer).unwrap();
        pass.add(Needle::front(2), NeedleInstruction::Xfer).unwrap();
        let result = pass.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(
            result.transfers,
            vec![
                (Needle::front(2), Some(Needle::back(4))),
                (Needle::front(4), Some(Needle::back(6))),
            ]
        );
        assert_eq!(
            &stream.operation_lines()[2..],
            &["rack -2", "xfer f2 b4", "xfer f4 b6", "rack 0"]
        );
        assert!(!result.made_loops);
    }

    fn bed_state(machine: &KnittingMachine) -> Vec<Vec<LoopId>> {
        (0..10)
            .flat_map(|p| [Needle::front(p), Needle::back(p)])
            .map(|needle| machine.loops_on(needle).to_vec())
            .collect()
    }

    #[test]
    fn test_inverse_xfer_pass_restores_beds() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Rightward,
            &[Needle::front(2), Needle::front(4), Needle::back(1)],
        );
        let before = bed_state(&machine);
        let carrier_before = machine.carrier_system().carrier(1).unwrap().clone();
        let moved = machine.loops_on(Needle::front(2))[0];

        let mut pass = CarriagePassSpec::default();
        pass.racking = Some(-2.0);
        pass.add(Needle::front(2), NeedleInstruction::Xfer).unwrap();
        pass.add(Needle::front(4), NeedleInstruction::Xfer).unwrap();
        let result = pass.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(machine.get_needle_of_loop(moved), Some(Needle::back(4)));
        assert!(machine.loop_index_consistent());

        let mut inverse = CarriagePassSpec::default();
        inverse.racking = Some(-2.0);
        for (_, target) in &result.transfers {
            let target = target.unwrap();
            inverse.add(target, NeedleInstruction::Xfer).unwrap();
        }
        let undone = inverse.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(
            undone.transfers,
            vec![
                (Needle::back(4), Some(Needle::front(2))),
                (Needle::back(6), Some(Needle::front(4))),
            ]
        );
        assert_eq!(bed_state(&machine), before);
        assert_eq!(machine.carrier_system().carrier(1).unwrap(), &carrier_before);
        assert_eq!(machine.get_needle_of_loop(moved), Some(Needle::front(2)));
        assert!(machine.loop_index_consistent());
        assert_eq!(machine.racking(), 0.0);
    }

    #[test]
    fn test_split_then_drop_forgets_loops() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(3)]);
        let old = machine.loops_on(Needle::front(3))[0];

        let mut split = CarriagePassSpec::new(Some(PassDirection::Leftward), Some(CarrierSet::single(1)));
        split.add(Needle::front(3), NeedleInstruction::Split).unwrap();
        split.execute(&mut machine, &mut stream).unwrap();
        let new = machine.loops_on(Needle::front(3))[0];
        assert_ne!(new, old);
        assert_eq!(machine.get_needle_of_loop(old), Some(Needle::back(3)));
        assert_eq!(machine.get_needle_of_loop(new), Some(Needle::front(3)));

        let mut drop = CarriagePassSpec::default();
        drop.add(Needle::back(3), NeedleInstruction::Drop).unwrap();
        drop.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(machine.get_needle_of_loop(old), None);
        assert_eq!(machine.get_needle_of_loop(new), Some(Needle::front(3)));
        assert!(machine.loop_index_consistent());
    }

    #[test]
    fn test_target_bed_filter() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Rightward,
            &[Needle::front(1), Needle::back(3)],
        );
        let mut pass = CarriagePassSpec::default();
        pass.target_bed = Some(Bed::Back);
        pass.add(Needle::front(1), NeedleInstruction::Xfer).unwrap();
        pass.add(Needle::back(3), NeedleInstruction::Xfer).unwrap();
        let result = pass.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(result.transfers, vec![(Needle::front(1), Some(Needle::back(1)))]);
    }

    #[test]
    fn test_hook_conflict_forces_release() {
        let config = MachineConfig {
            release_passes: 10,
            ..MachineConfig::new(30, 10)
        };
        let mut stream = KnitoutStream::new(&config);
        let mut machine = KnittingMachine::new(config);
        machine.carrier_system_mut().inhook(1).unwrap();
        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(10)]);
        assert_eq!(machine.carrier_system().hook_position(), Some(10));

        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(9)]);
        assert_eq!(machine.carrier_system().hooked_carrier(), Some(1));

        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(12)]);
        assert_eq!(
            &stream.operation_lines()[2..],
            &["releasehook 1", "knit + f12 1"]
        );
        assert!(machine.carrier_system().is_consistent());
    }

    #[test]
    fn test_releasehook_after_recommended_passes() {
        let (mut machine, mut stream) = setup(30);
        machine.carrier_system_mut().inhook(1).unwrap();
        knit_pass(&mut machine, &mut stream, PassDirection::Leftward, &[Needle::front(20)]);
        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(20)]);
        assert_eq!(stream.operation_lines().last().map(String::as_str), Some("releasehook 1"));
        assert_eq!(machine.carrier_system().hooked_carrier(), None);
    }

    #[test]
    fn test_long_float_warning() {
        let (mut machine, mut stream) = setup(30);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(0)]);
        knit_pass(&mut machine, &mut stream, PassDirection::Rightward, &[Needle::front(9)]);
        let warnings = machine.take_warnings();
        assert!(warnings.contains(&Warning::LongFloat {
            carrier: 1,
            from: 0,
            to: 9,
            max_float: 5
        }));
    }

    #[test]
    fn test_drop_pass_is_rightward() {
        let (mut machine, mut stream) = setup(10);
        machine.carrier_system_mut().bring_in(1).unwrap();
        knit_pass(
            &mut machine,
            &mut stream,
            PassDirection::Leftward,
            &[Needle::front(0), Needle::front(3)],
        );
        let mut pass = CarriagePassSpec::new(Some(PassDirection::Leftward), None);
        for needle in [Needle::front(3), Needle::front(0)] {
            pass.add(needle, NeedleInstruction::Drop).unwrap();
        }
        let result = pass.execute(&mut machine, &mut stream).unwrap();
        assert_eq!(result.direction, Some(PassDirection::Rightward));
        let lines = stream.operation_lines();
        assert_eq!(&lines[lines.len() - 2..], &["drop f0", "drop f3"]);
        assert!(machine.loops_on(Needle::front(0)).is_empty());
    }
}
