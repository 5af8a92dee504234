//! The simulated V-bed knitting machine
//!
//! Owns both beds, the carrier system, the racking and the knit graph.
//! Primitives only change machine state; the carriage pass engine decides
//! ordering and emits the matching knitout.

use tracing::trace;

use crate::config::MachineConfig;
use crate::error::{MachineError, Warning};
use crate::knit_graph::{KnitGraph, LoopId, PullDirection};
use crate::machine::bed::NeedleBed;
use crate::machine::carrier::{CarrierSet, CarrierSystem};
use crate::machine::needle::{Bed, Needle, PassDirection};

/// Knitting machine state
#[derive(Debug, Clone)]
pub struct KnittingMachine {
    config: MachineConfig,
    front: NeedleBed,
    back: NeedleBed,
    carriers: CarrierSystem,
    racking: f64,
    last_direction: Option<PassDirection>,
    graph: KnitGraph,
    warnings: Vec<Warning>,
}

impl KnittingMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            front: NeedleBed::new(Bed::Front, config.needle_count),
            back: NeedleBed::new(Bed::Back, config.needle_count),
            carriers: CarrierSystem::new(config.carrier_count, config.hook_size),
            racking: 0.0,
            last_direction: None,
            graph: KnitGraph::new(),
            warnings: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn needle_count(&self) -> usize {
        self.config.needle_count
    }

    pub fn racking(&self) -> f64 {
        self.racking
    }

    pub fn last_direction(&self) -> Option<PassDirection> {
        self.last_direction
    }

    pub fn set_last_direction(&mut self, direction: PassDirection) {
        self.last_direction = Some(direction);
    }

    pub fn carrier_system(&self) -> &CarrierSystem {
        &self.carriers
    }

    pub fn carrier_system_mut(&mut self) -> &mut CarrierSystem {
        &mut self.carriers
    }

    pub fn graph(&self) -> &KnitGraph {
        &self.graph
    }

    pub fn bed(&self, bed: Bed) -> &NeedleBed {
        match bed {
            Bed::Front => &self.front,
            Bed::Back => &self.back,
        }
    }

    fn bed_mut(&mut self, bed: Bed) -> &mut NeedleBed {
        match bed {
            Bed::Front => &mut self.front,
            Bed::Back => &mut self.back,
        }
    }

    /// Loops held on `needle`, bottom first
    pub fn loops_on(&self, needle: Needle) -> &[LoopId] {
        self.bed(needle.bed).loops(needle)
    }

    pub fn get_needle_of_loop(&self, loop_id: LoopId) -> Option<Needle> {
        self.front
            .get_needle_of_loop(loop_id)
            .or_else(|| self.back.get_needle_of_loop(loop_id))
    }

    /// Queue a warning for the interpreter to collect
    pub fn push_warning(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Fail unless `racking` is within the machine's legal range
    pub fn validate_racking(&self, racking: f64) -> Result<(), MachineError> {
        if racking.abs() > self.config.max_rack {
            return Err(MachineError::RackOutOfRange {
                racking,
                max_rack: self.config.max_rack,
            });
        }
        Ok(())
    }

    pub fn set_racking(&mut self, racking: f64) -> Result<(), MachineError> {
        self.validate_racking(racking)?;
        self.racking = racking;
        Ok(())
    }

    /// Rack so that `front_pos` sits across from `back_pos`
    pub fn update_rack(&mut self, front_pos: i64, back_pos: i64) -> Result<f64, MachineError> {
        let racking = (front_pos - back_pos) as f64;
        self.set_racking(racking)?;
        Ok(racking)
    }

    fn check_workable(&self, needle: Needle, operation: &'static str) -> Result<(), MachineError> {
        if needle.is_slider {
            return Err(MachineError::SliderOperation { operation, needle });
        }
        let bed = self.bed(needle.bed);
        bed.check(needle)?;
        if !bed.is_clear(needle) {
            return Err(MachineError::SliderNotClear { needle });
        }
        Ok(())
    }

    /// Create one loop per carrier on `needle`, pulled through `parents`
    fn make_loops(
        &mut self,
        needle: Needle,
        carriers: &CarrierSet,
        parents: &[LoopId],
    ) -> Result<Vec<LoopId>, MachineError> {
        let pull_direction = match needle.bed {
            Bed::Front => PullDirection::BackToFront,
            Bed::Back => PullDirection::FrontToBack,
        };
        let mut created = Vec::with_capacity(carriers.len());
        for &id in carriers.ids() {
            let (yarn, prior) = {
                let carrier = self.carriers.carrier(id)?;
                (carrier.yarn(), carrier.last_loop())
            };
            let loop_id = self.graph.add_loop(id, yarn, prior);
            self.carriers.make_loop(id, needle.position, loop_id)?;
            for &parent in parents {
                self.graph.connect(parent, loop_id, pull_direction);
            }
            created.push(loop_id);
        }
        self.bed_mut(needle.bed)
            .add_loops(needle, created.clone(), false)?;
        Ok(created)
    }

    /// Knit through the loops on `needle`, replacing them with new loops
    pub fn knit(&mut self, needle: Needle, carriers: &CarrierSet) -> Result<Vec<LoopId>, MachineError> {
        self.check_workable(needle, "knit")?;
        self.carriers.ensure_active(carriers)?;
        let parents = self.bed_mut(needle.bed).drop(needle)?;
        trace!(target: "knit_script::machine", %needle, parents = parents.len(), "knit");
        self.make_loops(needle, carriers, &parents)
    }

    /// Add new loops on top of the loops already on `needle`
    pub fn tuck(&mut self, needle: Needle, carriers: &CarrierSet) -> Result<Vec<LoopId>, MachineError> {
        self.check_workable(needle, "tuck")?;
        self.carriers.ensure_active(carriers)?;
        trace!(target: "knit_script::machine", %needle, "tuck");
        self.make_loops(needle, carriers, &[])
    }

    pub fn drop(&mut self, needle: Needle) -> Result<Vec<LoopId>, MachineError> {
        trace!(target: "knit_script::machine", %needle, "drop");
        self.bed_mut(needle.bed).drop(needle)
    }

    /// Move every loop from `from` to `to` on the opposite bed
    ///
    /// The pair must be aligned at the current racking. Moved loops keep
    /// their order and land beneath anything already on `to`.
    pub fn xfer(&mut self, from: Needle, to: Needle) -> Result<Vec<LoopId>, MachineError> {
        if from.bed == to.bed {
            return Err(MachineError::SameBedXfer { from, to });
        }
        let (front, back) = if from.is_front() { (from, to) } else { (to, from) };
        let required = (front.position - back.position) as f64;
        if required != self.racking {
            return Err(MachineError::XferRack {
                from,
                to,
                racking: self.racking,
                required,
            });
        }
        self.bed(from.bed).check(from)?;
        self.bed(to.bed).check(to)?;
        if !self.bed(to.bed).is_clear(to) {
            return Err(MachineError::SliderNotClear { needle: to });
        }
        let loops = self.bed_mut(from.bed).drop(from)?;
        trace!(target: "knit_script::machine", %from, %to, loops = loops.len(), "xfer");
        self.bed_mut(to.bed).receive_transfer(to, loops.clone())?;
        Ok(loops)
    }

    /// Transfer `from` to `to` and knit new loops on `from` through the moved loops
    pub fn split(
        &mut self,
        from: Needle,
        to: Needle,
        carriers: &CarrierSet,
    ) -> Result<Vec<LoopId>, MachineError> {
        self.check_workable(from, "split")?;
        self.carriers.ensure_active(carriers)?;
        let moved = self.xfer(from, to)?;
        self.make_loops(from, carriers, &moved)
    }

    /// Move the carriers to `needle` without forming loops
    pub fn miss(&mut self, needle: Needle, carriers: &CarrierSet) -> Result<(), MachineError> {
        self.bed(needle.bed).check(needle)?;
        self.carriers.ensure_active(carriers)?;
        for &id in carriers.ids() {
            self.carriers.miss(id, needle.position)?;
        }
        Ok(())
    }

    /// Main needles on `bed` holding loops, ascending
    pub fn needles_with_loops(&self, bed: Bed, sliders: bool) -> Vec<Needle> {
        self.bed(bed).needles_with_loops(sliders)
    }

    /// Check that the loop index agrees with the loops held on every needle
    pub fn loop_index_consistent(&self) -> bool {
        [Bed::Front, Bed::Back].into_iter().all(|bed| {
            [false, true].into_iter().all(|sliders| {
                self.needles_with_loops(bed, sliders).into_iter().all(|needle| {
                    self.loops_on(needle)
                        .iter()
                        .all(|l| self.get_needle_of_loop(*l) == Some(needle))
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_carrier() -> (KnittingMachine, CarrierSet) {
        let mut machine = KnittingMachine::new(MachineConfig::new(20, 10));
        machine.carrier_system_mut().bring_in(1).unwrap();
        (machine, CarrierSet::single(1))
    }

    #[test]
    fn test_knit_replaces_loops() {
        let (mut machine, cs) = machine_with_carrier();
        let first = machine.knit(Needle::front(2), &cs).unwrap();
        let second = machine.knit(Needle::front(2), &cs).unwrap();
        assert_eq!(machine.loops_on(Needle::front(2)), second.as_slice());
        assert_eq!(machine.get_needle_of_loop(first[0]), None);
        assert_eq!(machine.graph().parents_of(second[0]), first);
    }

    #[test]
    fn test_tuck_stacks() {
        let (mut machine, cs) = machine_with_carrier();
        let a = machine.knit(Needle::back(1), &cs).unwrap();
        let b = machine.tuck(Needle::back(1), &cs).unwrap();
        assert_eq!(machine.loops_on(Needle::back(1)), &[a[0], b[0]]);
    }

    #[test]
    fn test_plating_order() {
        let mut machine = KnittingMachine::new(MachineConfig::new(20, 10));
        machine.carrier_system_mut().bring_in(3).unwrap();
        machine.carrier_system_mut().bring_in(1).unwrap();
        let cs = CarrierSet::new([3, 1]).0;
        let loops = machine.knit(Needle::front(0), &cs).unwrap();
        let carriers: Vec<u32> = loops
            .iter()
            .map(|l| machine.graph().loop_record(*l).unwrap().carrier)
            .collect();
        assert_eq!(carriers, vec![3, 1]);
    }

    #[test]
    fn test_xfer_requires_racking() {
        let (mut machine, cs) = machine_with_carrier();
        machine.knit(Needle::front(0), &cs).unwrap();
        let err = machine.xfer(Needle::front(0), Needle::back(1)).unwrap_err();
        assert!(matches!(err, MachineError::XferRack { required, .. } if required == -1.0));
        assert_eq!(err.to_string().contains("racking 0"), true);

        machine.update_rack(0, 1).unwrap();
        let moved = machine.xfer(Needle::front(0), Needle::back(1)).unwrap();
        assert!(machine.loops_on(Needle::front(0)).is_empty());
        assert_eq!(machine.loops_on(Needle::back(1)), moved.as_slice());
        assert!(machine.loop_index_consistent());
    }

    #[test]
    fn test_xfer_same_bed_fails() {
        let (mut machine, _) = machine_with_carrier();
        let err = machine.xfer(Needle::front(0), Needle::front_slider(0)).unwrap_err();
        assert!(matches!(err, MachineError::SameBedXfer { .. }));
    }

    #[test]
    fn test_slider_must_be_clear() {
        let (mut machine, cs) = machine_with_carrier();
        machine.knit(Needle::front(4), &cs).unwrap();
        machine.xfer(Needle::front(4), Needle::back_slider(4)).unwrap();
        let err = machine.knit(Needle::back(4), &cs).unwrap_err();
        assert!(matches!(err, MachineError::SliderNotClear { .. }));
        let err = machine.knit(Needle::back_slider(4), &cs).unwrap_err();
        assert!(matches!(err, MachineError::SliderOperation { .. }));
    }

    #[test]
    fn test_split_moves_and_knits() {
        let (mut machine, cs) = machine_with_carrier();
        let original = machine.knit(Needle::front(5), &cs).unwrap();
        let created = machine.split(Needle::front(5), Needle::back(5), &cs).unwrap();
        assert_eq!(machine.loops_on(Needle::back(5)), original.as_slice());
        assert_eq!(machine.loops_on(Needle::front(5)), created.as_slice());
        assert_eq!(machine.graph().parents_of(created[0]), original);
    }

    #[test]
    fn test_rack_limits() {
        let mut machine = KnittingMachine::new(MachineConfig::default());
        assert!(machine.set_racking(4.25).is_ok());
        assert!(machine.set_racking(-4.25).is_ok());
        assert!(matches!(
            machine.set_racking(4.5),
            Err(MachineError::RackOutOfRange { .. })
        ));
        assert_eq!(machine.racking(), -4.25);
    }

    #[test]
    fn test_inactive_carrier_rejected() {
        let mut machine = KnittingMachine::new(MachineConfig::new(10, 10));
        let err = machine.knit(Needle::front(0), &CarrierSet::single(2)).unwrap_err();
        assert_eq!(err, MachineError::InactiveCarrier { carrier: 2 });
        assert!(machine.loops_on(Needle::front(0)).is_empty());
    }

    #[test]
    fn test_miss_moves_carrier() {
        let (mut machine, cs) = machine_with_carrier();
        machine.miss(Needle::front(9), &cs).unwrap();
        assert_eq!(machine.carrier_system().carrier(1).unwrap().position(), Some(9));
    }
}
