//! One needle bed: main needles, sliders, and the loops they hold

use std::collections::HashMap;

use crate::error::MachineError;
use crate::knit_graph::LoopId;
use crate::machine::needle::{Bed, Needle};

/// The needles and sliders of one side of the machine
///
/// Each needle holds a stack of loops, bottom first. A loop-to-needle index
/// is kept in step with every add and drop.
#[derive(Debug, Clone)]
pub struct NeedleBed {
    bed: Bed,
    needles: Vec<Vec<LoopId>>,
    sliders: Vec<Vec<LoopId>>,
    loop_index: HashMap<LoopId, Needle>,
}

impl NeedleBed {
    pub fn new(bed: Bed, needle_count: usize) -> Self {
        Self {
            bed,
            needles: vec![Vec::new(); needle_count],
            sliders: vec![Vec::new(); needle_count],
            loop_index: HashMap::new(),
        }
    }

    pub fn bed(&self) -> Bed {
        self.bed
    }

    pub fn needle_count(&self) -> usize {
        self.needles.len()
    }

    /// Validate that `needle` addresses this bed
    pub fn check(&self, needle: Needle) -> Result<usize, MachineError> {
        debug_assert_eq!(needle.bed, self.bed);
        if needle.position < 0 || needle.position as usize >= self.needles.len() {
            return Err(MachineError::NeedleOutOfRange {
                needle,
                needle_count: self.needles.len(),
            });
        }
        Ok(needle.position as usize)
    }

    fn stack(&self, needle: Needle) -> Option<&Vec<LoopId>> {
        let slot = self.check(needle).ok()?;
        Some(if needle.is_slider {
            &self.sliders[slot]
        } else {
            &self.needles[slot]
        })
    }

    fn stack_mut(&mut self, needle: Needle) -> Result<&mut Vec<LoopId>, MachineError> {
        let slot = self.check(needle)?;
        Ok(if needle.is_slider {
            &mut self.sliders[slot]
        } else {
            &mut self.needles[slot]
        })
    }

    /// Loops held on `needle`, bottom of the stack first
    pub fn loops(&self, needle: Needle) -> &[LoopId] {
        self.stack(needle).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn holds_loops(&self, needle: Needle) -> bool {
        !self.loops(needle).is_empty()
    }

    /// A main needle is clear when its slider is empty; sliders are always clear
    pub fn is_clear(&self, needle: Needle) -> bool {
        needle.is_slider || self.loops(needle.slider_needle()).is_empty()
    }

    /// Push loops on top of the stack held by `needle`
    ///
    /// With `drop_prior`, the loops already on the needle are dropped first,
    /// which requires the needle to be clear.
    pub fn add_loops(
        &mut self,
        needle: Needle,
        loops: Vec<LoopId>,
        drop_prior: bool,
    ) -> Result<Vec<LoopId>, MachineError> {
        self.check(needle)?;
        if drop_prior {
            if !self.is_clear(needle) {
                return Err(MachineError::SliderNotClear { needle });
            }
            self.drop(needle)?;
        }
        for loop_id in &loops {
            self.loop_index.insert(*loop_id, needle);
        }
        self.stack_mut(needle)?.extend(loops.iter().copied());
        Ok(loops)
    }

    /// Place transferred loops beneath the loops already on `needle`
    pub fn receive_transfer(&mut self, needle: Needle, loops: Vec<LoopId>) -> Result<(), MachineError> {
        for loop_id in &loops {
            self.loop_index.insert(*loop_id, needle);
        }
        let stack = self.stack_mut(needle)?;
        let existing = std::mem::replace(stack, loops);
        stack.extend(existing);
        Ok(())
    }

    /// Remove and return every loop on `needle`
    pub fn drop(&mut self, needle: Needle) -> Result<Vec<LoopId>, MachineError> {
        let loops = std::mem::take(self.stack_mut(needle)?);
        for loop_id in &loops {
            self.loop_index.remove(loop_id);
        }
        Ok(loops)
    }

    pub fn get_needle_of_loop(&self, loop_id: LoopId) -> Option<Needle> {
        self.loop_index.get(&loop_id).copied()
    }

    /// Needles (or sliders) holding loops, in ascending position
    pub fn needles_with_loops(&self, sliders: bool) -> Vec<Needle> {
        let stacks = if sliders { &self.sliders } else { &self.needles };
        stacks
            .iter()
            .enumerate()
            .filter(|(_, stack)| !stack.is_empty())
            .map(|(position, _)| Needle::new(self.bed, position as i64, sliders))
            .collect()
    }

    pub fn loop_count(&self) -> usize {
        self.loop_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_drop_keep_index() {
        let mut bed = NeedleBed::new(Bed::Front, 10);
        let n = Needle::front(3);
        bed.add_loops(n, vec![LoopId(0), LoopId(1)], true).unwrap();
        assert_eq!(bed.loops(n), &[LoopId(0), LoopId(1)]);
        assert_eq!(bed.get_needle_of_loop(LoopId(1)), Some(n));

        let dropped = bed.drop(n).unwrap();
        assert_eq!(dropped, vec![LoopId(0), LoopId(1)]);
        assert_eq!(bed.get_needle_of_loop(LoopId(1)), None);
        assert!(!bed.holds_loops(n));
    }

    #[test]
    fn test_drop_prior_replaces_stack() {
        let mut bed = NeedleBed::new(Bed::Front, 4);
        let n = Needle::front(0);
        bed.add_loops(n, vec![LoopId(0)], true).unwrap();
        bed.add_loops(n, vec![LoopId(1)], true).unwrap();
        assert_eq!(bed.loops(n), &[LoopId(1)]);
        assert_eq!(bed.get_needle_of_loop(LoopId(0)), None);
    }

    #[test]
    fn test_slider_blocks_drop_prior() {
        let mut bed = NeedleBed::new(Bed::Back, 4);
        bed.add_loops(Needle::back_slider(2), vec![LoopId(5)], false).unwrap();
        assert!(!bed.is_clear(Needle::back(2)));
        let err = bed.add_loops(Needle::back(2), vec![LoopId(6)], true).unwrap_err();
        assert!(matches!(err, MachineError::SliderNotClear { .. }));
        // stacking without dropping is allowed
        bed.add_loops(Needle::back(2), vec![LoopId(6)], false).unwrap();
    }

    #[test]
    fn test_receive_transfer_goes_beneath() {
        let mut bed = NeedleBed::new(Bed::Back, 4);
        let n = Needle::back(1);
        bed.add_loops(n, vec![LoopId(9)], false).unwrap();
        bed.receive_transfer(n, vec![LoopId(1), LoopId(2)]).unwrap();
        assert_eq!(bed.loops(n), &[LoopId(1), LoopId(2), LoopId(9)]);
    }

    #[test]
    fn test_out_of_range() {
        let mut bed = NeedleBed::new(Bed::Front, 4);
        assert!(bed.drop(Needle::front(4)).is_err());
        assert!(bed.drop(Needle::front(-1)).is_err());
        assert!(bed.loops(Needle::front(99)).is_empty());
    }
}
