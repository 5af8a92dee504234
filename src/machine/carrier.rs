//! Yarn carriers and the inserting hook
//!
//! Carriers are created with the machine and never destroyed. Each one
//! toggles between parked (inactive) and in the carriage (active), and at
//! most one can be held by the inserting hook at a time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MachineError, Warning};
use crate::knit_graph::LoopId;
use crate::machine::needle::PassDirection;

/// Ordered set of distinct carriers used together for plating
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierSet(Vec<u32>);

impl CarrierSet {
    /// Build a set from ids, keeping first occurrences in order
    ///
    /// Returns the set and a warning for every dropped duplicate.
    pub fn new(ids: impl IntoIterator<Item = u32>) -> (Self, Vec<Warning>) {
        let mut kept: Vec<u32> = Vec::new();
        let mut warnings = Vec::new();
        for id in ids {
            if kept.contains(&id) {
                warnings.push(Warning::DuplicateCarrier { carrier: id });
            } else {
                kept.push(id);
            }
        }
        (Self(kept), warnings)
    }

    pub fn single(id: u32) -> Self {
        Self(vec![id])
    }

    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    /// Compact decimal key used by legacy binary formats: `[1, 2, 3]` is `123`
    pub fn decimal_key(&self) -> u64 {
        self.0
            .iter()
            .rev()
            .enumerate()
            .map(|(i, id)| 10u64.pow(i as u32) * u64::from(*id))
            .sum()
    }

    /// Concatenate two sets, dropping repeats
    pub fn union(&self, other: &CarrierSet) -> (CarrierSet, Vec<Warning>) {
        CarrierSet::new(self.0.iter().chain(other.0.iter()).copied())
    }
}

impl fmt::Display for CarrierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", ids.join(" "))
    }
}

/// A yarn carrier together with the yarn it feeds
#[derive(Debug, Clone, PartialEq)]
pub struct Carrier {
    id: u32,
    active: bool,
    hooked: bool,
    position: Option<i64>,
    loops_since_release: usize,
    yarn: u32,
    loose: bool,
    last_loop: Option<LoopId>,
}

impl Carrier {
    fn new(id: u32) -> Self {
        Self {
            id,
            active: false,
            hooked: false,
            position: None,
            loops_since_release: 0,
            yarn: 0,
            loose: true,
            last_loop: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_hooked(&self) -> bool {
        self.hooked
    }

    /// Last needle position this carrier served
    pub fn position(&self) -> Option<i64> {
        self.position
    }

    pub fn loops_since_release(&self) -> usize {
        self.loops_since_release
    }

    /// Yarn generation; a new yarn starts every time the carrier is cut
    pub fn yarn(&self) -> u32 {
        self.yarn
    }

    /// True while the yarn has not made a loop since it was last cut
    pub fn is_loose(&self) -> bool {
        self.loose
    }

    pub fn last_loop(&self) -> Option<LoopId> {
        self.last_loop
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.hooked = false;
        self.position = None;
        self.loops_since_release = 0;
    }
}

/// All carriers plus the inserting hook
#[derive(Debug, Clone)]
pub struct CarrierSystem {
    carriers: Vec<Carrier>,
    hooked: Option<u32>,
    hook_position: Option<i64>,
    searching_for_position: bool,
    passes_since_releasehook: usize,
    hook_size: i64,
}

impl CarrierSystem {
    pub fn new(carrier_count: u32, hook_size: i64) -> Self {
        Self {
            carriers: (1..=carrier_count).map(Carrier::new).collect(),
            hooked: None,
            hook_position: None,
            searching_for_position: false,
            passes_since_releasehook: 0,
            hook_size,
        }
    }

    pub fn carrier_count(&self) -> u32 {
        self.carriers.len() as u32
    }

    pub fn carrier(&self, id: u32) -> Result<&Carrier, MachineError> {
        id.checked_sub(1)
            .and_then(|i| self.carriers.get(i as usize))
            .ok_or(MachineError::UnknownCarrier {
                carrier: id,
                count: self.carrier_count(),
            })
    }

    fn carrier_mut(&mut self, id: u32) -> Result<&mut Carrier, MachineError> {
        let count = self.carrier_count();
        id.checked_sub(1)
            .and_then(|i| self.carriers.get_mut(i as usize))
            .ok_or(MachineError::UnknownCarrier { carrier: id, count })
    }

    pub fn carriers(&self) -> &[Carrier] {
        &self.carriers
    }

    pub fn hooked_carrier(&self) -> Option<u32> {
        self.hooked
    }

    pub fn hook_position(&self) -> Option<i64> {
        self.hook_position
    }

    pub fn passes_since_releasehook(&self) -> usize {
        self.passes_since_releasehook
    }

    pub fn hook_size(&self) -> i64 {
        self.hook_size
    }

    pub fn active_carriers(&self) -> Vec<u32> {
        self.carriers
            .iter()
            .filter(|c| c.active)
            .map(|c| c.id)
            .collect()
    }

    /// Fail unless every carrier in `carriers` exists and is active
    pub fn ensure_active(&self, carriers: &CarrierSet) -> Result<(), MachineError> {
        for &id in carriers.ids() {
            if !self.carrier(id)?.active {
                return Err(MachineError::InactiveCarrier { carrier: id });
            }
        }
        Ok(())
    }

    /// Bring a carrier in on the inserting hook
    ///
    /// Its hook position is assigned by the first loop it makes.
    pub fn inhook(&mut self, id: u32) -> Result<(), MachineError> {
        if let Some(hooked) = self.hooked {
            return Err(MachineError::InhookWhileHooked {
                carrier: id,
                hooked,
            });
        }
        let carrier = self.carrier_mut(id)?;
        carrier.active = true;
        carrier.hooked = true;
        carrier.loops_since_release = 0;
        self.hooked = Some(id);
        self.hook_position = None;
        self.searching_for_position = true;
        self.passes_since_releasehook = 0;
        Ok(())
    }

    /// Release the carrier held by the inserting hook, returning its id
    pub fn releasehook(&mut self) -> Option<u32> {
        let released = self.hooked.take();
        if let Some(id) = released {
            if let Ok(carrier) = self.carrier_mut(id) {
                carrier.hooked = false;
                carrier.loops_since_release = 0;
            }
        }
        self.hook_position = None;
        self.searching_for_position = false;
        self.passes_since_releasehook = 0;
        released
    }

    /// Activate a carrier without the inserting hook
    ///
    /// Returns a warning when the yarn end is loose and should have been hooked.
    pub fn bring_in(&mut self, id: u32) -> Result<Option<Warning>, MachineError> {
        let carrier = self.carrier_mut(id)?;
        carrier.active = true;
        if carrier.loose {
            Ok(Some(Warning::LooseYarn { carrier: id }))
        } else {
            Ok(None)
        }
    }

    /// Park a carrier at the grippers, keeping its yarn attached
    pub fn out(&mut self, id: u32) -> Result<(), MachineError> {
        if self.hooked == Some(id) {
            self.releasehook();
        }
        self.carrier_mut(id)?.deactivate();
        Ok(())
    }

    /// Park a carrier and cut its yarn
    pub fn outhook(&mut self, id: u32) -> Result<(), MachineError> {
        self.out(id)?;
        let carrier = self.carrier_mut(id)?;
        carrier.yarn += 1;
        carrier.loose = true;
        carrier.last_loop = None;
        Ok(())
    }

    /// Record that carrier `id` made `loop_id` at `position`
    pub fn make_loop(&mut self, id: u32, position: i64, loop_id: LoopId) -> Result<(), MachineError> {
        let carrier = self.carrier_mut(id)?;
        if !carrier.active {
            return Err(MachineError::InactiveCarrier { carrier: id });
        }
        carrier.position = Some(position);
        carrier.loose = false;
        carrier.last_loop = Some(loop_id);
        if carrier.hooked {
            carrier.loops_since_release += 1;
        }
        if self.hooked == Some(id) && self.searching_for_position {
            self.hook_position = Some(position);
            self.searching_for_position = false;
        }
        Ok(())
    }

    /// Move an active carrier to `position` without forming a loop
    pub fn miss(&mut self, id: u32, position: i64) -> Result<(), MachineError> {
        let carrier = self.carrier_mut(id)?;
        if !carrier.active {
            return Err(MachineError::InactiveCarrier { carrier: id });
        }
        carrier.position = Some(position);
        Ok(())
    }

    /// True when working `position` in `direction` would run into the needles
    /// reserved by the inserting hook
    pub fn conflicts_with_inserting_hook(&self, position: i64, direction: PassDirection) -> bool {
        match self.hook_position {
            Some(hook) => match direction {
                PassDirection::Rightward => hook < position && position < hook + self.hook_size,
                PassDirection::Leftward => hook - self.hook_size < position && position < hook,
            },
            None => false,
        }
    }

    /// Count a completed pass that made loops while the hook was held
    pub fn record_pass(&mut self) {
        if self.hooked.is_some() {
            self.passes_since_releasehook += 1;
        }
    }

    /// Recommend releasing the hook once either threshold has been reached
    pub fn try_releasehook(&self, recommended_passes: usize, recommended_loops: usize) -> bool {
        match self.hooked {
            Some(id) => {
                let loops = self
                    .carrier(id)
                    .map(Carrier::loops_since_release)
                    .unwrap_or(0);
                self.passes_since_releasehook >= recommended_passes || loops >= recommended_loops
            }
            None => false,
        }
    }

    /// Check the hook invariants: a hooked carrier is active and only one is hooked
    pub fn is_consistent(&self) -> bool {
        let hooked: Vec<&Carrier> = self.carriers.iter().filter(|c| c.hooked).collect();
        let single = hooked.len() <= 1 && hooked.first().map(|c| c.id) == self.hooked;
        let inactive_clean = self
            .carriers
            .iter()
            .filter(|c| !c.active)
            .all(|c| c.position.is_none() && c.loops_since_release == 0 && !c.hooked);
        single && inactive_clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_key() {
        let (set, warnings) = CarrierSet::new([1, 2, 3]);
        assert_eq!(set.decimal_key(), 123);
        assert!(warnings.is_empty());

        let (set, _) = CarrierSet::new([1, 3, 2]);
        assert_eq!(set.decimal_key(), 132);
    }

    #[test]
    fn test_duplicate_carriers_warn() {
        let (set, warnings) = CarrierSet::new([4, 2, 4]);
        assert_eq!(set.ids(), &[4, 2]);
        assert_eq!(warnings, vec![Warning::DuplicateCarrier { carrier: 4 }]);
        assert_eq!(set.to_string(), "4 2");
    }

    #[test]
    fn test_inhook_release_cycle() {
        let mut system = CarrierSystem::new(10, 5);
        system.inhook(3).unwrap();
        system.make_loop(3, 7, LoopId(0)).unwrap();
        assert_eq!(system.hook_position(), Some(7));
        assert_eq!(system.carrier(3).unwrap().loops_since_release(), 1);

        assert_eq!(system.releasehook(), Some(3));
        let carrier = system.carrier(3).unwrap();
        assert!(carrier.is_active());
        assert!(!carrier.is_hooked());
        assert_eq!(carrier.loops_since_release(), 0);
        assert_eq!(system.hooked_carrier(), None);
        assert!(system.is_consistent());
    }

    #[test]
    fn test_inhook_while_hooked_fails() {
        let mut system = CarrierSystem::new(10, 5);
        system.inhook(1).unwrap();
        let err = system.inhook(2).unwrap_err();
        assert!(matches!(err, MachineError::InhookWhileHooked { carrier: 2, hooked: 1 }));
    }

    #[test]
    fn test_hook_conflict_range() {
        let mut system = CarrierSystem::new(10, 5);
        system.inhook(1).unwrap();
        system.make_loop(1, 10, LoopId(0)).unwrap();
        assert!(system.conflicts_with_inserting_hook(12, PassDirection::Rightward));
        assert!(!system.conflicts_with_inserting_hook(9, PassDirection::Rightward));
        assert!(!system.conflicts_with_inserting_hook(15, PassDirection::Rightward));
        assert!(system.conflicts_with_inserting_hook(8, PassDirection::Leftward));
        assert!(!system.conflicts_with_inserting_hook(12, PassDirection::Leftward));
    }

    #[test]
    fn test_try_releasehook_thresholds() {
        let mut system = CarrierSystem::new(10, 5);
        system.inhook(1).unwrap();
        for i in 0..3 {
            system.make_loop(1, i, LoopId(i as u32)).unwrap();
        }
        system.record_pass();
        assert!(!system.try_releasehook(2, 10));
        system.record_pass();
        assert!(system.try_releasehook(2, 10));
        assert!(system.try_releasehook(5, 3));
    }

    #[test]
    fn test_outhook_cuts_yarn() {
        let mut system = CarrierSystem::new(10, 5);
        system.bring_in(2).unwrap();
        system.make_loop(2, 0, LoopId(0)).unwrap();
        assert!(!system.carrier(2).unwrap().is_loose());
        system.out(2).unwrap();
        assert!(!system.carrier(2).unwrap().is_loose());
        assert_eq!(system.bring_in(2).unwrap(), None);

        system.outhook(2).unwrap();
        let carrier = system.carrier(2).unwrap();
        assert!(!carrier.is_active());
        assert!(carrier.is_loose());
        assert_eq!(carrier.yarn(), 1);
        assert_eq!(carrier.position(), None);
        assert_eq!(system.bring_in(2).unwrap(), Some(Warning::LooseYarn { carrier: 2 }));
    }

    #[test]
    fn test_inactive_carrier_cannot_loop() {
        let mut system = CarrierSystem::new(10, 5);
        let err = system.make_loop(4, 0, LoopId(0)).unwrap_err();
        assert_eq!(err, MachineError::InactiveCarrier { carrier: 4 });
        assert!(system.carrier(11).is_err());
    }
}
