//! Machine settings carried by every lexical scope
//!
//! Direction, carrier, racking, gauge and sheet live here. Reading them is
//! free; setting carrier, racking or sheet emits knitout, and these setters
//! are the only place outside a carriage pass that writes to the stream.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::error::{KnitScriptError, KnitScriptResult, Warning};
use crate::knitout::{format_racking, KnitoutStream, Operation};
use crate::machine::carriage_pass::{CarriagePassSpec, NeedleInstruction, PassResult};
use crate::machine::carrier::CarrierSet;
use crate::machine::knitting_machine::KnittingMachine;
use crate::machine::needle::PassDirection;
use crate::machine::sheet::{GaugedSheetRecord, SheetId};

/// Settings of one scope; children start as a raw copy of their parent
#[derive(Debug, Clone)]
pub struct MachineScope {
    direction: PassDirection,
    carrier: Option<CarrierSet>,
    racking: f64,
    gauge: u32,
    sheet: SheetId,
    /// Shared with the parent until either scope changes gauge
    record: Rc<RefCell<GaugedSheetRecord>>,
}

impl MachineScope {
    pub fn new(needle_count: usize) -> Self {
        Self {
            direction: PassDirection::Leftward,
            carrier: None,
            racking: 0.0,
            gauge: 1,
            sheet: SheetId::default(),
            record: Rc::new(RefCell::new(GaugedSheetRecord::new(1, needle_count))),
        }
    }

    /// Settings for a nested scope, copied without emitting anything
    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn direction(&self) -> PassDirection {
        self.direction
    }

    pub fn carrier(&self) -> Option<&CarrierSet> {
        self.carrier.as_ref()
    }

    pub fn racking(&self) -> f64 {
        self.racking
    }

    pub fn gauge(&self) -> u32 {
        self.gauge
    }

    pub fn sheet(&self) -> SheetId {
        self.sheet
    }

    /// Run `f` against the layer record of this scope's gauge
    pub fn with_record<T>(&self, f: impl FnOnce(&mut GaugedSheetRecord) -> T) -> T {
        f(&mut self.record.borrow_mut())
    }

    pub fn set_direction(&mut self, direction: PassDirection) {
        self.direction = direction;
    }

    /// Select the working carriers, bringing in any that are parked
    ///
    /// A carrier with a loose yarn end goes in on the inserting hook, which
    /// is released first if another carrier holds it. Machines configured
    /// without the hook bring it in directly with a `Loose_Yarn` warning.
    pub fn set_carrier(
        &mut self,
        carrier: Option<CarrierSet>,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> KnitScriptResult<()> {
        if let Some(set) = &carrier {
            for &id in set.ids() {
                let (active, loose) = {
                    let state = machine.carrier_system().carrier(id)?;
                    (state.is_active(), state.is_loose())
                };
                if active {
                    continue;
                }
                if loose && machine.config().inserting_hook {
                    if let Some(hooked) = machine.carrier_system_mut().releasehook() {
                        knitout.push_with_comment(
                            Operation::Releasehook(CarrierSet::single(hooked)),
                            format!("release carrier {} to inhook carrier {}", hooked, id),
                        );
                    }
                    machine.carrier_system_mut().inhook(id)?;
                    knitout.push_with_comment(
                        Operation::Inhook(CarrierSet::single(id)),
                        format!("bring in carrier {}", id),
                    );
                } else {
                    if let Some(warning) = machine.carrier_system_mut().bring_in(id)? {
                        machine.push_warning(warning);
                    }
                    knitout.push(Operation::In(CarrierSet::single(id)));
                }
            }
        }
        debug!(
            target: "knit_script::scope",
            carrier = ?carrier.as_ref().map(CarrierSet::ids),
            "set carrier"
        );
        self.carrier = carrier;
        Ok(())
    }

    /// Set the racking in sheet-local needles; the machine racks `gauge * racking`
    pub fn set_racking(
        &mut self,
        racking: f64,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> KnitScriptResult<()> {
        let actual = f64::from(self.gauge) * racking;
        machine.validate_racking(actual)?;
        self.racking = racking;
        if machine.racking() != actual {
            machine.set_racking(actual)?;
            knitout.push_with_comment(
                Operation::Rack(actual),
                format!(
                    "racking {} at gauge {}",
                    format_racking(racking),
                    self.gauge
                ),
            );
        }
        Ok(())
    }

    /// Change gauge, starting a fresh layer record
    ///
    /// A sheet that no longer exists is clamped to the last sheet.
    pub fn set_gauge(&mut self, gauge: i64, machine: &mut KnittingMachine) -> KnitScriptResult<()> {
        let gauge = u32::try_from(gauge)
            .ok()
            .filter(|g| *g >= 1)
            .ok_or_else(|| KnitScriptError::value_error(format!("gauge {} must be at least 1", gauge)))?;
        if gauge == self.gauge {
            return Ok(());
        }
        self.record = Rc::new(RefCell::new(GaugedSheetRecord::new(
            gauge,
            machine.needle_count(),
        )));
        let mut sheet = self.sheet.sheet;
        if sheet >= gauge {
            machine.push_warning(Warning::SheetBeyondGauge { sheet, gauge });
            sheet = gauge - 1;
        }
        self.gauge = gauge;
        self.sheet = SheetId::new(sheet, gauge);
        debug!(target: "knit_script::scope", gauge, sheet, "set gauge");
        Ok(())
    }

    /// Make `sheet` the working sheet, peeling the others out of its way
    pub fn set_sheet(
        &mut self,
        sheet: i64,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> KnitScriptResult<()> {
        let mut sheet = u32::try_from(sheet)
            .map_err(|_| KnitScriptError::value_error(format!("sheet {} cannot be negative", sheet)))?;
        if sheet >= self.gauge {
            machine.push_warning(Warning::SheetBeyondGauge {
                sheet,
                gauge: self.gauge,
            });
            sheet = self.gauge - 1;
        }
        if sheet == self.sheet.sheet {
            return Ok(());
        }
        self.sheet = SheetId::new(sheet, self.gauge);
        self.reset_sheet(machine, knitout)?;
        Ok(())
    }

    /// Emit the transfers that bring the current sheet to the working position
    pub fn reset_sheet(
        &self,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> KnitScriptResult<PassResult> {
        knitout.push_comment(format!("Resetting to sheet {} of {}", self.sheet, self.gauge));
        let reset = self
            .record
            .borrow_mut()
            .reset_to_sheet(self.sheet.sheet, machine);
        let mut result = PassResult::default();
        for (transfers, label) in [
            (reset.returns, "return loops to their home beds"),
            (reset.peels, "stack other sheets out of the way"),
        ] {
            let mut pass = CarriagePassSpec::new(None, None);
            pass.racking = Some(0.0);
            pass.comment = Some(label.to_string());
            for (from, to) in transfers {
                pass.add_with_target(from, NeedleInstruction::Xfer, to)?;
            }
            let done = pass.execute(machine, knitout)?;
            result.transfers.extend(done.transfers);
            result.direction = done.direction.or(result.direction);
        }
        Ok(result)
    }

    /// Leave this scope, handing its settings back to `parent`
    ///
    /// Direction propagates. The layer record is adopted when the gauges
    /// match, and the parent's sheet is restored if the child moved away
    /// from it. The parent's racking is written back through its setter.
    pub fn exit_into(
        self,
        parent: &mut MachineScope,
        machine: &mut KnittingMachine,
        knitout: &mut KnitoutStream,
    ) -> KnitScriptResult<()> {
        parent.direction = self.direction;
        if parent.gauge == self.gauge {
            parent.record = self.record;
            if parent.sheet != self.sheet {
                parent.reset_sheet(machine, knitout)?;
            }
        }
        let racking = parent.racking;
        parent.set_racking(racking, machine, knitout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::machine::needle::Needle;

    fn setup() -> (MachineScope, KnittingMachine, KnitoutStream) {
        let config = MachineConfig::new(20, 4);
        let stream = KnitoutStream::new(&config);
        (MachineScope::new(20), KnittingMachine::new(config), stream)
    }

    #[test]
    fn test_carrier_setter_hooks_loose_yarn() {
        let (mut scope, mut machine, mut knitout) = setup();
        scope
            .set_carrier(Some(CarrierSet::single(1)), &mut machine, &mut knitout)
            .unwrap();
        scope
            .set_carrier(Some(CarrierSet::single(2)), &mut machine, &mut knitout)
            .unwrap();
        assert_eq!(
            knitout.operation_lines(),
            vec!["inhook 1", "releasehook 1", "inhook 2"]
        );
        assert_eq!(machine.carrier_system().hooked_carrier(), Some(2));
    }

    #[test]
    fn test_carrier_setter_without_hook_warns_loose_yarn() {
        let config = MachineConfig {
            inserting_hook: false,
            ..MachineConfig::new(20, 4)
        };
        let mut knitout = KnitoutStream::new(&config);
        let mut machine = KnittingMachine::new(config);
        let mut scope = MachineScope::new(20);
        scope
            .set_carrier(Some(CarrierSet::single(3)), &mut machine, &mut knitout)
            .unwrap();
        assert_eq!(knitout.operation_lines(), vec!["in 3"]);
        assert_eq!(machine.carrier_system().hooked_carrier(), None);
        assert!(machine.carrier_system().carrier(3).unwrap().is_active());
        assert_eq!(machine.take_warnings(), vec![Warning::LooseYarn { carrier: 3 }]);
    }

    #[test]
    fn test_racking_scales_with_gauge() {
        let (mut scope, mut machine, mut knitout) = setup();
        scope.set_gauge(2, &mut machine).unwrap();
        scope.set_racking(1.0, &mut machine, &mut knitout).unwrap();
        assert_eq!(machine.racking(), 2.0);
        assert_eq!(knitout.operation_lines(), vec!["rack 2"]);
        // no change, no emission
        scope.set_racking(1.0, &mut machine, &mut knitout).unwrap();
        assert_eq!(knitout.len(), 1);
        let err = scope.set_racking(3.0, &mut machine, &mut knitout).unwrap_err();
        assert_eq!(err.type_name(), "Valid_Rack_Error");
    }

    #[test]
    fn test_gauge_clamps_sheet() {
        let (mut scope, mut machine, mut knitout) = setup();
        scope.set_gauge(3, &mut machine).unwrap();
        scope.set_sheet(2, &mut machine, &mut knitout).unwrap();
        scope.set_gauge(2, &mut machine).unwrap();
        assert_eq!(scope.sheet(), SheetId::new(1, 2));
        assert_eq!(
            machine.take_warnings(),
            vec![Warning::SheetBeyondGauge { sheet: 2, gauge: 2 }]
        );
        assert!(scope.set_gauge(0, &mut machine).is_err());
    }

    #[test]
    fn test_child_exit_restores_racking_and_keeps_direction() {
        let (mut parent, mut machine, mut knitout) = setup();
        let mut child = parent.child();
        child.set_direction(PassDirection::Rightward);
        child.set_racking(-1.0, &mut machine, &mut knitout).unwrap();
        child.exit_into(&mut parent, &mut machine, &mut knitout).unwrap();
        assert_eq!(parent.direction(), PassDirection::Rightward);
        assert_eq!(machine.racking(), 0.0);
        assert_eq!(knitout.operation_lines(), vec!["rack -1", "rack 0"]);
    }

    #[test]
    fn test_child_gauge_change_keeps_parent_record() {
        let (mut parent, mut machine, mut knitout) = setup();
        parent.set_gauge(2, &mut machine).unwrap();
        let mut child = parent.child();
        child.set_gauge(4, &mut machine).unwrap();
        child.with_record(|record| record.set_to_back(0)).unwrap();
        child.exit_into(&mut parent, &mut machine, &mut knitout).unwrap();
        assert_eq!(parent.gauge(), 2);
        assert_eq!(parent.with_record(|record| record.gauge()), 2);
        assert_eq!(parent.with_record(|record| record.layer(0)).unwrap(), 0);
    }

    #[test]
    fn test_sheet_change_emits_reset() {
        let (mut scope, mut machine, mut knitout) = setup();
        scope
            .set_carrier(Some(CarrierSet::single(1)), &mut machine, &mut knitout)
            .unwrap();
        scope.set_gauge(2, &mut machine).unwrap();
        machine.knit(Needle::front(0), &CarrierSet::single(1)).unwrap();
        machine.knit(Needle::front(1), &CarrierSet::single(1)).unwrap();
        scope.set_sheet(1, &mut machine, &mut knitout).unwrap();
        assert_eq!(machine.loops_on(Needle::front(1)).len(), 1);
        scope.set_sheet(0, &mut machine, &mut knitout).unwrap();
        let text = knitout.to_knitout();
        assert!(text.contains("; Resetting to sheet s0:g2 of 2"));
        assert!(text.contains("; stack other sheets out of the way\nxfer f1 b1"));
        assert!(!text.contains("; return loops to their home beds"));
        assert!(machine.loops_on(Needle::front(1)).is_empty());
        assert_eq!(machine.loops_on(Needle::back(1)).len(), 1);
    }
}
