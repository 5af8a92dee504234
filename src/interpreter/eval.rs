//! Statement execution and expression evaluation
//!
//! The [`Interpreter`] walks the syntax tree against one simulated machine.
//! Names resolve in a fixed order: the reserved machine variables, the
//! needle sets of the current sheet, the host environment, and finally the
//! frames of the [`ScopeStack`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::ast::{
    AssignTarget, BinaryOp, DirectionKeyword, Expr, FStringPart, InstructionLine, Location,
    PushKind, Side, Statement, StatementKind, SwapKind, XferRacking,
};
use crate::config::InterpreterOptions;
use crate::error::{KnitScriptError, KnitScriptResult, LocatedWarning, MachineError, Warning};
use crate::interpreter::builtins;
use crate::interpreter::machine_scope::MachineScope;
use crate::interpreter::scope::{FrameKind, ScopeStack};
use crate::interpreter::value::{binary_op, new_namespace, unary_op, Function, Module, Value};
use crate::interpreter::InterpretOutput;
use crate::knitout::{KnitoutStream, Operation};
use crate::machine::carriage_pass::{CarriagePassSpec, NeedleInstruction, PassResult};
use crate::machine::carrier::CarrierSet;
use crate::machine::knitting_machine::KnittingMachine;
use crate::machine::needle::{Bed, Needle, PassDirection};
use crate::machine::sheet::SheetId;
use crate::parser;

/// Deepest chain of user function calls before the program is stopped
const MAX_CALL_DEPTH: usize = 128;

/// Names bound to machine state rather than to a frame
const MACHINE_VARIABLES: [&str; 5] = ["Carrier", "Racking", "Gauge", "Sheet", "Direction"];

/// Executes KnitScript programs against a simulated knitting machine
pub struct Interpreter {
    options: InterpreterOptions,
    machine: KnittingMachine,
    knitout: KnitoutStream,
    scopes: ScopeStack,
    /// Builtins and injected host values, consulted before any frame
    host: HashMap<String, Value>,
    printed: Vec<String>,
    warnings: Vec<LocatedWarning>,
    /// Warnings raised by expression evaluation, awaiting a location
    pending: Vec<Warning>,
    last_pass: Vec<(Needle, Option<Needle>)>,
    /// Directory of each source being run, innermost import last
    source_dirs: Vec<PathBuf>,
    call_depth: usize,
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        let machine = KnittingMachine::new(options.machine.clone());
        let knitout = KnitoutStream::new(&options.machine);
        let scopes = ScopeStack::new(MachineScope::new(machine.needle_count()));
        Self {
            options,
            machine,
            knitout,
            scopes,
            host: builtins::environment(),
            printed: Vec::new(),
            warnings: Vec::new(),
            pending: Vec::new(),
            last_pass: Vec::new(),
            source_dirs: Vec::new(),
            call_depth: 0,
        }
    }

    /// Make a host value visible to programs under `name`
    pub fn inject(&mut self, name: impl Into<String>, value: Value) {
        self.host.insert(name.into(), value);
    }

    /// Parse and run a program; `file` names it in errors and anchors imports
    pub fn run_source(&mut self, source: &str, file: Option<&Path>) -> KnitScriptResult<()> {
        let name: Option<Arc<str>> = file.map(|path| Arc::from(path.display().to_string()));
        let dir = file
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        info!(
            target: "knit_script::interpreter",
            file = name.as_deref().unwrap_or("<source>"),
            "running program"
        );
        let result = parser::parse(source, name).and_then(|program| {
            self.source_dirs.push(dir);
            let result = self.exec_block(&program.statements);
            self.source_dirs.pop();
            result
        });
        match result {
            Ok(()) => {
                info!(
                    target: "knit_script::interpreter",
                    lines = self.knitout.len(),
                    warnings = self.warnings.len(),
                    "program finished"
                );
                Ok(())
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    pub fn run_file(&mut self, path: impl AsRef<Path>) -> KnitScriptResult<()> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| {
            KnitScriptError::import_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.run_source(&source, Some(path))
    }

    pub fn knitout(&self) -> &KnitoutStream {
        &self.knitout
    }

    pub fn machine(&self) -> &KnittingMachine {
        &self.machine
    }

    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    pub fn warnings(&self) -> &[LocatedWarning] {
        &self.warnings
    }

    /// Value of a top-level `return`, if the program ended with one
    pub fn exit_value(&self) -> Option<&Value> {
        self.scopes.exit_value()
    }

    pub fn into_output(mut self) -> InterpretOutput {
        InterpretOutput {
            exit_value: self.scopes.take_exit_value(),
            knitout: self.knitout,
            machine: self.machine,
            printed: self.printed,
            warnings: self.warnings,
        }
    }

    /// Wind down after an uncaught error and hand the error back
    fn fail(&mut self, error: KnitScriptError) -> KnitScriptError {
        warn!(target: "knit_script::interpreter", error = %error, "program failed");
        self.cut_active_carriers();
        self.knitout.push_comment(format!(
            "Knit Script stopped on {}: {}",
            error.type_name(),
            error.message()
        ));
        if let Some(path) = &self.options.error_dump {
            match fs::write(path, self.knitout.to_knitout()) {
                Ok(()) => debug!(
                    target: "knit_script::interpreter",
                    path = %path.display(),
                    "wrote partial knitout"
                ),
                Err(e) => warn!(
                    target: "knit_script::interpreter",
                    path = %path.display(),
                    error = %e,
                    "could not write partial knitout"
                ),
            }
        }
        error
    }

    fn cut_active_carriers(&mut self) {
        if let Some(hooked) = self.machine.carrier_system_mut().releasehook() {
            self.knitout
                .push(Operation::Releasehook(CarrierSet::single(hooked)));
        }
        let cut: Vec<u32> = self
            .machine
            .carrier_system()
            .active_carriers()
            .into_iter()
            .filter(|&id| self.machine.carrier_system_mut().outhook(id).is_ok())
            .collect();
        if !cut.is_empty() {
            let (set, _) = CarrierSet::new(cut);
            self.knitout.push(Operation::Outhook(set));
        }
    }

    fn collect_warnings(&mut self, location: &Location) {
        let mut raised = std::mem::take(&mut self.pending);
        raised.extend(self.machine.take_warnings());
        raised.extend(self.scopes.take_warnings());
        for warning in raised {
            warn!(
                target: "knit_script::warning",
                kind = warning.type_name(),
                "{}: {}",
                location,
                warning
            );
            self.warnings.push(LocatedWarning {
                warning,
                location: Some(location.clone()),
            });
        }
    }

    fn gauge(&self) -> u32 {
        self.scopes.machine().gauge()
    }

    /// Run `body` in a fresh frame, closing the frame even when `body` fails
    fn in_scope<T>(
        &mut self,
        kind: FrameKind,
        body: impl FnOnce(&mut Self) -> KnitScriptResult<T>,
    ) -> KnitScriptResult<T> {
        self.scopes.push(kind);
        let result = body(self);
        let closed = self.exit_scope();
        let value = result?;
        closed?;
        Ok(value)
    }

    fn exit_scope(&mut self) -> KnitScriptResult<()> {
        match self.scopes.pop() {
            Some(frame) => frame.into_machine().exit_into(
                self.scopes.machine_mut(),
                &mut self.machine,
                &mut self.knitout,
            ),
            None => Ok(()),
        }
    }

    fn exec_block(&mut self, statements: &[Statement]) -> KnitScriptResult<()> {
        for statement in statements {
            self.exec_statement(statement)?;
            if self.scopes.is_returning() {
                break;
            }
        }
        Ok(())
    }

    fn exec_statement(&mut self, statement: &Statement) -> KnitScriptResult<()> {
        trace!(
            target: "knit_script::eval",
            line = statement.location.line,
            source = %statement.location.excerpt,
            "statement"
        );
        let result = self.exec_kind(&statement.kind);
        self.collect_warnings(&statement.location);
        result.map_err(|e| e.located(&statement.location))
    }

    fn exec_kind(&mut self, kind: &StatementKind) -> KnitScriptResult<()> {
        match kind {
            StatementKind::Assignment { targets, value } => {
                let value = self.eval(value)?;
                if let [target] = targets.as_slice() {
                    return self.assign(target, value);
                }
                let items = unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            StatementKind::Declaration { name, value } => {
                let value = self.eval(value)?;
                self.scopes.set_global(name, value);
                Ok(())
            }
            StatementKind::Expression(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            StatementKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                match otherwise {
                    Some(body) => self.exec_block(body),
                    None => Ok(()),
                }
            }
            StatementKind::While { condition, body } => {
                while self.eval(condition)?.is_truthy() {
                    self.exec_block(body)?;
                    if self.scopes.is_returning() {
                        break;
                    }
                }
                Ok(())
            }
            StatementKind::For {
                variables,
                iterable,
                body,
            } => {
                let items = self.eval(iterable)?.iterate()?;
                self.in_scope(FrameKind::Block, |this| {
                    for item in items {
                        this.bind_variables(variables, item)?;
                        this.exec_block(body)?;
                        if this.scopes.is_returning() {
                            break;
                        }
                    }
                    Ok(())
                })
            }
            StatementKind::Try {
                body,
                filters,
                binding,
                handler,
            } => match self.exec_block(body) {
                Ok(()) => Ok(()),
                Err(error)
                    if filters.is_empty() || filters.iter().any(|f| error.matches_filter(f)) =>
                {
                    debug!(
                        target: "knit_script::eval",
                        error = error.type_name(),
                        "caught error"
                    );
                    if let Some(name) = binding {
                        self.scopes.set_local(name, Value::Error(Rc::new(error)));
                    }
                    self.exec_block(handler)
                }
                Err(error) => Err(error),
            },
            StatementKind::With { assignments, body } => self.in_scope(FrameKind::Block, |this| {
                for (name, expr) in assignments {
                    let value = this.eval(expr)?;
                    if MACHINE_VARIABLES.contains(&name.as_str()) {
                        this.assign_machine_variable(name, &value)?;
                    } else {
                        this.scopes.define(name, value);
                    }
                }
                this.exec_block(body)
            }),
            StatementKind::FunctionDef { name, params, body } => {
                let defaults = params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d)).transpose())
                    .collect::<KnitScriptResult<Vec<_>>>()?;
                let function = Function {
                    name: name.clone(),
                    params: params.iter().map(|p| p.name.clone()).collect(),
                    defaults,
                    body: Rc::clone(body),
                    module: self.scopes.current_module(),
                };
                self.scopes.set_local(name, Value::Function(Rc::new(function)));
                Ok(())
            }
            StatementKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                self.scopes.set_return(value);
                Ok(())
            }
            StatementKind::Print(expr) => {
                let text = self.eval(expr)?.to_string();
                self.print(text);
                Ok(())
            }
            StatementKind::Assert { condition, message } => {
                if self.eval(condition)?.is_truthy() {
                    return Ok(());
                }
                let message = match message {
                    Some(expr) => self.eval(expr)?.to_string(),
                    None => "condition evaluated to False".to_string(),
                };
                Err(KnitScriptError::assertion(message))
            }
            StatementKind::Pause => {
                self.knitout.push(Operation::Pause);
                Ok(())
            }
            StatementKind::Import { path, alias } => self.import(path, alias.as_deref()),
            StatementKind::Cut(carriers) => self.take_out(carriers, true),
            StatementKind::Remove(carriers) => self.take_out(carriers, false),
            StatementKind::ReleaseHook => {
                if let Some(hooked) = self.machine.carrier_system_mut().releasehook() {
                    self.knitout
                        .push(Operation::Releasehook(CarrierSet::single(hooked)));
                }
                Ok(())
            }
            StatementKind::Push { needles, push } => self.push_layers(needles, push),
            StatementKind::Swap { needles, swap } => self.swap_layers(needles, swap),
            StatementKind::DropPass(needles) => {
                let needles = self.eval_needles(needles)?;
                let mut pass = CarriagePassSpec::new(Some(PassDirection::Rightward), None);
                for needle in needles {
                    pass.add(needle, NeedleInstruction::Drop)?;
                }
                self.last_pass = self.run_pass(&pass)?.transfers;
                Ok(())
            }
            StatementKind::XferPass {
                needles,
                racking,
                target_bed,
                to_sliders,
                split,
            } => self.xfer_pass(needles, racking, *target_bed, *to_sliders, split.as_ref()),
            StatementKind::InDirection { direction, lines } => self.in_direction(direction, lines),
            StatementKind::Block(statements) => {
                self.in_scope(FrameKind::Block, |this| this.exec_block(statements))
            }
        }
    }

    fn print(&mut self, text: String) {
        info!(target: "knit_script::print", "{}", text);
        if text.is_empty() {
            self.knitout.push_comment("KS:");
        }
        for line in text.lines() {
            self.knitout.push_comment(format!("KS: {}", line));
        }
        self.printed.push(text);
    }

    // ---- assignment ----

    fn assign(&mut self, target: &AssignTarget, value: Value) -> KnitScriptResult<()> {
        match target {
            AssignTarget::Name(name) if MACHINE_VARIABLES.contains(&name.as_str()) => {
                self.assign_machine_variable(name, &value)
            }
            AssignTarget::Name(name) => {
                self.scopes.set_local(name, value);
                Ok(())
            }
            AssignTarget::Index { name, index } => {
                let container = self.lookup(name)?;
                let index = self.eval(index)?;
                container.set_item(index, value)
            }
        }
    }

    /// Route an assignment to a reserved name through its machine setter
    fn assign_machine_variable(&mut self, name: &str, value: &Value) -> KnitScriptResult<()> {
        match name {
            "Carrier" => {
                let carriers = self.carrier_set(value)?;
                self.scopes
                    .machine_mut()
                    .set_carrier(carriers, &mut self.machine, &mut self.knitout)
            }
            "Racking" => {
                let racking = value.as_float().ok_or_else(|| {
                    KnitScriptError::type_error(format!(
                        "Racking must be a number, not '{}'",
                        value.type_name()
                    ))
                })?;
                self.scopes
                    .machine_mut()
                    .set_racking(racking, &mut self.machine, &mut self.knitout)
            }
            "Gauge" => {
                let gauge = value.expect_int("Gauge")?;
                self.scopes.machine_mut().set_gauge(gauge, &mut self.machine)
            }
            "Sheet" => {
                let sheet = match value {
                    Value::Sheet(sheet) => {
                        self.scopes
                            .machine_mut()
                            .set_gauge(i64::from(sheet.gauge), &mut self.machine)?;
                        i64::from(sheet.sheet)
                    }
                    other => other.expect_int("Sheet")?,
                };
                self.scopes
                    .machine_mut()
                    .set_sheet(sheet, &mut self.machine, &mut self.knitout)
            }
            "Direction" => match value {
                Value::Direction(direction) => {
                    self.scopes.machine_mut().set_direction(*direction);
                    Ok(())
                }
                other => Err(KnitScriptError::type_error(format!(
                    "Direction must be Leftward or Rightward, not '{}'",
                    other.type_name()
                ))),
            },
            _ => Err(KnitScriptError::name_error(format!(
                "'{}' is not a machine variable",
                name
            ))),
        }
    }

    fn bind_variables(&mut self, variables: &[String], value: Value) -> KnitScriptResult<()> {
        if let [name] = variables {
            self.scopes.define(name, value);
            return Ok(());
        }
        let items = unpack(&value, variables.len())?;
        for (name, item) in variables.iter().zip(items) {
            self.scopes.define(name, item);
        }
        Ok(())
    }

    /// Coerce a value to a carrier set; `None` and empty sequences clear it
    fn carrier_set(&mut self, value: &Value) -> KnitScriptResult<Option<CarrierSet>> {
        let items = match value {
            Value::None => return Ok(None),
            Value::Carrier(set) => return Ok(Some(set.clone())),
            Value::List(_) | Value::Tuple(_) => value.iterate()?,
            other => vec![other.clone()],
        };
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Carrier(set) => ids.extend_from_slice(set.ids()),
                Value::Int(id) => {
                    let id = u32::try_from(id).ok().filter(|id| *id >= 1).ok_or_else(|| {
                        KnitScriptError::value_error(format!("carrier {} does not exist", id))
                    })?;
                    ids.push(id);
                }
                other => {
                    return Err(KnitScriptError::type_error(format!(
                        "expected a carrier, got '{}'",
                        other.type_name()
                    )))
                }
            }
        }
        let (set, warnings) = CarrierSet::new(ids);
        self.pending.extend(warnings);
        Ok((!set.is_empty()).then_some(set))
    }

    // ---- name resolution ----

    fn lookup(&mut self, name: &str) -> KnitScriptResult<Value> {
        if let Some(value) = self.machine_variable(name) {
            return Ok(value);
        }
        if let Some(value) = self.needle_set(name) {
            return Ok(value);
        }
        if let Some(value) = self.host.get(name) {
            return Ok(value.clone());
        }
        self.scopes
            .get(name)
            .ok_or_else(|| KnitScriptError::name_error(format!("name '{}' is not defined", name)))
    }

    fn machine_variable(&self, name: &str) -> Option<Value> {
        let scope = self.scopes.machine();
        Some(match name {
            "Carrier" => scope.carrier().cloned().map_or(Value::None, Value::Carrier),
            "Racking" => {
                let racking = scope.racking();
                if racking.fract() == 0.0 {
                    Value::Int(racking as i64)
                } else {
                    Value::Float(racking)
                }
            }
            "Gauge" => Value::Int(i64::from(scope.gauge())),
            "Sheet" => Value::Sheet(scope.sheet()),
            "Direction" => Value::Direction(scope.direction()),
            _ => return None,
        })
    }

    /// Needle sets restricted to the current sheet
    fn needle_set(&self, name: &str) -> Option<Value> {
        let sheet = self.scopes.machine().sheet();
        let needle_count = self.machine.needle_count() as i64;
        let needles = |bed: Bed, slider: bool| -> Vec<Needle> {
            (i64::from(sheet.sheet)..needle_count)
                .step_by(sheet.gauge as usize)
                .map(|p| Needle::new(bed, p, slider))
                .collect()
        };
        let loaded = |bed: Bed, slider: bool| -> Vec<Needle> {
            needles(bed, slider)
                .into_iter()
                .filter(|n| !self.machine.loops_on(*n).is_empty())
                .collect()
        };
        let set = match name {
            "Front_Needles" => needles(Bed::Front, false),
            "Back_Needles" => needles(Bed::Back, false),
            "Needles" => [needles(Bed::Front, false), needles(Bed::Back, false)].concat(),
            "Front_Sliders" => needles(Bed::Front, true),
            "Back_Sliders" => needles(Bed::Back, true),
            "Sliders" => [needles(Bed::Front, true), needles(Bed::Back, true)].concat(),
            "Front_Loops" => loaded(Bed::Front, false),
            "Back_Loops" => loaded(Bed::Back, false),
            "Loops" => [loaded(Bed::Front, false), loaded(Bed::Back, false)].concat(),
            "Front_Slider_Loops" => loaded(Bed::Front, true),
            "Back_Slider_Loops" => loaded(Bed::Back, true),
            "Slider_Loops" => [loaded(Bed::Front, true), loaded(Bed::Back, true)].concat(),
            "Last_Pass" => {
                let entries = self
                    .last_pass
                    .iter()
                    .map(|(needle, target)| {
                        (
                            Value::Needle(*needle),
                            target.map_or(Value::None, Value::Needle),
                        )
                    })
                    .collect();
                return Some(Value::dict(entries));
            }
            _ => return None,
        };
        Some(Value::list(set.into_iter().map(Value::Needle).collect()))
    }

    // ---- expressions ----

    pub fn eval(&mut self, expr: &Expr) -> KnitScriptResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(literal) => text.push_str(literal),
                        FStringPart::Expr(expr) => text.push_str(&self.eval(expr)?.to_string()),
                    }
                }
                Ok(Value::Str(text))
            }
            Expr::Variable(name) => self.lookup(name),
            Expr::Needle(local) => Ok(Value::Needle(
                self.scopes.machine().sheet().actual_needle(*local),
            )),
            Expr::Carrier(id) => Ok(Value::Carrier(CarrierSet::single(*id))),
            Expr::Sheet { sheet, gauge } => {
                let gauge = gauge.unwrap_or_else(|| self.gauge());
                if *sheet >= gauge {
                    return Err(KnitScriptError::value_error(format!(
                        "sheet {} does not exist in gauge {}",
                        sheet, gauge
                    )));
                }
                Ok(Value::Sheet(SheetId::new(*sheet, gauge)))
            }
            Expr::Direction(keyword) => Ok(Value::Direction(self.direction(*keyword))),
            Expr::Instruction(instruction) => Ok(Value::Instruction(*instruction)),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let dict = Value::dict(Vec::with_capacity(entries.len()));
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.set_item(key, value)?;
                }
                Ok(dict)
            }
            Expr::ListComprehension {
                element,
                variables,
                iterable,
                condition,
            } => {
                let items = self.eval(iterable)?.iterate()?;
                self.in_scope(FrameKind::Block, |this| {
                    let mut out = Vec::new();
                    for item in items {
                        this.bind_variables(variables, item)?;
                        if let Some(condition) = condition {
                            if !this.eval(condition)?.is_truthy() {
                                continue;
                            }
                        }
                        out.push(this.eval(element)?);
                    }
                    Ok(Value::list(out))
                })
            }
            Expr::DictComprehension {
                key,
                value,
                variables,
                iterable,
                condition,
            } => {
                let items = self.eval(iterable)?.iterate()?;
                self.in_scope(FrameKind::Block, |this| {
                    let dict = Value::dict(Vec::new());
                    for item in items {
                        this.bind_variables(variables, item)?;
                        if let Some(condition) = condition {
                            if !this.eval(condition)?.is_truthy() {
                                continue;
                            }
                        }
                        let k = this.eval(key)?;
                        let v = this.eval(value)?;
                        dict.set_item(k, v)?;
                    }
                    Ok(dict)
                })
            }
            Expr::Call {
                function,
                args,
                kwargs,
            } => self.eval_call(function, args, kwargs),
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                builtins::get_attribute(&object, name, self.gauge())
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                object.index(&index)
            }
            Expr::Slice {
                object,
                start,
                stop,
                step,
            } => {
                let object = self.eval(object)?;
                let start = self.eval_bound(start.as_deref())?;
                let stop = self.eval_bound(stop.as_deref())?;
                let step = self.eval_bound(step.as_deref())?;
                object.slice(start, stop, step)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                unary_op(*op, &operand)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                match op {
                    BinaryOp::And if !left.is_truthy() => Ok(left),
                    BinaryOp::Or if left.is_truthy() => Ok(left),
                    BinaryOp::And | BinaryOp::Or => self.eval(right),
                    _ => {
                        let right = self.eval(right)?;
                        let gauge = self.gauge();
                        binary_op(*op, &left, &right, gauge, &mut self.pending)
                    }
                }
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> KnitScriptResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_bound(&mut self, expr: Option<&Expr>) -> KnitScriptResult<Option<i64>> {
        match expr {
            Some(expr) => match self.eval(expr)? {
                Value::None => Ok(None),
                value => value.expect_int("slice index").map(Some),
            },
            None => Ok(None),
        }
    }

    fn direction(&self, keyword: DirectionKeyword) -> PassDirection {
        let current = self.scopes.machine().direction();
        match keyword {
            DirectionKeyword::Leftward | DirectionKeyword::Decreasing => PassDirection::Leftward,
            DirectionKeyword::Rightward | DirectionKeyword::Increasing => PassDirection::Rightward,
            DirectionKeyword::Current => current,
            DirectionKeyword::Reverse => current.opposite(),
        }
    }

    // ---- calls ----

    fn eval_call(
        &mut self,
        function: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> KnitScriptResult<Value> {
        let callee = match function {
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                if !matches!(object, Value::Module(_)) {
                    if let Some((key, _)) = kwargs.first() {
                        return Err(KnitScriptError::name_error(format!(
                            "{}() got an unexpected keyword argument '{}'",
                            name, key
                        )));
                    }
                    let args = self.eval_all(args)?;
                    return builtins::call_method(&object, name, args, self.gauge());
                }
                builtins::get_attribute(&object, name, self.gauge())?
            }
            other => self.eval(other)?,
        };
        let args = self.eval_all(args)?;
        let kwargs = kwargs
            .iter()
            .map(|(key, expr)| -> KnitScriptResult<(String, Value)> {
                Ok((key.clone(), self.eval(expr)?))
            })
            .collect::<KnitScriptResult<Vec<_>>>()?;
        self.call_value(callee, args, kwargs)
    }

    /// Call a function or builtin value with evaluated arguments
    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> KnitScriptResult<Value> {
        match callee {
            Value::Builtin(builtin) => builtins::call_builtin(builtin, args, kwargs),
            Value::Function(function) => self.call_function(&function, args, kwargs),
            other => Err(KnitScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> KnitScriptResult<Value> {
        let name = &function.name;
        if args.len() > function.params.len() {
            return Err(KnitScriptError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                name,
                function.params.len(),
                args.len()
            )));
        }
        let mut bound: Vec<Option<Value>> = vec![None; function.params.len()];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (key, value) in kwargs {
            let slot = function
                .params
                .iter()
                .position(|p| *p == key)
                .ok_or_else(|| {
                    KnitScriptError::name_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        name, key
                    ))
                })?;
            if bound[slot].is_some() {
                return Err(KnitScriptError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    name, key
                )));
            }
            bound[slot] = Some(value);
        }
        let mut values = Vec::with_capacity(bound.len());
        for ((param, value), default) in function.params.iter().zip(bound).zip(&function.defaults) {
            match value.or_else(|| default.clone()) {
                Some(value) => values.push(value),
                None => {
                    return Err(KnitScriptError::type_error(format!(
                        "{}() missing required argument '{}'",
                        name, param
                    )))
                }
            }
        }

        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(KnitScriptError::value_error(format!(
                "maximum call depth of {} exceeded in {}()",
                MAX_CALL_DEPTH, name
            )));
        }
        self.call_depth += 1;
        debug!(target: "knit_script::eval", function = %name, depth = self.call_depth, "call");
        let result = self.in_scope(FrameKind::Function(function.module.clone()), |this| {
            for (param, value) in function.params.iter().zip(values) {
                this.scopes.define(param, value);
            }
            this.exec_block(&function.body)?;
            Ok(this.scopes.take_return().unwrap_or(Value::None))
        });
        self.call_depth -= 1;
        result
    }

    // ---- imports ----

    fn import(&mut self, path: &[String], alias: Option<&str>) -> KnitScriptResult<()> {
        let dotted = path.join(".");
        let bind = alias
            .map(str::to_string)
            .or_else(|| path.last().cloned())
            .unwrap_or_else(|| dotted.clone());
        let prefixed = format!("{}.{}", self.options.stdlib_prefix, dotted);
        let module = match builtins::host_module(&dotted).or_else(|| builtins::host_module(&prefixed))
        {
            Some(module) => module,
            None => {
                let file = self.resolve_module(path).ok_or_else(|| {
                    KnitScriptError::import_error(format!("no module named '{}'", dotted))
                })?;
                self.load_module(&dotted, &file)?
            }
        };
        debug!(target: "knit_script::eval", module = %dotted, name = %bind, "import");
        self.scopes.set_local(&bind, module);
        Ok(())
    }

    /// Find `a/b.ks` next to the running source, then in the standard library
    fn resolve_module(&self, path: &[String]) -> Option<PathBuf> {
        let relative = path.iter().collect::<PathBuf>().with_extension("ks");
        let base = self.source_dirs.last().cloned().unwrap_or_default();
        let stdlib = match &self.options.stdlib_path {
            Some(dir) => dir.join(&relative),
            None => base.join(&self.options.stdlib_prefix).join(&relative),
        };
        [base.join(&relative), stdlib]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    fn load_module(&mut self, name: &str, file: &Path) -> KnitScriptResult<Value> {
        let source = fs::read_to_string(file).map_err(|e| {
            KnitScriptError::import_error(format!("cannot read {}: {}", file.display(), e))
        })?;
        let program = parser::parse(&source, Some(Arc::from(file.display().to_string())))?;
        let namespace = new_namespace();
        self.source_dirs
            .push(file.parent().map(Path::to_path_buf).unwrap_or_default());
        let result = self.in_scope(FrameKind::Module(namespace.clone()), |this| {
            this.exec_block(&program.statements)
        });
        self.source_dirs.pop();
        result?;
        Ok(Value::Module(Rc::new(Module {
            name: name.to_string(),
            namespace,
        })))
    }

    // ---- machine statements ----

    /// Flatten needle expressions into actual needles
    fn eval_needles(&mut self, exprs: &[Expr]) -> KnitScriptResult<Vec<Needle>> {
        let mut needles = Vec::new();
        for expr in exprs {
            let value = self.eval(expr)?;
            collect_needles(&value, &mut needles)?;
        }
        Ok(needles)
    }

    fn run_pass(&mut self, pass: &CarriagePassSpec) -> KnitScriptResult<PassResult> {
        Ok(pass.execute(&mut self.machine, &mut self.knitout)?)
    }

    fn in_direction(&mut self, direction: &Expr, lines: &[InstructionLine]) -> KnitScriptResult<()> {
        let direction = match self.eval(direction)? {
            Value::Direction(direction) => direction,
            other => {
                return Err(KnitScriptError::type_error(format!(
                    "expected a direction, got '{}'",
                    other.type_name()
                )))
            }
        };
        self.in_scope(FrameKind::Block, |this| {
            this.scopes.machine_mut().set_direction(direction);
            let carriers = this.scopes.machine().carrier().cloned();
            let mut pass = CarriagePassSpec::new(Some(direction), carriers);
            for line in lines {
                let instruction = match this.eval(&line.instruction)? {
                    Value::Instruction(instruction) => instruction,
                    other => {
                        return Err(KnitScriptError::type_error(format!(
                            "expected a needle instruction, got '{}'",
                            other.type_name()
                        )))
                    }
                };
                for needle in this.eval_needles(&line.needles)? {
                    pass.add(needle, instruction)?;
                }
            }
            this.last_pass = this.run_pass(&pass)?.transfers;
            Ok(())
        })
    }

    fn xfer_pass(
        &mut self,
        needles: &[Expr],
        racking: &XferRacking,
        target_bed: Option<Bed>,
        to_sliders: bool,
        split: Option<&Option<Expr>>,
    ) -> KnitScriptResult<()> {
        let sources = self.eval_needles(needles)?;
        let (instruction, carriers, direction) = match split {
            None => (NeedleInstruction::Xfer, None, None),
            Some(carriers) => {
                let carriers = match carriers {
                    Some(expr) => {
                        let value = self.eval(expr)?;
                        self.carrier_set(&value)?
                    }
                    None => self.scopes.machine().carrier().cloned(),
                };
                let direction = self.scopes.machine().direction();
                (NeedleInstruction::Split, carriers, Some(direction))
            }
        };
        let make_pass = |racking: Option<f64>| {
            let mut pass = CarriagePassSpec::new(direction, carriers.clone());
            pass.racking = racking;
            pass.target_bed = target_bed;
            pass.to_sliders = to_sliders;
            pass
        };

        match racking {
            XferRacking::Across => {
                let mut pass = make_pass(Some(0.0));
                for needle in sources {
                    pass.add(needle, instruction)?;
                }
                self.last_pass = self.run_pass(&pass)?.transfers;
            }
            XferRacking::Shift { distance, side } => {
                let distance = self.eval(distance)?.expect_int("transfer distance")?;
                let shift = distance * i64::from(self.gauge());
                let shift = match side {
                    Side::Right => shift,
                    Side::Left => -shift,
                };
                // a front needle reaches back p + shift at racking -shift, and the reverse
                let mut front = make_pass(Some(-shift as f64));
                let mut back = make_pass(Some(shift as f64));
                for needle in sources {
                    if needle.is_front() {
                        front.add(needle, instruction)?;
                    } else {
                        back.add(needle, instruction)?;
                    }
                }
                let mut transfers = self.run_pass(&front)?.transfers;
                transfers.extend(self.run_pass(&back)?.transfers);
                self.last_pass = transfers;
            }
            XferRacking::Target(target) => {
                let target = match self.eval(target)? {
                    Value::Needle(needle) => needle,
                    other => {
                        return Err(KnitScriptError::type_error(format!(
                            "transfer target must be a needle, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                let source = match sources.as_slice() {
                    [source] => *source,
                    _ => {
                        return Err(KnitScriptError::value_error(format!(
                            "a transfer to {} needs exactly one source needle, got {}",
                            target,
                            sources.len()
                        )))
                    }
                };
                let mut pass = make_pass(None);
                pass.add_with_target(source, instruction, target)?;
                self.last_pass = self.run_pass(&pass)?.transfers;
            }
        }
        Ok(())
    }

    /// `cut` and `remove`: take carriers out, on the hook when cutting
    fn take_out(&mut self, carriers: &[Expr], cut: bool) -> KnitScriptResult<()> {
        let set = if carriers.is_empty() {
            self.scopes.machine().carrier().cloned()
        } else {
            let mut ids = Vec::new();
            for expr in carriers {
                let value = self.eval(expr)?;
                if let Some(set) = self.carrier_set(&value)? {
                    ids.extend_from_slice(set.ids());
                }
            }
            let (set, warnings) = CarrierSet::new(ids);
            self.pending.extend(warnings);
            (!set.is_empty()).then_some(set)
        };
        let verb = if cut { "cut" } else { "remove" };
        let set = set.ok_or_else(|| {
            KnitScriptError::value_error(format!("no carrier to {}; set Carrier or name one", verb))
        })?;

        let mut active = Vec::new();
        for &id in set.ids() {
            if self.machine.carrier_system().carrier(id)?.is_active() {
                active.push(id);
            }
        }
        if active.is_empty() {
            debug!(target: "knit_script::eval", carriers = %set, "{} of inactive carriers", verb);
            return Ok(());
        }
        let hooked = self.machine.carrier_system().hooked_carrier();
        if hooked.map_or(false, |id| active.contains(&id)) {
            if let Some(id) = self.machine.carrier_system_mut().releasehook() {
                self.knitout
                    .push(Operation::Releasehook(CarrierSet::single(id)));
            }
        }
        for &id in &active {
            if cut {
                self.machine.carrier_system_mut().outhook(id)?;
            } else {
                self.machine.carrier_system_mut().out(id)?;
            }
        }
        let (taken, _) = CarrierSet::new(active);
        let scope_uses_taken = self
            .scopes
            .machine()
            .carrier()
            .map_or(false, |current| current.ids().iter().any(|id| taken.contains(*id)));
        self.knitout.push(if cut {
            Operation::Outhook(taken)
        } else {
            Operation::Out(taken)
        });
        if scope_uses_taken {
            self.scopes
                .machine_mut()
                .set_carrier(None, &mut self.machine, &mut self.knitout)?;
        }
        Ok(())
    }

    /// Bed position of a needle as an index into the layer record
    fn layer_position(&self, needle: Needle) -> KnitScriptResult<usize> {
        let needle_count = self.machine.needle_count();
        usize::try_from(needle.position)
            .ok()
            .filter(|p| *p < needle_count)
            .ok_or_else(|| {
                KnitScriptError::from(MachineError::NeedleOutOfRange {
                    needle,
                    needle_count,
                })
            })
    }

    fn layer_argument(&mut self, expr: &Expr, what: &str) -> KnitScriptResult<u32> {
        let value = self.eval(expr)?.expect_int(what)?;
        u32::try_from(value)
            .map_err(|_| KnitScriptError::value_error(format!("{} cannot be negative: {}", what, value)))
    }

    fn push_layers(&mut self, needles: &[Expr], push: &PushKind) -> KnitScriptResult<()> {
        let positions = self
            .eval_needles(needles)?
            .into_iter()
            .map(|n| self.layer_position(n))
            .collect::<KnitScriptResult<Vec<_>>>()?;
        let amount = match push {
            PushKind::Forward(expr) | PushKind::Backward(expr) => {
                self.layer_argument(expr, "push distance")?
            }
            PushKind::ToLayer(expr) => self.layer_argument(expr, "layer")?,
            PushKind::ToFront | PushKind::ToBack => 0,
        };
        self.scopes.machine().with_record(|record| {
            for &position in &positions {
                match push {
                    PushKind::Forward(_) => record.push_forward(position, amount)?,
                    PushKind::Backward(_) => record.push_backward(position, amount)?,
                    PushKind::ToFront => record.set_to_front(position)?,
                    PushKind::ToBack => record.set_to_back(position)?,
                    PushKind::ToLayer(_) => record.set_layer_position(position, amount, true)?,
                }
            }
            Ok::<(), MachineError>(())
        })?;
        self.scopes
            .machine()
            .reset_sheet(&mut self.machine, &mut self.knitout)?;
        Ok(())
    }

    fn swap_layers(&mut self, needles: &[Expr], swap: &SwapKind) -> KnitScriptResult<()> {
        let positions = self
            .eval_needles(needles)?
            .into_iter()
            .map(|n| self.layer_position(n))
            .collect::<KnitScriptResult<Vec<_>>>()?;
        let gauge = self.gauge() as usize;
        match swap {
            SwapKind::Layer(expr) => {
                let layer = self.layer_argument(expr, "layer")?;
                self.scopes.machine().with_record(|record| {
                    positions
                        .iter()
                        .try_for_each(|&p| record.set_layer_position(p, layer, false))
                })?;
            }
            SwapKind::Sheet(expr) => {
                let sheet = match self.eval(expr)? {
                    Value::Sheet(sheet) => sheet.sheet,
                    other => {
                        let sheet = other.expect_int("sheet")?;
                        u32::try_from(sheet).map_err(|_| {
                            KnitScriptError::value_error(format!("sheet {} cannot be negative", sheet))
                        })?
                    }
                };
                if sheet as usize >= gauge {
                    return Err(KnitScriptError::value_error(format!(
                        "sheet {} does not exist in gauge {}",
                        sheet, gauge
                    )));
                }
                self.scopes.machine().with_record(|record| {
                    positions.iter().try_for_each(|&p| {
                        record.swap_layer_at_positions(p, p / gauge * gauge + sheet as usize)
                    })
                })?;
            }
        }
        self.scopes
            .machine()
            .reset_sheet(&mut self.machine, &mut self.knitout)?;
        Ok(())
    }
}

fn unpack(value: &Value, count: usize) -> KnitScriptResult<Vec<Value>> {
    let items = value.iterate()?;
    if items.len() != count {
        return Err(KnitScriptError::value_error(format!(
            "expected {} values to unpack, got {}",
            count,
            items.len()
        )));
    }
    Ok(items)
}

fn collect_needles(value: &Value, out: &mut Vec<Needle>) -> KnitScriptResult<()> {
    match value {
        Value::Needle(needle) => out.push(*needle),
        Value::List(_) | Value::Tuple(_) | Value::Dict(_) => {
            for item in value.iterate()? {
                collect_needles(&item, out)?;
            }
        }
        other => {
            return Err(KnitScriptError::type_error(format!(
                "expected a needle, got '{}'",
                other.type_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;

    fn interpreter() -> Interpreter {
        Interpreter::new(InterpreterOptions::new(MachineConfig::new(20, 6)).without_error_dump())
    }

    fn run(source: &str) -> Interpreter {
        let mut interp = interpreter();
        interp.run_source(source, None).unwrap();
        interp
    }

    fn run_err(source: &str) -> KnitScriptError {
        interpreter().run_source(source, None).unwrap_err()
    }

    #[test]
    fn test_functions_defaults_and_keywords() {
        let interp = run(
            "def f(a, b = 2) { return a * 10 + b; }\n\
             print f(1);\n\
             print f(1, b = 5);\n",
        );
        assert_eq!(interp.printed(), &["12", "15"]);
    }

    #[test]
    fn test_call_argument_errors() {
        let err = run_err("def f(a) { return a; }\nf(1, 2);");
        assert_eq!(err.type_name(), "TypeError");
        let err = run_err("def f(a) { return a; }\nf(b = 1);");
        assert_eq!(err.type_name(), "NameError");
        let err = run_err("def f(a) { return a; }\nf();");
        assert_eq!(err.type_name(), "TypeError");
    }

    #[test]
    fn test_loop_variables_stay_in_loop() {
        let err = run_err("for i in range(3) { x = i; }\nprint i;");
        assert_eq!(err.type_name(), "NameError");
        assert_eq!(err.location.map(|l| l.line), Some(2));

        let interp = run("total = 0;\nfor i in range(4) { total = total + i; }\nprint total;");
        assert_eq!(interp.printed(), &["6"]);
    }

    #[test]
    fn test_unpacking_arity() {
        let interp = run("for a, b in [(1, 2), (3, 4)] { print a + b; }");
        assert_eq!(interp.printed(), &["3", "7"]);
        let err = run_err("a, b = [1, 2, 3];");
        assert_eq!(err.type_name(), "ValueError");
    }

    #[test]
    fn test_try_filters() {
        let interp = run(
            "try { x = 1 / 0; } catch ZeroDivisionError as e { print e.type; }\n\
             try { y = undefined; } catch { print \"caught\"; }\n",
        );
        assert_eq!(interp.printed(), &["ZeroDivisionError", "caught"]);
        let err = run_err("try { y = undefined; } catch KeyError { print 1; }");
        assert_eq!(err.type_name(), "NameError");
    }

    #[test]
    fn test_top_level_return_ends_program() {
        let interp = run("print 1;\nreturn 5;\nprint 2;");
        assert_eq!(interp.printed(), &["1"]);
        assert_eq!(interp.exit_value(), Some(&Value::Int(5)));
    }

    #[test]
    fn test_with_restores_racking() {
        let interp = run("with Racking as 1 { print Racking; }\nprint Racking;");
        assert_eq!(interp.printed(), &["1", "0"]);
        assert_eq!(interp.knitout().operation_lines(), vec!["rack 1", "rack 0"]);
    }

    #[test]
    fn test_global_shadow_warning() {
        let interp = run("global w = 3;\nw = 4;\nprint w;");
        assert_eq!(interp.printed(), &["4"]);
        assert_eq!(interp.warnings().len(), 1);
        assert_eq!(interp.warnings()[0].warning.type_name(), "Shadows_Global");
    }

    #[test]
    fn test_needle_sets_follow_sheet() {
        let interp = run(
            "Gauge = 2;\nSheet = 1;\n\
             print len(Front_Needles);\n\
             print Front_Needles[0];\n\
             print Front_Needles[0] == f0;\n\
             print Front_Needles[0].position;\n\
             print f1.actual_position;",
        );
        // needles print as the actual bed needle, addresses stay sheet-local
        assert_eq!(interp.printed(), &["10", "f1", "True", "0", "3"]);
    }

    #[test]
    fn test_failure_cuts_active_carriers() {
        let mut interp = interpreter();
        let err = interp
            .run_source("Carrier = c2;\nx = missing;", None)
            .unwrap_err();
        assert_eq!(err.type_name(), "NameError");
        let lines = interp.knitout().operation_lines();
        assert_eq!(lines, vec!["inhook 2", "releasehook 2", "outhook 2"]);
    }

    #[test]
    fn test_cut_clears_scope_carrier() {
        let interp = run(
            "Carrier = c1;\n\
             in Leftward direction { knit f3, f2, f1; }\n\
             releasehook;\n\
             cut;\n\
             print Carrier;",
        );
        assert_eq!(interp.printed(), &["None"]);
        assert_eq!(
            interp.knitout().operation_lines().last().map(String::as_str),
            Some("outhook 1")
        );
    }
}
