//! Lexical frames: variables, module namespaces, globals and return state

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::Warning;
use crate::interpreter::machine_scope::MachineScope;
use crate::interpreter::value::{new_namespace, Namespace, Value};

/// What opened a frame
#[derive(Debug, Clone)]
pub enum FrameKind {
    /// Loops, `with`, in-direction blocks, comprehensions and bare blocks
    Block,
    /// A function call, with the namespace of the module that declared it
    Function(Option<Namespace>),
    /// Top level of an imported module; its variables are the module namespace
    Module(Namespace),
}

#[derive(Debug)]
pub struct Frame {
    kind: FrameKind,
    variables: Namespace,
    machine: MachineScope,
    return_value: Option<Value>,
    returned: bool,
}

impl Frame {
    fn new(kind: FrameKind, machine: MachineScope) -> Self {
        let variables = match &kind {
            FrameKind::Module(namespace) => namespace.clone(),
            _ => new_namespace(),
        };
        Self {
            kind,
            variables,
            machine,
            return_value: None,
            returned: false,
        }
    }

    fn is_boundary(&self) -> bool {
        matches!(self.kind, FrameKind::Function(_) | FrameKind::Module(_))
    }

    pub fn into_machine(self) -> MachineScope {
        self.machine
    }
}

/// Stack of frames over a root frame that is never popped
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<Frame>,
    globals: HashMap<String, Value>,
    exit_value: Option<Value>,
    exited: bool,
    shadow_warned: HashSet<String>,
    warnings: Vec<Warning>,
}

impl ScopeStack {
    pub fn new(machine: MachineScope) -> Self {
        Self {
            frames: vec![Frame::new(FrameKind::Block, machine)],
            globals: HashMap::new(),
            exit_value: None,
            exited: false,
            shadow_warned: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn top(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn machine(&self) -> &MachineScope {
        &self.top().machine
    }

    pub fn machine_mut(&mut self) -> &mut MachineScope {
        &mut self.top_mut().machine
    }

    /// Open a frame whose machine settings copy the current ones
    pub fn push(&mut self, kind: FrameKind) {
        let machine = self.machine().child();
        trace!(target: "knit_script::scope", depth = self.frames.len(), ?kind, "enter scope");
        self.frames.push(Frame::new(kind, machine));
    }

    /// Close the innermost frame; the root frame stays
    pub fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() == 1 {
            return None;
        }
        trace!(target: "knit_script::scope", depth = self.frames.len() - 1, "exit scope");
        self.frames.pop()
    }

    /// Resolve a name: innermost frame outwards, then globals
    ///
    /// A function frame also sees its declaring module's namespace.
    pub fn get(&mut self, name: &str) -> Option<Value> {
        let mut found = None;
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.variables.borrow().get(name) {
                found = Some(value.clone());
                break;
            }
            if let FrameKind::Function(Some(module)) = &frame.kind {
                if let Some(value) = module.borrow().get(name) {
                    found = Some(value.clone());
                    break;
                }
            }
        }
        match found {
            Some(value) => {
                if self.globals.contains_key(name) && self.shadow_warned.insert(name.to_string()) {
                    self.warnings.push(Warning::ShadowsGlobal {
                        name: name.to_string(),
                    });
                }
                Some(value)
            }
            None => self.globals.get(name).cloned(),
        }
    }

    /// Assign to the nearest binding inside the current function or module,
    /// defining it in the innermost frame if there is none
    pub fn set_local(&mut self, name: &str, value: Value) {
        for frame in self.frames.iter().rev() {
            if frame.variables.borrow().contains_key(name) {
                frame.variables.borrow_mut().insert(name.to_string(), value);
                return;
            }
            if frame.is_boundary() {
                break;
            }
        }
        self.define(name, value);
    }

    /// Bind in the innermost frame, hiding any outer binding
    pub fn define(&mut self, name: &str, value: Value) {
        self.top()
            .variables
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Namespace new functions close over
    pub fn current_module(&self) -> Option<Namespace> {
        for frame in self.frames.iter().rev() {
            match &frame.kind {
                FrameKind::Module(namespace) => return Some(namespace.clone()),
                FrameKind::Function(module) => return module.clone(),
                FrameKind::Block => {}
            }
        }
        None
    }

    /// Record a return from the innermost function, or end the program
    /// when there is none
    pub fn set_return(&mut self, value: Value) {
        for frame in self.frames.iter_mut().rev() {
            if matches!(frame.kind, FrameKind::Function(_)) {
                frame.return_value = Some(value);
                frame.returned = true;
                return;
            }
        }
        self.exit_value = Some(value);
        self.exited = true;
    }

    /// Whether statements of the current frame should stop running
    pub fn is_returning(&self) -> bool {
        for frame in self.frames.iter().rev() {
            if matches!(frame.kind, FrameKind::Function(_)) {
                return frame.returned;
            }
        }
        self.exited
    }

    /// Return value of the function frame on top
    pub fn take_return(&mut self) -> Option<Value> {
        self.top_mut().return_value.take()
    }

    pub fn exit_value(&self) -> Option<&Value> {
        self.exit_value.as_ref()
    }

    pub fn take_exit_value(&mut self) -> Option<Value> {
        self.exit_value.take()
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> ScopeStack {
        ScopeStack::new(MachineScope::new(10))
    }

    #[test]
    fn test_block_locals_disappear() {
        let mut scopes = stack();
        scopes.define("x", Value::Int(1));
        scopes.push(FrameKind::Block);
        scopes.define("y", Value::Int(2));
        scopes.set_local("x", Value::Int(3));
        assert_eq!(scopes.get("y"), Some(Value::Int(2)));
        scopes.pop();
        assert_eq!(scopes.get("y"), None);
        assert_eq!(scopes.get("x"), Some(Value::Int(3)));
        assert!(scopes.pop().is_none());
        assert_eq!(scopes.depth(), 1);
    }

    #[test]
    fn test_function_frame_does_not_assign_outward() {
        let mut scopes = stack();
        scopes.define("x", Value::Int(1));
        scopes.push(FrameKind::Function(None));
        scopes.set_local("x", Value::Int(5));
        assert_eq!(scopes.get("x"), Some(Value::Int(5)));
        scopes.pop();
        assert_eq!(scopes.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_shadowed_global_warns_once() {
        let mut scopes = stack();
        scopes.set_global("width", Value::Int(10));
        assert_eq!(scopes.get("width"), Some(Value::Int(10)));
        scopes.define("width", Value::Int(4));
        assert_eq!(scopes.get("width"), Some(Value::Int(4)));
        assert_eq!(scopes.get("width"), Some(Value::Int(4)));
        assert_eq!(
            scopes.take_warnings(),
            vec![Warning::ShadowsGlobal {
                name: "width".to_string()
            }]
        );
    }

    #[test]
    fn test_function_sees_module_namespace() {
        let mut scopes = stack();
        let module = new_namespace();
        module.borrow_mut().insert("rows".to_string(), Value::Int(8));
        scopes.push(FrameKind::Function(Some(module.clone())));
        assert_eq!(scopes.get("rows"), Some(Value::Int(8)));
        assert!(scopes.current_module().is_some());
    }

    #[test]
    fn test_return_targets_innermost_function() {
        let mut scopes = stack();
        scopes.push(FrameKind::Function(None));
        scopes.push(FrameKind::Block);
        scopes.set_return(Value::Int(7));
        assert!(scopes.is_returning());
        scopes.pop();
        assert_eq!(scopes.take_return(), Some(Value::Int(7)));
        scopes.pop();
        assert!(!scopes.is_returning());
        scopes.set_return(Value::None);
        assert!(scopes.is_returning());
        assert_eq!(scopes.exit_value(), Some(&Value::None));
    }
}
