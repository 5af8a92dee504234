//! Runtime values of KnitScript programs
//!
//! Needles are held by their actual bed address. Arithmetic that moves a
//! needle works in sheet-local steps, so the operators take the gauge of the
//! scope they run in.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, Statement, UnaryOp};
use crate::error::{KnitScriptError, KnitScriptResult, Warning};
use crate::interpreter::builtins::Builtin;
use crate::machine::carriage_pass::NeedleInstruction;
use crate::machine::carrier::CarrierSet;
use crate::machine::needle::{Needle, PassDirection};
use crate::machine::sheet::SheetId;

/// Variables of a frame or module, shared by reference
pub type Namespace = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(HashMap::new()))
}

/// A user-defined function
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Defaults evaluated when the function was declared
    pub defaults: Vec<Option<Value>>,
    pub body: Rc<Vec<Statement>>,
    /// Namespace of the module the function was declared in
    pub module: Option<Namespace>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}({})>", self.name, self.params.join(", "))
    }
}

/// An imported module
pub struct Module {
    pub name: String,
    pub namespace: Namespace,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module {}>", self.name)
    }
}

/// KnitScript runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Always holds the actual bed needle. It prints as the actual needle so
    /// printed text agrees with the knitout lines beside it. Literals and
    /// `.position` are sheet-local; `.actual_position` is not.
    Needle(Needle),
    Carrier(CarrierSet),
    Sheet(SheetId),
    Direction(PassDirection),
    Instruction(NeedleInstruction),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    /// Insertion-ordered key/value pairs
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Module(Rc<Module>),
    Error(Rc<KnitScriptError>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Needle(_) => "Needle",
            Value::Carrier(_) => "Carrier_Set",
            Value::Sheet(_) => "Sheet_Identifier",
            Value::Direction(_) => "Pass_Direction",
            Value::Instruction(_) => "Needle_Instruction",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function",
            Value::Module(_) => "module",
            Value::Error(e) => e.type_name(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Carrier(cs) => !cs.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer argument, or a type error naming `what`
    pub fn expect_int(&self, what: &str) -> KnitScriptResult<i64> {
        self.as_int().ok_or_else(|| {
            KnitScriptError::type_error(format!(
                "{} must be an int, not '{}'",
                what,
                self.type_name()
            ))
        })
    }

    /// Items of an iterable value
    pub fn iterate(&self) -> KnitScriptResult<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.borrow().iter().map(|(k, _)| k.clone()).collect()),
            Value::Carrier(cs) => Ok(cs
                .ids()
                .iter()
                .map(|&id| Value::Carrier(CarrierSet::single(id)))
                .collect()),
            other => Err(KnitScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> KnitScriptResult<usize> {
        match self {
            Value::List(items) => Ok(items.borrow().len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::Str(s) => Ok(s.chars().count()),
            Value::Dict(entries) => Ok(entries.borrow().len()),
            Value::Carrier(cs) => Ok(cs.len()),
            other => Err(KnitScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// Look up a key in a dict value
    pub fn dict_get(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Dict(entries) => entries
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// `value[index]`
    pub fn index(&self, index: &Value) -> KnitScriptResult<Value> {
        match self {
            Value::List(items) => {
                let items = items.borrow();
                let i = normalize_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = normalize_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len(), "string")?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Dict(_) => self
                .dict_get(index)
                .ok_or_else(|| KnitScriptError::key_error(index.repr())),
            other => Err(KnitScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// `value[index] = item`; lists and dicts only
    pub fn set_item(&self, index: Value, item: Value) -> KnitScriptResult<()> {
        match self {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = normalize_index(&index, items.len(), "list assignment")?;
                items[i] = item;
                Ok(())
            }
            Value::Dict(entries) => {
                let mut entries = entries.borrow_mut();
                match entries.iter_mut().find(|(k, _)| *k == index) {
                    Some(entry) => entry.1 = item,
                    None => entries.push((index, item)),
                }
                Ok(())
            }
            other => Err(KnitScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    /// `value[start:stop:step]`
    pub fn slice(
        &self,
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> KnitScriptResult<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(KnitScriptError::value_error("slice step cannot be zero"));
        }
        match self {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_indices(items.len(), start, stop, step);
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = slice_indices(items.len(), start, stop, step);
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_indices(chars.len(), start, stop, step);
                Ok(Value::Str(picked.into_iter().map(|i| chars[i]).collect()))
            }
            other => Err(KnitScriptError::type_error(format!(
                "'{}' object cannot be sliced",
                other.type_name()
            ))),
        }
    }

    /// Ordering used by comparisons and `sorted`
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Needle(a), Value::Needle(b)) => {
                Some(a.position.cmp(&b.position).then(a.bed.cmp(&b.bed)))
            }
            (Value::List(a), Value::List(b)) => compare_sequences(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => compare_sequences(a, b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Identity for containers, equality for everything else
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            (Value::None, _) | (_, Value::None) => false,
            _ => self == other,
        }
    }

    /// `item in self`
    pub fn contains(&self, item: &Value) -> KnitScriptResult<bool> {
        match (self, item) {
            (Value::List(items), _) => Ok(items.borrow().iter().any(|v| v == item)),
            (Value::Tuple(items), _) => Ok(items.iter().any(|v| v == item)),
            (Value::Dict(entries), _) => Ok(entries.borrow().iter().any(|(k, _)| k == item)),
            (Value::Str(s), Value::Str(part)) => Ok(s.contains(part.as_str())),
            (Value::Carrier(set), Value::Carrier(part)) => {
                Ok(part.ids().iter().all(|id| set.contains(*id)))
            }
            (Value::Carrier(set), Value::Int(id)) => {
                Ok(u32::try_from(*id).map_or(false, |id| set.contains(id)))
            }
            _ => Err(KnitScriptError::type_error(format!(
                "argument of type '{}' does not support 'in' with '{}'",
                self.type_name(),
                item.type_name()
            ))),
        }
    }

    /// Printable form with strings quoted, as inside containers
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Needle(a), Value::Needle(b)) => a == b,
            (Value::Carrier(a), Value::Carrier(b)) => a == b,
            (Value::Sheet(a), Value::Sheet(b)) => a == b,
            (Value::Direction(a), Value::Direction(b)) => a == b,
            (Value::Instruction(a), Value::Instruction(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => *a.borrow() == *b.borrow(),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Needle(n) => write!(f, "{}", n),
            Value::Carrier(cs) => {
                let ids: Vec<String> = cs.ids().iter().map(|id| format!("c{}", id)).collect();
                write!(f, "{}", ids.join(" "))
            }
            Value::Sheet(s) => write!(f, "{}", s),
            Value::Direction(PassDirection::Leftward) => write!(f, "Leftward"),
            Value::Direction(PassDirection::Rightward) => write!(f, "Rightward"),
            Value::Instruction(i) => write!(f, "{}", i),
            Value::List(items) => write!(f, "[{}]", join_repr(items.borrow().iter())),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write!(f, "({})", join_repr(items.iter())),
            Value::Dict(entries) => {
                let parts: Vec<String> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Module(m) => write!(f, "<module {}>", m.name),
            Value::Error(e) => write!(f, "{}: {}", e.type_name(), e.message()),
        }
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            order => return Some(order),
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn normalize_index(index: &Value, len: usize, what: &str) -> KnitScriptResult<usize> {
    let i = index.as_int().ok_or_else(|| {
        KnitScriptError::type_error(format!(
            "{} indices must be integers, not '{}'",
            what,
            index.type_name()
        ))
    })?;
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(KnitScriptError::index_error(format!("{} index {} out of range", what, i)));
    }
    Ok(resolved as usize)
}

/// Positions selected by a slice over a sequence of `len` items
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let mut picked = Vec::new();
    if step > 0 {
        let clamp = |i: i64| if i < 0 { (i + len).max(0) } else { i.min(len) };
        let mut i = start.map_or(0, clamp);
        let stop = stop.map_or(len, clamp);
        while i < stop {
            picked.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    } else {
        let clamp = |i: i64| if i < 0 { (i + len).max(-1) } else { i.min(len - 1) };
        let mut i = start.map_or(len - 1, clamp);
        let stop = stop.map_or(-1, clamp);
        while i > stop {
            picked.push(i as usize);
            i += step;
        }
    }
    picked
}

fn overflow() -> KnitScriptError {
    KnitScriptError::value_error("integer overflow")
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> KnitScriptError {
    KnitScriptError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// Python-style modulo: the result takes the sign of the divisor
fn floor_mod(a: i64, b: i64) -> i64 {
    // wrapping_rem only wraps for i64::MIN % -1, whose remainder is 0
    let rem = a.wrapping_rem(b);
    if rem != 0 && (rem < 0) != (b < 0) {
        rem + b
    } else {
        rem
    }
}

fn numeric(op: BinaryOp, left: &Value, right: &Value) -> KnitScriptResult<Value> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(KnitScriptError::zero_division("division by zero")),
            BinaryOp::Div if a.wrapping_rem(b) == 0 => {
                a.checked_div(b).map(Value::Int).ok_or_else(overflow)
            }
            BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinaryOp::Mod if b == 0 => Err(KnitScriptError::zero_division("modulo by zero")),
            BinaryOp::Mod => Ok(Value::Int(floor_mod(a, b))),
            BinaryOp::Pow if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|b| a.checked_pow(b))
                .map(Value::Int)
                .ok_or_else(overflow),
            BinaryOp::Pow => Ok(Value::Float((a as f64).powf(b as f64))),
            _ => Err(unsupported(op, left, right)),
        };
    }
    let (a, b) = match (left.as_float(), right.as_float()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(op, left, right)),
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div if b == 0.0 => Err(KnitScriptError::zero_division("float division by zero")),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        BinaryOp::Mod if b == 0.0 => Err(KnitScriptError::zero_division("float modulo")),
        BinaryOp::Mod => Ok(Value::Float(a - b * (a / b).floor())),
        BinaryOp::Pow => Ok(Value::Float(a.powf(b))),
        _ => Err(unsupported(op, left, right)),
    }
}

fn repeat(items: &[Value], times: i64) -> Vec<Value> {
    let times = times.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

/// Apply a binary operator; `and`/`or` reach here only without short-circuit
pub fn binary_op(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    gauge: u32,
    warnings: &mut Vec<Warning>,
) -> KnitScriptResult<Value> {
    let g = i64::from(gauge.max(1));
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Needle(n), Value::Int(k)) | (Value::Int(k), Value::Needle(n)) => {
                Ok(Value::Needle(n.offset(k * g)))
            }
            (Value::Carrier(a), Value::Carrier(b)) => {
                let (set, duplicates) = a.union(b);
                warnings.extend(duplicates);
                Ok(Value::Carrier(set))
            }
            _ => numeric(op, left, right),
        },
        BinaryOp::Sub => match (left, right) {
            (Value::Needle(n), Value::Int(k)) => Ok(Value::Needle(n.offset(-k * g))),
            (Value::Needle(a), Value::Needle(b)) => {
                Ok(Value::Int((a.position - b.position).div_euclid(g)))
            }
            _ => numeric(op, left, right),
        },
        BinaryOp::Mul => match (left, right) {
            (Value::Str(s), Value::Int(k)) | (Value::Int(k), Value::Str(s)) => {
                Ok(Value::Str(s.repeat((*k).max(0) as usize)))
            }
            (Value::List(items), Value::Int(k)) | (Value::Int(k), Value::List(items)) => {
                Ok(Value::list(repeat(&items.borrow(), *k)))
            }
            _ => numeric(op, left, right),
        },
        BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => numeric(op, left, right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let order = left.compare(right).ok_or_else(|| {
                KnitScriptError::type_error(format!(
                    "'{}' not supported between '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => order == Ordering::Less,
                BinaryOp::Le => order != Ordering::Greater,
                BinaryOp::Gt => order == Ordering::Greater,
                _ => order != Ordering::Less,
            }))
        }
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Is => Ok(Value::Bool(left.is_same(right))),
        BinaryOp::In => Ok(Value::Bool(right.contains(left)?)),
        BinaryOp::And => Ok(if left.is_truthy() {
            right.clone()
        } else {
            left.clone()
        }),
        BinaryOp::Or => Ok(if left.is_truthy() {
            left.clone()
        } else {
            right.clone()
        }),
    }
}

pub fn unary_op(op: UnaryOp, operand: &Value) -> KnitScriptResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::Neg, other) => Err(KnitScriptError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op: BinaryOp, left: Value, right: Value) -> KnitScriptResult<Value> {
        binary_op(op, &left, &right, 1, &mut Vec::new())
    }

    #[test]
    fn test_division_keeps_exact_ints() {
        assert_eq!(op(BinaryOp::Div, Value::Int(6), Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(op(BinaryOp::Div, Value::Int(7), Value::Int(2)).unwrap(), Value::Float(3.5));
        let err = op(BinaryOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.type_name(), "ZeroDivisionError");
    }

    #[test]
    fn test_modulo_and_power() {
        assert_eq!(op(BinaryOp::Mod, Value::Int(-7), Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(op(BinaryOp::Mod, Value::Int(7), Value::Int(-3)).unwrap(), Value::Int(-2));
        assert_eq!(op(BinaryOp::Pow, Value::Int(2), Value::Int(10)).unwrap(), Value::Int(1024));
        assert_eq!(op(BinaryOp::Pow, Value::Int(2), Value::Int(-1)).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_integer_extremes_do_not_panic() {
        assert_eq!(
            op(BinaryOp::Mod, Value::Int(1), Value::Int(i64::MAX)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            op(BinaryOp::Mod, Value::Int(-1), Value::Int(i64::MAX)).unwrap(),
            Value::Int(i64::MAX - 1)
        );
        assert_eq!(
            op(BinaryOp::Mod, Value::Int(i64::MIN), Value::Int(-1)).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            op(BinaryOp::Mod, Value::Int(i64::MIN), Value::Int(i64::MAX)).unwrap(),
            Value::Int(i64::MAX - 1)
        );
        let err = op(BinaryOp::Div, Value::Int(i64::MIN), Value::Int(-1)).unwrap_err();
        assert_eq!(err.type_name(), "ValueError");
        assert_eq!(
            op(BinaryOp::Div, Value::Int(i64::MIN), Value::Int(2)).unwrap(),
            Value::Int(i64::MIN / 2)
        );
    }

    #[test]
    fn test_needle_arithmetic_under_gauge() {
        let mut warnings = Vec::new();
        let moved = binary_op(
            BinaryOp::Add,
            &Value::Needle(Needle::front(3)),
            &Value::Int(2),
            2,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(moved, Value::Needle(Needle::front(7)));
        let distance = binary_op(
            BinaryOp::Sub,
            &Value::Needle(Needle::back(9)),
            &Value::Needle(Needle::back(1)),
            2,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(distance, Value::Int(4));
    }

    #[test]
    fn test_carrier_union_warns_on_duplicates() {
        let mut warnings = Vec::new();
        let plated = binary_op(
            BinaryOp::Add,
            &Value::Carrier(CarrierSet::single(1)),
            &Value::Carrier(CarrierSet::single(1)),
            1,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(plated, Value::Carrier(CarrierSet::single(1)));
        assert_eq!(warnings, vec![Warning::DuplicateCarrier { carrier: 1 }]);
    }

    #[test]
    fn test_mixed_numeric_equality_and_ordering() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".to_string()));
        assert_eq!(op(BinaryOp::Lt, Value::Int(1), Value::Float(1.5)).unwrap(), Value::Bool(true));
        let err = op(BinaryOp::Lt, Value::Int(1), Value::str("a")).unwrap_err();
        assert_eq!(err.type_name(), "TypeError");
    }

    #[test]
    fn test_slicing() {
        let items = Value::list((0..6).map(Value::Int).collect());
        assert_eq!(
            items.slice(Some(1), None, Some(2)).unwrap(),
            Value::list(vec![Value::Int(1), Value::Int(3), Value::Int(5)])
        );
        assert_eq!(
            items.slice(None, None, Some(-1)).unwrap().to_string(),
            "[5, 4, 3, 2, 1, 0]"
        );
        assert_eq!(Value::str("knit").slice(Some(-3), None, None).unwrap(), Value::str("nit"));
        assert!(items.slice(None, None, Some(0)).is_err());
    }

    #[test]
    fn test_indexing_and_membership() {
        let items = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(items.index(&Value::Int(-1)).unwrap(), Value::str("a"));
        assert_eq!(items.index(&Value::Int(2)).unwrap_err().type_name(), "IndexError");
        assert!(items.contains(&Value::Int(1)).unwrap());
        let dict = Value::dict(vec![(Value::str("k"), Value::Int(3))]);
        assert_eq!(dict.index(&Value::str("k")).unwrap(), Value::Int(3));
        assert_eq!(dict.index(&Value::str("x")).unwrap_err().type_name(), "KeyError");
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(
            Value::tuple(vec![Value::str("a"), Value::None]).to_string(),
            "('a', None)"
        );
        let plated = CarrierSet::new([1, 3]).0;
        assert_eq!(Value::Carrier(plated).to_string(), "c1 c3");
        assert_eq!(Value::Needle(Needle::back_slider(4)).to_string(), "bs4");
    }
}
