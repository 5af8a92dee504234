//! Host environment: builtin functions, host modules, attributes and methods

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::BinaryOp;
use crate::error::{KnitScriptError, KnitScriptResult};
use crate::interpreter::value::{binary_op, Module, Value};

/// Functions provided by the host rather than written in KnitScript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Range,
    Str,
    Int,
    Float,
    Bool,
    List,
    Tuple,
    Dict,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Round,
    Sqrt,
    Floor,
    Ceil,
}

const GLOBAL_BUILTINS: [Builtin; 18] = [
    Builtin::Len,
    Builtin::Range,
    Builtin::Str,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::List,
    Builtin::Tuple,
    Builtin::Dict,
    Builtin::Abs,
    Builtin::Min,
    Builtin::Max,
    Builtin::Sum,
    Builtin::Sorted,
    Builtin::Reversed,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Round,
];

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Round => "round",
            Builtin::Sqrt => "sqrt",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
        }
    }
}

/// The flat dictionary consulted before any frame when resolving a name
pub fn environment() -> HashMap<String, Value> {
    GLOBAL_BUILTINS
        .iter()
        .map(|b| (b.name().to_string(), Value::Builtin(*b)))
        .collect()
}

/// Host modules importable by dotted name
pub fn host_module(name: &str) -> Option<Value> {
    match name {
        "math" => {
            let namespace: HashMap<String, Value> = [Builtin::Sqrt, Builtin::Floor, Builtin::Ceil]
                .iter()
                .map(|b| (b.name().to_string(), Value::Builtin(*b)))
                .chain([
                    ("pi".to_string(), Value::Float(std::f64::consts::PI)),
                    ("e".to_string(), Value::Float(std::f64::consts::E)),
                ])
                .collect();
            Some(Value::Module(Rc::new(Module {
                name: name.to_string(),
                namespace: Rc::new(RefCell::new(namespace)),
            })))
        }
        _ => None,
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> KnitScriptResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(KnitScriptError::type_error(format!(
            "{}() takes {} arguments but {} were given",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> KnitScriptResult<()> {
    match kwargs.first() {
        Some((key, _)) => Err(KnitScriptError::name_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        ))),
        None => Ok(()),
    }
}

fn number(name: &str, value: &Value) -> KnitScriptResult<f64> {
    value.as_float().ok_or_else(|| {
        KnitScriptError::type_error(format!(
            "{}() requires a number, not '{}'",
            name,
            value.type_name()
        ))
    })
}

/// Round half to even
fn round_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn sort_values(items: &mut [Value]) -> KnitScriptResult<()> {
    let mut incomparable = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|| {
            incomparable.get_or_insert((a.type_name(), b.type_name()));
            Ordering::Equal
        })
    });
    match incomparable {
        Some((a, b)) => Err(KnitScriptError::type_error(format!(
            "cannot order '{}' and '{}'",
            a, b
        ))),
        None => Ok(()),
    }
}

fn extreme(name: &str, args: Vec<Value>, wanted: Ordering) -> KnitScriptResult<Value> {
    let items = if args.len() == 1 {
        args[0].iterate()?
    } else {
        args
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                let order = item.compare(&current).ok_or_else(|| {
                    KnitScriptError::type_error(format!(
                        "cannot order '{}' and '{}'",
                        item.type_name(),
                        current.type_name()
                    ))
                })?;
                Some(if order == wanted { item } else { current })
            }
        };
    }
    best.ok_or_else(|| KnitScriptError::value_error(format!("{}() arg is an empty sequence", name)))
}

/// Call a builtin with evaluated arguments
pub fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> KnitScriptResult<Value> {
    let name = builtin.name();
    if builtin != Builtin::Sorted {
        no_kwargs(name, &kwargs)?;
    }
    match builtin {
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(args[0].len()? as i64))
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let ints = args
                .iter()
                .map(|a| a.expect_int("range() argument"))
                .collect::<KnitScriptResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step, ..] => (*start, *stop, *step),
                [] => (0, 0, 1),
            };
            if step == 0 {
                return Err(KnitScriptError::value_error("range() step must not be zero"));
            }
            let mut items = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i += step;
            }
            Ok(Value::list(items))
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_string).unwrap_or_default()))
        }
        Builtin::Int => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Float(n)) => Ok(Value::Int(n.trunc() as i64)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| {
                    KnitScriptError::value_error(format!("invalid literal for int(): '{}'", s))
                }),
                Some(other) => Ok(Value::Int(other.expect_int("int() argument")?)),
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => s.trim().parse().map(Value::Float).map_err(|_| {
                    KnitScriptError::value_error(format!("could not convert string to float: '{}'", s))
                }),
                Some(other) => Ok(Value::Float(number(name, other)?)),
            }
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().map_or(false, Value::is_truthy)))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(value) => Ok(Value::list(value.iterate()?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(value) => Ok(Value::tuple(value.iterate()?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            let mut entries = Vec::new();
            if let Some(pairs) = args.first() {
                for pair in pairs.iterate()? {
                    match pair.iterate()?.as_slice() {
                        [key, value] => entries.push((key.clone(), value.clone())),
                        _ => {
                            return Err(KnitScriptError::value_error(
                                "dict() needs a sequence of key/value pairs",
                            ))
                        }
                    }
                }
            }
            Ok(Value::dict(entries))
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| KnitScriptError::value_error("integer overflow")),
                other => Ok(Value::Float(number(name, other)?.abs())),
            }
        }
        Builtin::Min => extreme(name, args, Ordering::Less),
        Builtin::Max => extreme(name, args, Ordering::Greater),
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in args[0].iterate()? {
                total = binary_op(BinaryOp::Add, &total, &item, 1, &mut Vec::new())?;
            }
            Ok(total)
        }
        Builtin::Sorted => {
            arity(name, &args, 1, 1)?;
            let mut reverse = false;
            for (key, value) in &kwargs {
                match key.as_str() {
                    "reverse" => reverse = value.is_truthy(),
                    other => {
                        return Err(KnitScriptError::name_error(format!(
                            "sorted() got an unexpected keyword argument '{}'",
                            other
                        )))
                    }
                }
            }
            let mut items = args[0].iterate()?;
            sort_values(&mut items)?;
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        Builtin::Reversed => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iterate()?;
            items.reverse();
            Ok(Value::list(items))
        }
        Builtin::Enumerate => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1) {
                Some(start) => start.expect_int("enumerate() start")?,
                None => 0,
            };
            Ok(Value::list(
                args[0]
                    .iterate()?
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(Value::iterate)
                .collect::<KnitScriptResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::Round => {
            arity(name, &args, 1, 2)?;
            let x = number(name, &args[0])?;
            match args.get(1) {
                None | Some(Value::None) => Ok(Value::Int(round_even(x) as i64)),
                Some(digits) => {
                    let factor = 10f64.powi(digits.expect_int("round() ndigits")? as i32);
                    Ok(Value::Float(round_even(x * factor) / factor))
                }
            }
        }
        Builtin::Sqrt => {
            arity(name, &args, 1, 1)?;
            let x = number(name, &args[0])?;
            if x < 0.0 {
                return Err(KnitScriptError::value_error("math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        Builtin::Floor => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(number(name, &args[0])?.floor() as i64))
        }
        Builtin::Ceil => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(number(name, &args[0])?.ceil() as i64))
        }
    }
}

fn no_attribute(object: &Value, name: &str) -> KnitScriptError {
    KnitScriptError::attribute_error(format!(
        "'{}' object has no attribute '{}'",
        object.type_name(),
        name
    ))
}

/// Read `object.name`
pub fn get_attribute(object: &Value, name: &str, gauge: u32) -> KnitScriptResult<Value> {
    let g = i64::from(gauge.max(1));
    match (object, name) {
        (Value::Needle(n), "position") => Ok(Value::Int(n.position.div_euclid(g))),
        (Value::Needle(n), "actual_position") => Ok(Value::Int(n.position)),
        (Value::Needle(n), "is_front") => Ok(Value::Bool(n.is_front())),
        (Value::Needle(n), "is_back") => Ok(Value::Bool(n.is_back())),
        (Value::Needle(n), "is_slider") => Ok(Value::Bool(n.is_slider)),
        (Value::Sheet(s), "sheet") => Ok(Value::Int(i64::from(s.sheet))),
        (Value::Sheet(s), "gauge") => Ok(Value::Int(i64::from(s.gauge))),
        (Value::Carrier(cs), "carrier_ids") => Ok(Value::list(
            cs.ids().iter().map(|id| Value::Int(i64::from(*id))).collect(),
        )),
        (Value::Error(e), "message") => Ok(Value::Str(e.message())),
        (Value::Error(e), "type") => Ok(Value::str(e.type_name())),
        (Value::Module(m), _) => m
            .namespace
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                KnitScriptError::attribute_error(format!(
                    "module '{}' has no attribute '{}'",
                    m.name, name
                ))
            }),
        _ => Err(no_attribute(object, name)),
    }
}

fn list_index(len: usize, index: i64) -> KnitScriptResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(KnitScriptError::index_error(format!(
            "list index {} out of range",
            index
        )));
    }
    Ok(resolved as usize)
}

/// Call `object.name(args)` for values that are not modules
pub fn call_method(object: &Value, name: &str, args: Vec<Value>, gauge: u32) -> KnitScriptResult<Value> {
    let g = i64::from(gauge.max(1));
    match object {
        Value::List(items) => match name {
            "append" => {
                arity(name, &args, 1, 1)?;
                items.borrow_mut().extend(args);
                Ok(Value::None)
            }
            "extend" => {
                arity(name, &args, 1, 1)?;
                let extra = args[0].iterate()?;
                items.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                arity(name, &args, 2, 2)?;
                let mut items = items.borrow_mut();
                let len = items.len() as i64;
                let index = args[0].expect_int("insert() index")?;
                let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(index as usize, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(name, &args, 0, 1)?;
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    return Err(KnitScriptError::index_error("pop from empty list"));
                }
                let index = match args.first() {
                    Some(index) => list_index(items.len(), index.expect_int("pop() index")?)?,
                    None => items.len() - 1,
                };
                Ok(items.remove(index))
            }
            "index" => {
                arity(name, &args, 1, 1)?;
                items
                    .borrow()
                    .iter()
                    .position(|v| *v == args[0])
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| {
                        KnitScriptError::value_error(format!("{} is not in list", args[0].repr()))
                    })
            }
            "count" => {
                arity(name, &args, 1, 1)?;
                let count = items.borrow().iter().filter(|v| **v == args[0]).count();
                Ok(Value::Int(count as i64))
            }
            "reverse" => {
                arity(name, &args, 0, 0)?;
                items.borrow_mut().reverse();
                Ok(Value::None)
            }
            "sort" => {
                arity(name, &args, 0, 0)?;
                sort_values(&mut items.borrow_mut())?;
                Ok(Value::None)
            }
            _ => Err(no_attribute(object, name)),
        },
        Value::Dict(entries) => match name {
            "keys" => Ok(Value::list(entries.borrow().iter().map(|(k, _)| k.clone()).collect())),
            "values" => Ok(Value::list(entries.borrow().iter().map(|(_, v)| v.clone()).collect())),
            "items" => Ok(Value::list(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )),
            "get" => {
                arity(name, &args, 1, 2)?;
                Ok(object
                    .dict_get(&args[0])
                    .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
            }
            "pop" => {
                arity(name, &args, 1, 2)?;
                let mut entries = entries.borrow_mut();
                match entries.iter().position(|(k, _)| *k == args[0]) {
                    Some(i) => Ok(entries.remove(i).1),
                    None => args
                        .get(1)
                        .cloned()
                        .ok_or_else(|| KnitScriptError::key_error(args[0].repr())),
                }
            }
            _ => Err(no_attribute(object, name)),
        },
        Value::Str(s) => {
            let text_arg = |i: usize| -> KnitScriptResult<String> {
                match args.get(i) {
                    Some(Value::Str(t)) => Ok(t.clone()),
                    Some(other) => Err(KnitScriptError::type_error(format!(
                        "{}() argument must be str, not '{}'",
                        name,
                        other.type_name()
                    ))),
                    None => Err(KnitScriptError::type_error(format!(
                        "{}() missing a string argument",
                        name
                    ))),
                }
            };
            match name {
                "upper" => Ok(Value::Str(s.to_uppercase())),
                "lower" => Ok(Value::Str(s.to_lowercase())),
                "strip" => Ok(Value::str(s.trim())),
                "split" => {
                    let parts: Vec<Value> = match args.first() {
                        Some(_) => {
                            let sep = text_arg(0)?;
                            s.split(sep.as_str()).map(Value::str).collect()
                        }
                        None => s.split_whitespace().map(Value::str).collect(),
                    };
                    Ok(Value::list(parts))
                }
                "join" => {
                    arity(name, &args, 1, 1)?;
                    let parts: Vec<String> =
                        args[0].iterate()?.iter().map(Value::to_string).collect();
                    Ok(Value::Str(parts.join(s.as_str())))
                }
                "startswith" => Ok(Value::Bool(s.starts_with(text_arg(0)?.as_str()))),
                "endswith" => Ok(Value::Bool(s.ends_with(text_arg(0)?.as_str()))),
                "replace" => Ok(Value::Str(s.replace(text_arg(0)?.as_str(), &text_arg(1)?))),
                _ => Err(no_attribute(object, name)),
            }
        }
        Value::Needle(n) => match name {
            "offset" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Needle(n.offset(args[0].expect_int("offset")? * g)))
            }
            "opposite" => Ok(Value::Needle(n.opposite())),
            "main_needle" => Ok(Value::Needle(n.main_needle())),
            "slider_needle" => Ok(Value::Needle(n.slider_needle())),
            _ => Err(no_attribute(object, name)),
        },
        _ => Err(no_attribute(object, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::needle::Needle;

    fn call(builtin: Builtin, args: Vec<Value>) -> KnitScriptResult<Value> {
        call_builtin(builtin, args, Vec::new())
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(call(Builtin::Range, vec![Value::Int(3)]).unwrap().to_string(), "[0, 1, 2]");
        assert_eq!(
            call(Builtin::Range, vec![Value::Int(5), Value::Int(0), Value::Int(-2)])
                .unwrap()
                .to_string(),
            "[5, 3, 1]"
        );
        assert!(call(Builtin::Range, vec![Value::Int(0), Value::Int(3), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_sorted_min_max() {
        let items = Value::list(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        assert_eq!(
            call_builtin(
                Builtin::Sorted,
                vec![items.clone()],
                vec![("reverse".to_string(), Value::Bool(true))]
            )
            .unwrap()
            .to_string(),
            "[3, 2, 1.5]"
        );
        assert_eq!(call(Builtin::Min, vec![items.clone()]).unwrap(), Value::Float(1.5));
        assert_eq!(call(Builtin::Max, vec![Value::Int(1), Value::Int(4)]).unwrap(), Value::Int(4));
        let err = call(Builtin::Max, vec![Value::list(Vec::new())]).unwrap_err();
        assert_eq!(err.type_name(), "ValueError");
    }

    #[test]
    fn test_unexpected_keyword() {
        let err = call_builtin(
            Builtin::Len,
            vec![Value::str("ab")],
            vec![("size".to_string(), Value::Int(1))],
        )
        .unwrap_err();
        assert_eq!(err.type_name(), "NameError");
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(call(Builtin::Round, vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(call(Builtin::Round, vec![Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            call(Builtin::Round, vec![Value::Float(1.234), Value::Int(2)]).unwrap(),
            Value::Float(1.23)
        );
    }

    #[test]
    fn test_list_methods_mutate_in_place() {
        let items = Value::list(vec![Value::Int(1)]);
        call_method(&items, "append", vec![Value::Int(2)], 1).unwrap();
        call_method(&items, "insert", vec![Value::Int(0), Value::Int(0)], 1).unwrap();
        assert_eq!(items.to_string(), "[0, 1, 2]");
        assert_eq!(call_method(&items, "pop", Vec::new(), 1).unwrap(), Value::Int(2));
        assert_eq!(items.to_string(), "[0, 1]");
    }

    #[test]
    fn test_needle_attributes_are_sheet_local() {
        let needle = Value::Needle(Needle::back(7));
        assert_eq!(get_attribute(&needle, "position", 2).unwrap(), Value::Int(3));
        assert_eq!(get_attribute(&needle, "actual_position", 2).unwrap(), Value::Int(7));
        assert_eq!(get_attribute(&needle, "is_back", 2).unwrap(), Value::Bool(true));
        assert_eq!(
            call_method(&needle, "offset", vec![Value::Int(1)], 2).unwrap(),
            Value::Needle(Needle::back(9))
        );
        let err = get_attribute(&needle, "colour", 1).unwrap_err();
        assert_eq!(err.type_name(), "AttributeError");
    }

    #[test]
    fn test_math_module() {
        let math = host_module("math").unwrap();
        let sqrt = get_attribute(&math, "sqrt", 1).unwrap();
        assert_eq!(sqrt, Value::Builtin(Builtin::Sqrt));
        assert!(host_module("os").is_none());
    }
}
