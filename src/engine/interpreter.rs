//! Рекурсивный интерпретатор тела модуля.
//!
//! Выполняет формы верхнего уровня по порядку. Исключение модуля — это
//! любое значение, переданное в `throw`, либо `Value::Error` с префиксом
//! вида ошибки (`TypeError`, `ReferenceError`, `SyntaxError`, `RangeError`).

use std::cmp::Ordering;

use super::module::{ImportedBinding, SourceModule};
use super::value::Value;
use crate::parser::{Atom, SExpr, Spanned};

type EvalResult = Result<Value, Value>;

fn type_error(message: impl std::fmt::Display) -> Value {
    Value::Error(format!("TypeError: {}", message))
}

fn reference_error(message: impl std::fmt::Display) -> Value {
    Value::Error(format!("ReferenceError: {}", message))
}

fn syntax_error(message: impl std::fmt::Display) -> Value {
    Value::Error(format!("SyntaxError: {}", message))
}

/// Интерпретатор одного модуля.
pub(crate) struct Evaluator<'m> {
    module: &'m SourceModule,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m SourceModule) -> Self {
        Self { module }
    }

    /// Выполнить тело модуля. Возвращает значение последней формы.
    pub fn run(&self) -> EvalResult {
        let mut last = Value::Unit;
        for form in self.module.body() {
            last = if form.form_name() == Some("let") {
                self.eval_let(form)?
            } else {
                self.eval(form)?
            };
        }
        Ok(last)
    }

    fn eval_let(&self, form: &SExpr) -> EvalResult {
        let list = form.as_list().unwrap_or_default();
        let (Some(name), Some(init)) = (list.get(1).and_then(SExpr::as_ident), list.get(2)) else {
            return Err(syntax_error("expected (let name value)"));
        };
        let value = self.eval(init)?;
        let binding = self
            .module
            .local(name)
            .ok_or_else(|| reference_error(format!("'{}' is not declared", name)))?;
        *binding.borrow_mut() = Some(value);
        Ok(Value::Unit)
    }

    /// Вычислить выражение. Стек расширяется при глубокой вложенности.
    fn eval(&self, expr: &SExpr) -> EvalResult {
        // 256KB red zone, 8MB stack growth
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.eval_expr(expr))
    }

    fn eval_expr(&self, expr: &SExpr) -> EvalResult {
        match expr {
            SExpr::Atom(Spanned { value, .. }) => self.eval_atom(value),
            SExpr::List(Spanned { value: items, .. }) => {
                let Some((head, args)) = items.split_first() else {
                    return Ok(Value::Unit);
                };
                match head.as_ident().or_else(|| head.as_symbol()) {
                    Some(name) => self.eval_form(name, args),
                    None => Err(type_error("form head is not a name")),
                }
            }
        }
    }

    fn eval_atom(&self, atom: &Atom) -> EvalResult {
        match atom {
            Atom::Int(n) => Ok(Value::Int(*n)),
            Atom::Float(f) => Ok(Value::Float(*f)),
            Atom::String(s) => Ok(Value::String(s.clone())),
            Atom::Keyword(k) => Ok(Value::String(k.clone())),
            Atom::Ident(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "unit" => Ok(Value::Unit),
                _ => self.lookup(name),
            },
            Atom::Symbol(s) => Err(syntax_error(format!("unexpected operator '{}'", s))),
        }
    }

    fn lookup(&self, name: &str) -> EvalResult {
        if let Some(binding) = self.module.local(name) {
            return binding.borrow().clone().ok_or_else(|| {
                reference_error(format!("cannot access '{}' before initialization", name))
            });
        }
        match self.module.imported(name) {
            Some(ImportedBinding::Cell(binding)) => binding.borrow().clone().ok_or_else(|| {
                reference_error(format!("cannot access '{}' before initialization", name))
            }),
            Some(ImportedBinding::Namespace(namespace)) => Ok(Value::Namespace(namespace)),
            None => self
                .module
                .context()
                .global(name)
                .ok_or_else(|| reference_error(format!("'{}' is not defined", name))),
        }
    }

    fn eval_args(&self, args: &[SExpr]) -> Result<Vec<Value>, Value> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval_form(&self, name: &str, args: &[SExpr]) -> EvalResult {
        match name {
            "let" | "import" | "export" => Err(syntax_error(format!(
                "'{}' is only allowed at module top level",
                name
            ))),

            "set" => {
                let (Some(target), Some(init)) = (args.first().and_then(SExpr::as_ident), args.get(1))
                else {
                    return Err(syntax_error("expected (set name value)"));
                };
                if self.module.imported(target).is_some() {
                    return Err(type_error(format!("assignment to imported binding '{}'", target)));
                }
                let binding = self
                    .module
                    .local(target)
                    .ok_or_else(|| reference_error(format!("'{}' is not defined", target)))?;
                if binding.borrow().is_none() {
                    return Err(reference_error(format!(
                        "cannot access '{}' before initialization",
                        target
                    )));
                }
                let value = self.eval(init)?;
                *binding.borrow_mut() = Some(value.clone());
                Ok(value)
            }

            "print" => {
                let line = self
                    .eval_args(args)?
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.module.context().print(line);
                Ok(Value::Unit)
            }

            "str" => Ok(Value::String(
                self.eval_args(args)?.iter().map(Value::to_string).collect(),
            )),

            "array" => Ok(Value::Array(self.eval_args(args)?)),

            "+" => {
                let values = self.eval_args(args)?;
                if values.iter().any(|v| matches!(v, Value::String(_))) {
                    Ok(Value::String(values.iter().map(Value::to_string).collect()))
                } else {
                    values.into_iter().try_fold(Value::Int(0), |acc, v| arithmetic("+", acc, v))
                }
            }

            "-" | "*" | "/" | "%" => {
                let mut values = self.eval_args(args)?.into_iter();
                let first = values
                    .next()
                    .ok_or_else(|| type_error(format!("'{}' expects operands", name)))?;
                let rest: Vec<Value> = values.collect();
                if rest.is_empty() && name == "-" {
                    return arithmetic("-", Value::Int(0), first);
                }
                rest.into_iter().try_fold(first, |acc, v| arithmetic(name, acc, v))
            }

            "==" | "!=" => {
                let (a, b) = self.eval_pair(name, args)?;
                Ok(Value::Bool((a == b) == (name == "==")))
            }

            "<" | ">" | "<=" | ">=" => {
                let (a, b) = self.eval_pair(name, args)?;
                let ordering = compare(&a, &b)?;
                Ok(Value::Bool(match name {
                    "<" => ordering == Ordering::Less,
                    ">" => ordering == Ordering::Greater,
                    "<=" => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }

            "not" => {
                let value = self.eval_one(name, args)?;
                Ok(Value::Bool(!value.is_truthy()))
            }

            "if" => {
                let condition = args
                    .first()
                    .ok_or_else(|| syntax_error("expected (if cond then [else])"))?;
                if self.eval(condition)?.is_truthy() {
                    args.get(1).map_or(Ok(Value::Unit), |then| self.eval(then))
                } else {
                    args.get(2).map_or(Ok(Value::Unit), |other| self.eval(other))
                }
            }

            "do" => {
                let mut last = Value::Unit;
                for arg in args {
                    last = self.eval(arg)?;
                }
                Ok(last)
            }

            "throw" => Err(self.eval_one(name, args)?),

            "dynamic-import" => {
                let specifier = match self.eval_one(name, args)? {
                    Value::String(specifier) => specifier,
                    other => {
                        return Err(type_error(format!(
                            "dynamic-import expects a string, got {}",
                            other.type_name()
                        )))
                    }
                };
                let context = self.module.context();
                let promise = context.engine().import_module_dynamically(
                    context,
                    &specifier,
                    self.module.url(),
                );
                Ok(Value::Promise(promise))
            }

            "import-meta" => Ok(Value::Object(self.module.import_meta()?)),

            "get" => {
                let (target, key) = self.eval_pair(name, args)?;
                get_member(&target, &key)
            }

            _ => Err(reference_error(format!("'{}' is not a known form", name))),
        }
    }

    fn eval_one(&self, name: &str, args: &[SExpr]) -> EvalResult {
        match args {
            [arg] => self.eval(arg),
            _ => Err(type_error(format!("'{}' expects 1 argument", name))),
        }
    }

    fn eval_pair(&self, name: &str, args: &[SExpr]) -> Result<(Value, Value), Value> {
        match args {
            [a, b] => Ok((self.eval(a)?, self.eval(b)?)),
            _ => Err(type_error(format!("'{}' expects 2 arguments", name))),
        }
    }
}

fn arithmetic(op: &str, a: Value, b: Value) -> EvalResult {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                "/" if b == 0 => return Err(Value::Error("RangeError: division by zero".into())),
                "/" => a.checked_div(b),
                _ if b == 0 => return Err(Value::Error("RangeError: division by zero".into())),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| Value::Error("RangeError: integer overflow".into()))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(op, a, b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(op, a as f64, b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(op, a, b as f64))),
        (a, b) => Err(type_error(format!(
            "cannot apply '{}' to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn float_op(op: &str, a: f64, b: f64) -> f64 {
    match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        _ => a % b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, Value> {
    let ordering = match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        type_error(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))
    })
}

fn get_member(target: &Value, key: &Value) -> EvalResult {
    match (target, key) {
        (Value::Object(object), Value::String(key)) => Ok(object.get(key).unwrap_or(Value::Unit)),
        (Value::Record(fields), Value::String(key)) => {
            Ok(fields.get(key).cloned().unwrap_or(Value::Unit))
        }
        (Value::Namespace(namespace), Value::String(key)) => {
            if !namespace.has(key) {
                return Ok(Value::Unit);
            }
            namespace.get(key).ok_or_else(|| {
                reference_error(format!("cannot access '{}' before initialization", key))
            })
        }
        (Value::Array(items), Value::Int(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Unit)),
        (target, key) => Err(type_error(format!(
            "cannot read {} of {}",
            key.type_name(),
            target.type_name()
        ))),
    }
}
