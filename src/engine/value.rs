//! Значения движка.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::promise::Promise;

/// Ячейка привязки модуля. `None` — привязка ещё не инициализирована.
pub(crate) type Binding = Rc<RefCell<Option<Value>>>;

/// Представление рантайм-значений.
#[derive(Debug, Clone)]
pub enum Value {
    /// Unit (отсутствие значения)
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Запись (структура)
    Record(BTreeMap<String, Value>),
    /// Ошибка, созданная самим движком (ReferenceError, TypeError, ...)
    Error(String),
    /// Пространство имён модуля
    Namespace(Namespace),
    /// Изменяемый объект (например, `import-meta`)
    Object(Object),
    /// Обещание (результат `dynamic-import`)
    Promise(Promise<Value, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise<Value, Value>> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Истинность в условиях `if`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Unit => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Error(_) => "error",
            Value::Namespace(_) => "namespace",
            Value::Object(_) => "object",
            Value::Promise(_) => "promise",
        }
    }

    /// Преобразовать JSON в значение движка.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Unit,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Преобразовать значение в JSON (для вывода пространств имён).
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Unit => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error(msg) => serde_json::json!({ "error": msg }),
            Value::Namespace(ns) => ns.to_json(),
            Value::Object(obj) => Json::Object(
                obj.0
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Promise(p) => Json::String(format!("{:?}", p)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Record(fields) => {
                let items: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Value::Error(msg) => write!(f, "{}", msg),
            Value::Namespace(ns) => write!(f, "<namespace {}>", ns.url()),
            Value::Object(obj) => write!(f, "<object ({} keys)>", obj.len()),
            Value::Promise(p) => write!(f, "{:?}", p),
        }
    }
}

/// Пространство имён модуля: живое, только для чтения, представление
/// экспортированных привязок.
#[derive(Clone)]
pub struct Namespace(Rc<NamespaceInner>);

struct NamespaceInner {
    url: String,
    exports: BTreeMap<String, Binding>,
}

impl Namespace {
    pub(crate) fn new(url: String, exports: BTreeMap<String, Binding>) -> Self {
        Self(Rc::new(NamespaceInner { url, exports }))
    }

    /// Url модуля-владельца.
    pub fn url(&self) -> &str {
        &self.0.url
    }

    /// Текущее значение экспорта. `None`, если имя не экспортируется
    /// или привязка ещё не инициализирована.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.exports.get(name)?.borrow().clone()
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.exports.contains_key(name)
    }

    /// Имена экспортов в отсортированном порядке.
    pub fn names(&self) -> Vec<String> {
        self.0.exports.keys().cloned().collect()
    }

    pub(crate) fn binding(&self, name: &str) -> Option<Binding> {
        self.0.exports.get(name).cloned()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let exports = self
            .0
            .exports
            .iter()
            .map(|(name, cell)| {
                let value = cell
                    .borrow()
                    .as_ref()
                    .map(Value::to_json)
                    .unwrap_or(serde_json::Value::Null);
                (name.clone(), value)
            })
            .collect();
        serde_json::Value::Object(exports)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("url", &self.0.url)
            .field("exports", &self.names())
            .finish()
    }
}

/// Изменяемый объект со строковыми ключами.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<BTreeMap<String, Value>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}
