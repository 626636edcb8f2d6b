//! Встроенный движок модулей ASG.
//!
//! Движок компилирует исходный текст в [`SourceModule`], связывает граф
//! модулей (синхронный обход с колбэком разрешения зависимостей),
//! выполняет тела модулей и отдаёт их пространства имён. Хост общается с
//! движком через два слота колбэков: динамический импорт и
//! инициализация `import-meta`.
//!
//! Слой связывания (`crate::modules`) ничего не знает о внутреннем
//! устройстве движка и пользуется только этим интерфейсом.

mod interpreter;
mod module;
mod promise;
mod value;

pub use module::{SourceModule, Status};
pub use promise::{Promise, PromiseState};
pub use value::{Namespace, Object, Value};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Колбэк хоста для `dynamic-import`: (контекст, спецификатор, url вызывающего модуля).
pub type ImportModuleDynamicallyCallback = Rc<dyn Fn(&Context, &str, &str) -> Promise<Value, Value>>;

/// Колбэк хоста для первой материализации `import-meta` модуля.
pub type InitializeImportMetaCallback =
    Rc<dyn Fn(&Context, &SourceModule, &Object) -> Result<(), Value>>;

/// Ширина пространства идентификаторов по умолчанию (бит).
pub const DEFAULT_IDENTITY_HASH_BITS: u32 = 20;

/// Экземпляр движка. Дешёвый клонируемый дескриптор.
#[derive(Clone)]
pub struct Engine(Rc<EngineInner>);

struct EngineInner {
    identity_hash_bits: u32,
    modules_created: Cell<u32>,
    import_module_dynamically: RefCell<Option<ImportModuleDynamicallyCallback>>,
    initialize_import_meta: RefCell<Option<InitializeImportMetaCallback>>,
}

impl Engine {
    /// Создать движок с пространством идентификаторов шириной
    /// `identity_hash_bits` (0..=32). При 0 все модули получают один и тот
    /// же идентификатор.
    pub fn new(identity_hash_bits: u32) -> Self {
        Self(Rc::new(EngineInner {
            identity_hash_bits: identity_hash_bits.min(32),
            modules_created: Cell::new(0),
            import_module_dynamically: RefCell::new(None),
            initialize_import_meta: RefCell::new(None),
        }))
    }

    /// Следующий идентификатор модуля. Не уникален: значения из
    /// ограниченного пространства могут совпадать.
    pub(crate) fn next_identity_hash(&self) -> u32 {
        let n = self.0.modules_created.get().wrapping_add(1);
        self.0.modules_created.set(n);

        match self.0.identity_hash_bits {
            0 => 0,
            bits => n.wrapping_mul(0x9E37_79B1) >> (32 - bits),
        }
    }

    /// Установить колбэк динамического импорта. Предыдущий заменяется.
    pub fn set_host_import_module_dynamically_callback(
        &self,
        callback: ImportModuleDynamicallyCallback,
    ) {
        *self.0.import_module_dynamically.borrow_mut() = Some(callback);
    }

    /// Установить колбэк инициализации `import-meta`. Предыдущий заменяется.
    pub fn set_host_initialize_import_meta_object_callback(
        &self,
        callback: InitializeImportMetaCallback,
    ) {
        *self.0.initialize_import_meta.borrow_mut() = Some(callback);
    }

    pub(crate) fn import_module_dynamically(
        &self,
        context: &Context,
        specifier: &str,
        referrer: &str,
    ) -> Promise<Value, Value> {
        let callback = self.0.import_module_dynamically.borrow().clone();
        match callback {
            Some(callback) => callback(context, specifier, referrer),
            None => Promise::rejected(Value::Error(format!(
                "TypeError: dynamic import of '{}' is not supported by this host",
                specifier
            ))),
        }
    }

    pub(crate) fn initialize_import_meta(
        &self,
        context: &Context,
        module: &SourceModule,
        meta: &Object,
    ) -> Result<(), Value> {
        let callback = self.0.initialize_import_meta.borrow().clone();
        match callback {
            Some(callback) => callback(context, module, meta),
            None => Ok(()),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_HASH_BITS)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("identity_hash_bits", &self.0.identity_hash_bits)
            .field("modules_created", &self.0.modules_created.get())
            .finish()
    }
}

/// Контекст выполнения: глобальные привязки и вывод `print`.
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

struct ContextInner {
    engine: Engine,
    globals: RefCell<HashMap<String, Value>>,
    output: RefCell<Vec<String>>,
    echo: Cell<bool>,
}

impl Context {
    pub fn new(engine: &Engine) -> Self {
        Self(Rc::new(ContextInner {
            engine: engine.clone(),
            globals: RefCell::new(HashMap::new()),
            output: RefCell::new(Vec::new()),
            echo: Cell::new(false),
        }))
    }

    pub fn engine(&self) -> &Engine {
        &self.0.engine
    }

    /// Глобальная привязка, видимая всем модулям контекста.
    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.0.globals.borrow_mut().insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.0.globals.borrow().get(name).cloned()
    }

    /// Дублировать вывод `print` в stdout.
    pub fn set_echo(&self, echo: bool) {
        self.0.echo.set(echo);
    }

    /// Строки, напечатанные `print`.
    pub fn output(&self) -> Vec<String> {
        self.0.output.borrow().clone()
    }

    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.output.borrow_mut())
    }

    pub(crate) fn print(&self, line: String) {
        if self.0.echo.get() {
            println!("{}", line);
        }
        self.0.output.borrow_mut().push(line);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("globals", &self.0.globals.borrow().len())
            .field("output", &self.0.output.borrow().len())
            .finish()
    }
}
