//! Запись модуля: скомпилированный модуль, его зависимости, кэш
//! разрешения и состояние жизненного цикла.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use log::warn;
use serde::Serialize;

use super::registry::ModuleRegistry;
use crate::engine::{Context, Promise, SourceModule, Status};
use crate::error::LoaderError;

/// Разделяемая ссылка на запись модуля.
pub type ModuleHandle = Rc<ModuleRecord>;

/// Будущее разрешения зависимости: запись модуля или ошибка.
pub type ModuleFuture = Promise<ModuleHandle, LoaderError>;

/// Состояние жизненного цикла записи. Меняется только вперёд.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Compiled,
    Linking,
    Instantiated,
    Evaluating,
    Evaluated,
    Errored,
}

/// Запись модуля.
pub struct ModuleRecord {
    /// Идентификатор в реестре; `None` после удаления из реестра
    identity: Cell<Option<u32>>,
    url: String,
    module: SourceModule,
    /// Спецификаторы зависимостей в порядке объявления
    dependencies: Vec<String>,
    resolve_cache: RefCell<HashMap<String, ModuleFuture>>,
    /// Собственная фаза записи (до инстанцирования)
    phase: Cell<ModuleStatus>,
    registry: Weak<RefCell<ModuleRegistry>>,
}

impl ModuleRecord {
    /// Создать запись для скомпилированного модуля и зарегистрировать её.
    pub(crate) fn create(
        module: SourceModule,
        registry: &Rc<RefCell<ModuleRegistry>>,
    ) -> ModuleHandle {
        let identity = module.identity_hash();
        let record = Rc::new(Self {
            identity: Cell::new(Some(identity)),
            url: module.url().to_string(),
            dependencies: module.requests().to_vec(),
            module,
            resolve_cache: RefCell::new(HashMap::new()),
            phase: Cell::new(ModuleStatus::Compiled),
            registry: Rc::downgrade(registry),
        });
        registry.borrow_mut().register(identity, &record);
        record
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn identity(&self) -> Option<u32> {
        self.identity.get()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Скомпилированный модуль движка.
    pub fn module(&self) -> &SourceModule {
        &self.module
    }

    pub fn context(&self) -> &Context {
        self.module.context()
    }

    /// Текущее состояние.
    ///
    /// Пока движок не инстанцировал модуль, это собственная фаза записи
    /// (`Compiled` или `Linking`); дальше состояние берётся у движка. Так
    /// зависимость, инстанцированная обходом графа другого модуля, тоже
    /// сообщает `Instantiated`.
    pub fn status(&self) -> ModuleStatus {
        match self.module.status() {
            Status::Uninstantiated | Status::Instantiating => self.phase.get(),
            Status::Instantiated => ModuleStatus::Instantiated,
            Status::Evaluating => ModuleStatus::Evaluating,
            Status::Evaluated => ModuleStatus::Evaluated,
            Status::Errored => ModuleStatus::Errored,
        }
    }

    pub(crate) fn set_phase(&self, phase: ModuleStatus) {
        self.phase.set(phase);
    }

    pub(crate) fn cache_insert(&self, specifier: &str, future: ModuleFuture) {
        self.resolve_cache
            .borrow_mut()
            .insert(specifier.to_string(), future);
    }

    pub(crate) fn cached(&self, specifier: &str) -> Option<ModuleFuture> {
        self.resolve_cache.borrow().get(specifier).cloned()
    }

    pub(crate) fn clear_cache(&self) {
        self.resolve_cache.borrow_mut().clear();
    }

    /// Количество записей в кэше разрешения.
    pub fn resolve_cache_len(&self) -> usize {
        self.resolve_cache.borrow().len()
    }
}

impl Drop for ModuleRecord {
    fn drop(&mut self) {
        let Some(identity) = self.identity.take() else {
            return;
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.try_borrow_mut() {
            Ok(mut registry) => {
                registry.unregister(identity, self as *const ModuleRecord);
            }
            Err(_) => warn!(
                "Module registry busy while dropping {}; entry left to be pruned",
                self.url
            ),
        };
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("url", &self.url)
            .field("identity", &self.identity.get())
            .field("status", &self.status())
            .field("dependencies", &self.dependencies)
            .field("resolve_cache", &self.resolve_cache_len())
            .finish()
    }
}
