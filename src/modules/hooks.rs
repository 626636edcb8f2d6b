//! Возможности хоста: разрешение зависимостей, динамический импорт,
//! инициализация `import-meta`.
//!
//! Каждая возможность — трейт с реализацией для замыканий. Активными
//! бывают только один хук динамического импорта и один хук метаданных:
//! новая регистрация полностью заменяет предыдущую.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use super::record::{ModuleFuture, ModuleHandle};
use crate::engine::{Namespace, Object, Promise};
use crate::error::{LoaderError, LoaderResult};

/// Будущее пространства имён модуля.
pub type NamespaceFuture = Promise<Namespace, LoaderError>;

/// Разрешение спецификатора в будущую запись модуля (используется Link).
pub trait Resolver {
    fn resolve(&mut self, specifier: &str) -> LoaderResult<ModuleFuture>;
}

impl<F> Resolver for F
where
    F: FnMut(&str) -> LoaderResult<ModuleFuture>,
{
    fn resolve(&mut self, specifier: &str) -> LoaderResult<ModuleFuture> {
        self(specifier)
    }
}

/// Хук динамического импорта: `(спецификатор, url вызывающего модуля)`.
///
/// Хук сам проводит модуль через весь конвейер и возвращает будущее
/// пространства имён.
pub trait DynamicImportHook {
    fn import(&self, specifier: &str, referrer: &str) -> NamespaceFuture;
}

impl<F> DynamicImportHook for F
where
    F: Fn(&str, &str) -> NamespaceFuture,
{
    fn import(&self, specifier: &str, referrer: &str) -> NamespaceFuture {
        self(specifier, referrer)
    }
}

/// Хук заполнения объекта `import-meta` при его первом создании.
pub trait ImportMetaHook {
    fn initialize(&self, module: &ModuleHandle, meta: &Object) -> LoaderResult<()>;
}

impl<F> ImportMetaHook for F
where
    F: Fn(&ModuleHandle, &Object) -> LoaderResult<()>,
{
    fn initialize(&self, module: &ModuleHandle, meta: &Object) -> LoaderResult<()> {
        self(module, meta)
    }
}

/// Текущие хуки хоста.
#[derive(Default)]
pub(crate) struct HostHooks {
    dynamic_import: RefCell<Option<Rc<dyn DynamicImportHook>>>,
    import_meta: RefCell<Option<Rc<dyn ImportMetaHook>>>,
}

impl HostHooks {
    /// Установить хук динамического импорта. `true`, если он заменил прежний.
    pub fn set_dynamic_import(&self, hook: Rc<dyn DynamicImportHook>) -> bool {
        let replaced = self.dynamic_import.borrow_mut().replace(hook).is_some();
        if replaced {
            debug!("Dynamic import hook replaced");
        }
        replaced
    }

    /// Установить хук `import-meta`. `true`, если он заменил прежний.
    pub fn set_import_meta(&self, hook: Rc<dyn ImportMetaHook>) -> bool {
        let replaced = self.import_meta.borrow_mut().replace(hook).is_some();
        if replaced {
            debug!("Import meta hook replaced");
        }
        replaced
    }

    pub fn dynamic_import(&self) -> Option<Rc<dyn DynamicImportHook>> {
        self.dynamic_import.borrow().clone()
    }

    pub fn import_meta(&self) -> Option<Rc<dyn ImportMetaHook>> {
        self.import_meta.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_last_registration_wins() {
        let hooks = HostHooks::default();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        let counter = first.clone();
        assert!(!hooks.set_dynamic_import(Rc::new(move |_: &str, _: &str| -> NamespaceFuture {
            counter.set(counter.get() + 1);
            Promise::pending()
        })));
        let counter = second.clone();
        assert!(hooks.set_dynamic_import(Rc::new(move |_: &str, _: &str| -> NamespaceFuture {
            counter.set(counter.get() + 1);
            Promise::pending()
        })));

        let hook = hooks.dynamic_import().unwrap();
        hook.import("./x", "mem:/a.asg");
        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn test_empty_hooks() {
        let hooks = HostHooks::default();
        assert!(hooks.dynamic_import().is_none());
        assert!(hooks.import_meta().is_none());
    }
}
