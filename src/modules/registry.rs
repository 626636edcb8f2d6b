//! Реестр модулей.
//!
//! Таблица `идентификатор -> записи модулей`. Идентификатор назначается
//! движком и может совпадать у разных модулей, поэтому каждая выборка
//! дополнительно сверяет дескриптор скомпилированного модуля.
//!
//! Реестр не владеет записями: он хранит слабые ссылки, а запись сама
//! удаляет себя из реестра при уничтожении.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::trace;

use super::record::{ModuleHandle, ModuleRecord};
use crate::engine::SourceModule;

/// Реестр записей модулей.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    /// Кандидаты по идентификатору
    entries: HashMap<u32, Vec<Weak<ModuleRecord>>>,
}

impl ModuleRegistry {
    /// Создать пустой реестр.
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать запись под идентификатором.
    pub fn register(&mut self, identity: u32, record: &ModuleHandle) {
        let candidates = self.entries.entry(identity).or_default();
        candidates.retain(|weak| weak.strong_count() > 0);
        candidates.push(Rc::downgrade(record));
        trace!(
            "Registered {} under identity {:#x} ({} candidates)",
            record.url(),
            identity,
            candidates.len()
        );
    }

    /// Удалить запись. Сравнение по адресу, поэтому работает и для
    /// записи, которая уже уничтожается.
    pub fn unregister(&mut self, identity: u32, record: *const ModuleRecord) -> bool {
        let Some(candidates) = self.entries.get_mut(&identity) else {
            return false;
        };
        let before = candidates.len();
        candidates.retain(|weak| !std::ptr::eq(weak.as_ptr(), record));
        let removed = candidates.len() != before;
        if candidates.is_empty() {
            self.entries.remove(&identity);
        }
        removed
    }

    /// Найти запись, владеющую скомпилированным модулем `module`.
    pub fn lookup(&self, module: &SourceModule) -> Option<ModuleHandle> {
        self.entries
            .get(&module.identity_hash())?
            .iter()
            .filter_map(Weak::upgrade)
            .find(|record| record.module().ptr_eq(module))
    }

    /// Количество живых записей.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
