//! Общие помощники интеграционных тестов.

#![allow(dead_code)]

use std::collections::HashMap;

use asg_linker::{LoaderError, LoaderResult, ModuleFuture, ModuleHandle, Promise};

/// Инициализировать логирование один раз на процесс.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Резолвер, сразу возвращающий уже завершённые будущие.
pub fn settled_resolver(
    records: Vec<(&'static str, ModuleHandle)>,
) -> impl FnMut(&str) -> LoaderResult<ModuleFuture> {
    let records: HashMap<&'static str, ModuleHandle> = records.into_iter().collect();
    move |specifier: &str| {
        records
            .get(specifier)
            .cloned()
            .map(Promise::resolved)
            .ok_or_else(|| LoaderError::ModuleNotFound {
                specifier: specifier.to_string(),
                referrer: None,
            })
    }
}

/// Резолвер для модуля без зависимостей.
pub fn no_dependencies(specifier: &str) -> LoaderResult<ModuleFuture> {
    panic!("unexpected resolution of '{}'", specifier)
}
