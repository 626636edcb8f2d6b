//! Жизненный цикл модуля: Compile, Link, Instantiate, Evaluate, GetNamespace.
//!
//! Связывание двухфазное. `link` вызывает резолвер для каждой зависимости и
//! складывает полученные будущие в кэш разрешения записи, ничего не
//! ожидая. Вызывающий ждёт завершения всех будущих и только потом вызывает
//! `instantiate`: движок обходит граф синхронно, а колбэк разрешения
//! читает исключительно уже завершённые будущие из кэша.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace, warn};

use super::hooks::{DynamicImportHook, HostHooks, ImportMetaHook, Resolver};
use super::record::{ModuleFuture, ModuleHandle, ModuleRecord, ModuleStatus};
use super::registry::ModuleRegistry;
use crate::config::ModuleConfig;
use crate::engine::{
    Context, Engine, Namespace, Object, Promise, PromiseState, SourceModule, Value,
};
use crate::error::{LinkError, LoaderError, LoaderResult};

/// Компоновщик модулей одного движка.
pub struct ModuleLinker {
    engine: Engine,
    context: Context,
    registry: Rc<RefCell<ModuleRegistry>>,
    hooks: Rc<HostHooks>,
}

impl ModuleLinker {
    /// Компоновщик с новым движком по умолчанию.
    pub fn new() -> Self {
        Self::with_engine(Engine::default())
    }

    pub fn with_config(config: &ModuleConfig) -> Self {
        Self::with_engine(Engine::new(config.identity_hash_bits))
    }

    /// Компоновщик поверх существующего движка. Колбэки движка
    /// устанавливаются при регистрации хуков.
    pub fn with_engine(engine: Engine) -> Self {
        let context = Context::new(&engine);
        Self {
            engine,
            context,
            registry: Rc::new(RefCell::new(ModuleRegistry::new())),
            hooks: Rc::new(HostHooks::default()),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Контекст по умолчанию.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Найти запись по скомпилированному модулю.
    pub fn lookup(&self, module: &SourceModule) -> Option<ModuleHandle> {
        let found = self.registry.borrow().lookup(module);
        found
    }

    /// Количество живых записей в реестре.
    pub fn registry_len(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Скомпилировать модуль в контексте по умолчанию.
    pub fn compile(&self, source: &str, url: &str) -> LoaderResult<ModuleHandle> {
        self.compile_in(&self.context, source, url)
    }

    /// Скомпилировать модуль в заданном контексте.
    pub fn compile_in(&self, context: &Context, source: &str, url: &str) -> LoaderResult<ModuleHandle> {
        if !context.engine().ptr_eq(&self.engine) {
            return Err(LoaderError::Config(format!(
                "context for {} belongs to a different engine",
                url
            )));
        }

        let module = SourceModule::compile(context, source, url).map_err(|e| {
            LoaderError::Compile {
                url: url.to_string(),
                diagnostic: e.diagnostic(url, source),
            }
        })?;

        let record = ModuleRecord::create(module, &self.registry);
        debug!(
            "Compiled {} (identity {:#x}, {} dependencies)",
            url,
            record.module().identity_hash(),
            record.dependencies().len()
        );
        Ok(record)
    }

    /// Запросить разрешение всех зависимостей.
    ///
    /// Возвращает будущие в порядке `dependencies()`. Ошибка резолвера
    /// прерывает оставшиеся запросы.
    pub fn link<R: Resolver>(
        &self,
        record: &ModuleHandle,
        mut resolver: R,
    ) -> LoaderResult<Vec<ModuleFuture>> {
        let status = record.status();
        if status != ModuleStatus::Compiled {
            return Err(LinkError::InvalidState {
                url: record.url().to_string(),
                status,
            }
            .into());
        }
        record.set_phase(ModuleStatus::Linking);

        let mut futures = Vec::with_capacity(record.dependencies().len());
        for specifier in record.dependencies() {
            trace!("Resolving '{}' for {}", specifier, record.url());
            let future = resolver.resolve(specifier).map_err(|reason| {
                warn!("Resolver failed for '{}' in {}: {}", specifier, record.url(), reason);
                LinkError::Resolver {
                    specifier: specifier.clone(),
                    reason: Box::new(reason),
                }
            })?;
            record.cache_insert(specifier, future.clone());
            futures.push(future);
        }

        debug!("Linking {} ({} requests)", record.url(), futures.len());
        Ok(futures)
    }

    /// Инстанцировать граф модуля.
    ///
    /// Кэш разрешения записи очищается в любом случае; при успехе
    /// очищаются и кэши всех записей, пройденных движком.
    pub fn instantiate(&self, record: &ModuleHandle) -> LoaderResult<()> {
        let status = record.status();
        if status != ModuleStatus::Linking {
            return Err(LoaderError::state(
                record.url(),
                status,
                "instantiate requires a linked module",
            ));
        }

        debug!("Instantiating {}", record.url());
        let registry = &self.registry;
        let mut failure: Option<LinkError> = None;
        let mut visited: Vec<ModuleHandle> = Vec::new();

        let result = record.module().instantiate(&mut |referrer: &SourceModule, specifier: &str| {
            match resolve_from_cache(registry, referrer, specifier) {
                Ok((dependent, dependency)) => {
                    visited.push(dependent);
                    Ok(dependency)
                }
                Err(err) => {
                    let exception = Value::Error(err.to_string());
                    failure.get_or_insert(err);
                    Err(exception)
                }
            }
        });

        record.clear_cache();
        match result {
            Ok(()) => {
                for dependent in &visited {
                    dependent.clear_cache();
                }
                debug!(
                    "Instantiated {} ({} resolutions)",
                    record.url(),
                    visited.len()
                );
                Ok(())
            }
            Err(reason) => {
                let err = failure.unwrap_or_else(|| LinkError::Engine {
                    url: record.url().to_string(),
                    reason,
                });
                warn!("Instantiation of {} failed: {}", record.url(), err);
                Err(err.into())
            }
        }
    }

    /// Выполнить тело модуля. Исключение модуля возвращается как
    /// [`LoaderError::Exception`] без обёртки.
    pub fn evaluate(&self, record: &ModuleHandle) -> LoaderResult<Value> {
        let status = record.status();
        if matches!(status, ModuleStatus::Compiled | ModuleStatus::Linking) {
            return Err(LoaderError::state(
                record.url(),
                status,
                "evaluate requires an instantiated module",
            ));
        }

        trace!("Evaluating {}", record.url());
        record.module().evaluate().map_err(|exception| {
            debug!("{} threw: {}", record.url(), exception);
            LoaderError::Exception(exception)
        })
    }

    /// Пространство имён модуля.
    pub fn namespace(&self, record: &ModuleHandle) -> LoaderResult<Namespace> {
        match record.status() {
            ModuleStatus::Instantiated | ModuleStatus::Evaluating | ModuleStatus::Evaluated => {
                Ok(record.module().namespace())
            }
            status => Err(LoaderError::state(
                record.url(),
                status,
                "namespace unavailable before instantiation",
            )),
        }
    }

    /// Установить хук динамического импорта, заменив прежний.
    pub fn set_dynamic_import_hook<H>(&self, hook: H)
    where
        H: DynamicImportHook + 'static,
    {
        self.hooks.set_dynamic_import(Rc::new(hook));

        let hooks = Rc::downgrade(&self.hooks);
        self.engine
            .set_host_import_module_dynamically_callback(Rc::new(
                move |_context: &Context, specifier: &str, referrer: &str| {
                    let Some(hook) = hooks.upgrade().and_then(|hooks| hooks.dynamic_import())
                    else {
                        return Promise::rejected(Value::Error(format!(
                            "TypeError: dynamic import of '{}' is not available",
                            specifier
                        )));
                    };
                    trace!("Dynamic import of '{}' from {}", specifier, referrer);
                    namespace_to_value(hook.import(specifier, referrer))
                },
            ));
    }

    /// Установить хук `import-meta`, заменив прежний.
    ///
    /// Если модуль не найден в реестре, объект метаданных остаётся
    /// пустым. Ошибка хука выбрасывается в тело модуля.
    pub fn set_import_meta_hook<H>(&self, hook: H)
    where
        H: ImportMetaHook + 'static,
    {
        self.hooks.set_import_meta(Rc::new(hook));

        let hooks = Rc::downgrade(&self.hooks);
        let registry = Rc::downgrade(&self.registry);
        self.engine
            .set_host_initialize_import_meta_object_callback(Rc::new(
                move |_context: &Context, module: &SourceModule, meta: &Object| {
                    let record = registry.upgrade().and_then(|registry| {
                        let found = registry.borrow().lookup(module);
                        found
                    });
                    let Some(record) = record else {
                        trace!("No record for {}; import-meta left empty", module.url());
                        return Ok(());
                    };
                    match hooks.upgrade().and_then(|hooks| hooks.import_meta()) {
                        Some(hook) => hook
                            .initialize(&record, meta)
                            .map_err(LoaderError::into_exception),
                        None => Ok(()),
                    }
                },
            ));
    }
}

impl Default for ModuleLinker {
    fn default() -> Self {
        Self::new()
    }
}

/// Колбэк движка при инстанцировании: зависимость берётся только из
/// завершённого будущего в кэше записи-импортёра.
fn resolve_from_cache(
    registry: &RefCell<ModuleRegistry>,
    referrer: &SourceModule,
    specifier: &str,
) -> Result<(ModuleHandle, SourceModule), LinkError> {
    let dependent = registry
        .borrow()
        .lookup(referrer)
        .ok_or_else(|| LinkError::UnknownModule {
            url: referrer.url().to_string(),
        })?;

    let future = dependent
        .cached(specifier)
        .ok_or_else(|| LinkError::NotInCache {
            url: dependent.url().to_string(),
            specifier: specifier.to_string(),
        })?;

    let dependency = match future.state() {
        PromiseState::Fulfilled(record) => record.module().clone(),
        PromiseState::Pending => {
            return Err(LinkError::Unresolved {
                url: dependent.url().to_string(),
                specifier: specifier.to_string(),
            })
        }
        PromiseState::Rejected(reason) => {
            return Err(LinkError::Rejected {
                url: dependent.url().to_string(),
                specifier: specifier.to_string(),
                reason: Box::new(reason.clone()),
            })
        }
    };

    Ok((dependent, dependency))
}

/// Перевести будущее пространства имён в обещание движка.
fn namespace_to_value(namespace: Promise<Namespace, LoaderError>) -> Promise<Value, Value> {
    let settled = match namespace.state() {
        PromiseState::Fulfilled(ns) => Some(Ok(ns.clone())),
        PromiseState::Rejected(err) => Some(Err(err.clone())),
        PromiseState::Pending => None,
    };
    match settled {
        Some(Ok(ns)) => Promise::resolved(Value::Namespace(ns)),
        Some(Err(err)) => Promise::rejected(err.into_exception()),
        None => Promise::new(async move {
            namespace
                .await
                .map(Value::Namespace)
                .map_err(LoaderError::into_exception)
        }),
    }
}
