//! Загрузчик модулей.
//!
//! Ведёт карту модулей `url -> ModuleJob` и проводит граф модулей через
//! компиляцию, связывание, инстанцирование и выполнение. Каждый url
//! загружается один раз.
//!
//! ```rust,ignore
//! use asg_linker::modules::{ModuleLoader, MemorySource};
//! use futures::executor::block_on;
//!
//! let source = MemorySource::new()
//!     .with_module("mem:/main.asg", r#"(import "./math" sq) (export y) (let y (sq 3))"#);
//! let loader = ModuleLoader::new(source);
//! let ns = block_on(loader.import("./main", None))?;
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::try_join_all;
use log::{debug, trace};

use super::hooks::NamespaceFuture;
use super::linker::ModuleLinker;
use super::record::{ModuleFuture, ModuleHandle, ModuleStatus};
use super::source::{FileSource, ModuleSource};
use crate::config::ModuleConfig;
use crate::engine::{Context, Object, Promise, PromiseState, Value};
use crate::error::{LoaderError, LoaderResult};

/// Текст синтетического модуля для `.json`: единственный экспорт
/// `default`, значение приходит через `import-meta`.
const JSON_MODULE_SOURCE: &str = "(export default)\n(let default (get (import-meta) \"default\"))\n";

type MetaInitializer = Box<dyn Fn(&Object)>;

/// Загрузчик модулей.
pub struct ModuleLoader {
    inner: Rc<LoaderInner>,
}

struct LoaderInner {
    linker: ModuleLinker,
    source: Box<dyn ModuleSource>,
    /// Карта модулей: url -> задача
    jobs: RefCell<HashMap<String, Rc<ModuleJob>>>,
    /// Разовые инициализаторы `import-meta` синтетических модулей
    meta_initializers: RefCell<HashMap<String, MetaInitializer>>,
    json_modules: bool,
}

/// Задача загрузки одного модуля.
pub struct ModuleJob {
    url: String,
    /// Скомпилированная запись
    module: ModuleFuture,
    /// Связывание: url зависимостей, после завершения всех их компиляций
    linked: Promise<Vec<String>, LoaderError>,
    instantiated: RefCell<Option<ModuleFuture>>,
}

fn upgrade(loader: &Weak<LoaderInner>) -> LoaderResult<Rc<LoaderInner>> {
    loader.upgrade().ok_or(LoaderError::LoaderDropped)
}

impl ModuleLoader {
    /// Загрузчик с новым компоновщиком.
    pub fn new<S: ModuleSource + 'static>(source: S) -> Self {
        Self::with_linker(ModuleLinker::new(), source, true)
    }

    /// Загрузчик файловых модулей по конфигурации.
    pub fn from_config(config: &ModuleConfig) -> Self {
        Self::with_linker(
            ModuleLinker::with_config(config),
            FileSource::from_config(config),
            config.json_modules,
        )
    }

    pub fn with_linker<S: ModuleSource + 'static>(
        linker: ModuleLinker,
        source: S,
        json_modules: bool,
    ) -> Self {
        let loader = Self {
            inner: Rc::new(LoaderInner {
                linker,
                source: Box::new(source),
                jobs: RefCell::new(HashMap::new()),
                meta_initializers: RefCell::new(HashMap::new()),
                json_modules,
            }),
        };
        loader.install_hooks();
        loader
    }

    pub fn linker(&self) -> &ModuleLinker {
        &self.inner.linker
    }

    pub fn context(&self) -> &Context {
        self.inner.linker.context()
    }

    /// Задача по url, если модуль уже загружается.
    pub fn job(&self, url: &str) -> Option<Rc<ModuleJob>> {
        self.inner.jobs.borrow().get(url).cloned()
    }

    /// Количество модулей в карте.
    pub fn job_count(&self) -> usize {
        self.inner.jobs.borrow().len()
    }

    /// Импортировать модуль и вернуть его пространство имён.
    ///
    /// Обещание ленивое: работа начинается при первом опросе.
    pub fn import(&self, specifier: &str, referrer: Option<&str>) -> NamespaceFuture {
        LoaderInner::import(&self.inner, specifier, referrer)
    }

    /// Установить хуки динамического импорта и `import-meta` этого
    /// загрузчика. Вызывается конструктором; повторный вызов возвращает
    /// хуки после их замены на компоновщике.
    pub fn install_hooks(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.linker.set_dynamic_import_hook(
            move |specifier: &str, referrer: &str| -> NamespaceFuture {
                match weak.upgrade() {
                    Some(inner) => LoaderInner::import(&inner, specifier, Some(referrer)),
                    None => Promise::rejected(LoaderError::LoaderDropped),
                }
            },
        );

        let weak = Rc::downgrade(&self.inner);
        self.inner.linker.set_import_meta_hook(
            move |record: &ModuleHandle, meta: &Object| -> LoaderResult<()> {
                meta.set("url", Value::String(record.url().to_string()));
                if let Some(inner) = weak.upgrade() {
                    let initializer = inner.meta_initializers.borrow_mut().remove(record.url());
                    if let Some(initializer) = initializer {
                        trace!("Running import-meta initializer for {}", record.url());
                        initializer(meta);
                    }
                }
                Ok(())
            },
        );
    }
}

impl LoaderInner {
    fn import(
        self: &Rc<Self>,
        specifier: &str,
        referrer: Option<&str>,
    ) -> NamespaceFuture {
        let loader = Rc::downgrade(self);
        let specifier = specifier.to_string();
        let referrer = referrer.map(str::to_string);

        Promise::new(async move {
            let job = {
                let inner = upgrade(&loader)?;
                let url = inner.source.resolve(&specifier, referrer.as_deref())?;
                inner.job(&url)
            };
            let record = job.run(&loader).await?;
            let inner = upgrade(&loader)?;
            inner.linker.namespace(&record)
        })
    }

    /// Задача для url; создаётся при первом обращении.
    fn job(self: &Rc<Self>, url: &str) -> Rc<ModuleJob> {
        if let Some(job) = self.jobs.borrow().get(url) {
            return job.clone();
        }
        let job = ModuleJob::new(Rc::downgrade(self), url);
        self.jobs.borrow_mut().insert(url.to_string(), job.clone());
        debug!("New module job for {}", url);
        job
    }

    fn find_job(&self, url: &str) -> LoaderResult<Rc<ModuleJob>> {
        self.jobs
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| LoaderError::ModuleNotFound {
                specifier: url.to_string(),
                referrer: None,
            })
    }

    fn compile(&self, url: &str) -> LoaderResult<ModuleHandle> {
        let text = self.source.fetch(url)?;
        if self.json_modules && url.ends_with(".json") {
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| LoaderError::Compile {
                    url: url.to_string(),
                    diagnostic: format!("{}: {}", url, e),
                })?;
            let value = Value::from_json(json);
            self.meta_initializers.borrow_mut().insert(
                url.to_string(),
                Box::new(move |meta: &Object| meta.set("default", value.clone())),
            );
            return self.linker.compile(JSON_MODULE_SOURCE, url);
        }
        self.linker.compile(&text, url)
    }
}

impl ModuleJob {
    fn new(loader: Weak<LoaderInner>, url: &str) -> Rc<Self> {
        let module: ModuleFuture = {
            let loader = loader.clone();
            let url = url.to_string();
            Promise::new(async move { upgrade(&loader)?.compile(&url) })
        };

        let linked: Promise<Vec<String>, LoaderError> = {
            let module = module.clone();
            let url = url.to_string();
            Promise::new(async move {
                let record = module.await?;
                let inner = upgrade(&loader)?;

                let mut dependencies = Vec::new();
                let futures = inner.linker.link(
                    &record,
                    |specifier: &str| -> LoaderResult<ModuleFuture> {
                        let dependency = inner.source.resolve(specifier, Some(&url))?;
                        let job = inner.job(&dependency);
                        dependencies.push(dependency);
                        Ok(job.module.clone())
                    },
                )?;
                drop(inner);

                try_join_all(futures).await?;
                Ok(dependencies)
            })
        };

        Rc::new(Self {
            url: url.to_string(),
            module,
            linked,
            instantiated: RefCell::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Будущее скомпилированной записи.
    pub fn module(&self) -> &ModuleFuture {
        &self.module
    }

    /// Запись, если модуль уже скомпилирован.
    pub fn record(&self) -> Option<ModuleHandle> {
        match self.module.state() {
            PromiseState::Fulfilled(record) => Some(record.clone()),
            _ => None,
        }
    }

    pub fn is_instantiated(&self) -> bool {
        matches!(
            self.instantiated.borrow().as_ref().map(Promise::state),
            Some(PromiseState::Fulfilled(_))
        )
    }

    /// Инстанцировать граф задачи. Результат запоминается.
    fn instantiate(&self, loader: &Weak<LoaderInner>) -> ModuleFuture {
        if let Some(instantiated) = self.instantiated.borrow().as_ref() {
            return instantiated.clone();
        }
        let instantiated = Promise::new(instantiate_graph(loader.clone(), self.url.clone()));
        *self.instantiated.borrow_mut() = Some(instantiated.clone());
        instantiated
    }

    async fn run(&self, loader: &Weak<LoaderInner>) -> LoaderResult<ModuleHandle> {
        let record = self.instantiate(loader).await?;
        let inner = upgrade(loader)?;
        inner.linker.evaluate(&record)?;
        Ok(record)
    }
}

/// Собрать граф задач (дожидаясь связывания каждой), инстанцировать
/// корень и отметить весь граф инстанцированным.
async fn instantiate_graph(
    loader: Weak<LoaderInner>,
    root_url: String,
) -> LoaderResult<ModuleHandle> {
    let root = upgrade(&loader)?.find_job(&root_url)?;

    let mut seen = HashSet::from([root_url]);
    let mut pending = vec![root.clone()];
    let mut graph = Vec::new();
    while let Some(job) = pending.pop() {
        let dependencies = job.linked.clone().await?;
        let inner = upgrade(&loader)?;
        for url in dependencies {
            if seen.insert(url.clone()) {
                pending.push(inner.find_job(&url)?);
            }
        }
        graph.push(job);
    }

    let record = root.module.clone().await?;
    let inner = upgrade(&loader)?;
    if record.status() == ModuleStatus::Linking {
        inner.linker.instantiate(&record)?;
    }

    for job in &graph {
        if let Some(dependency) = job.record() {
            *job.instantiated.borrow_mut() = Some(Promise::resolved(dependency));
        }
    }
    debug!("Instantiated graph of {} ({} modules)", record.url(), graph.len());
    Ok(record)
}

impl fmt::Debug for ModuleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleJob")
            .field("url", &self.url)
            .field("module", &self.module)
            .field("linked", &self.linked)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("jobs", &self.job_count())
            .field("json_modules", &self.inner.json_modules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::MemorySource;
    use futures::executor::block_on;

    #[test]
    fn test_import_single_module() {
        let loader = ModuleLoader::new(
            MemorySource::new().with_module("mem:/main.asg", "(export x) (let x (* 6 7))"),
        );
        let ns = block_on(loader.import("main.asg", None)).unwrap();
        assert_eq!(ns.get("x"), Some(Value::Int(42)));
        assert_eq!(ns.url(), "mem:/main.asg");
    }

    #[test]
    fn test_shared_dependency_loaded_once() {
        let loader = ModuleLoader::new(
            MemorySource::new()
                .with_module("mem:/main.asg", r#"(import "./a") (import "./b")"#)
                .with_module("mem:/a.asg", r#"(import "./shared")"#)
                .with_module("mem:/b.asg", r#"(import "./shared")"#)
                .with_module("mem:/shared.asg", r#"(print "shared")"#),
        );
        block_on(loader.import("./main", None)).unwrap();

        assert_eq!(loader.job_count(), 4);
        assert_eq!(loader.context().output(), vec!["shared".to_string()]);
        assert!(loader.job("mem:/shared.asg").unwrap().is_instantiated());
    }

    #[test]
    fn test_json_module_default_export() {
        let loader = ModuleLoader::new(
            MemorySource::new()
                .with_module("mem:/data.json", r#"{ "name": "asg", "version": 1 }"#)
                .with_module(
                    "mem:/main.asg",
                    r#"(import "./data.json" default) (export name) (let name (get default "name"))"#,
                ),
        );
        let ns = block_on(loader.import("./main", None)).unwrap();
        assert_eq!(ns.get("name"), Some(Value::String("asg".to_string())));
    }

    #[test]
    fn test_missing_dependency_rejects() {
        let loader = ModuleLoader::new(
            MemorySource::new().with_module("mem:/main.asg", r#"(import "./missing")"#),
        );
        let err = block_on(loader.import("./main", None)).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Link(crate::error::LinkError::Resolver { .. })
        ));
    }
}
