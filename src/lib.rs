//! # ASG Linker
//!
//! Динамическая компоновка модулей ASG во встроенном рантайме.
//!
//! ## Основные модули
//!
//! - [`parser`] - S-Expression парсер исходного текста модулей
//! - [`engine`] - Встроенный движок: компиляция, обход графа, выполнение
//! - [`modules`] - Реестр, записи модулей, Link/Instantiate/Evaluate, загрузчик
//! - [`config`] - Конфигурация загрузчика
//!
//! ## Пример
//!
//! ```rust,ignore
//! use asg_linker::{ModuleLinker, ModuleFuture, LoaderResult};
//!
//! let linker = ModuleLinker::new();
//! let record = linker.compile("(export x) (let x 1)", "mem:/a.asg")?;
//! let pending = linker.link(&record, |_: &str| -> LoaderResult<ModuleFuture> { unreachable!() })?;
//! assert!(pending.is_empty());
//! linker.instantiate(&record)?;
//! linker.evaluate(&record)?;
//! let ns = linker.namespace(&record)?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod modules;
pub mod parser;

// === Re-exports для удобства ===
pub use config::ModuleConfig;
pub use engine::{Context, Engine, Namespace, Promise, PromiseState, Value};
pub use error::{LinkError, LoaderError, LoaderResult};
pub use modules::{
    FileSource, MemorySource, ModuleFuture, ModuleHandle, ModuleLinker, ModuleLoader,
    ModuleSource, ModuleStatus,
};
pub use parser::parse_module;
