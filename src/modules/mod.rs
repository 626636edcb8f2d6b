//! Система модулей ASG: реестр, записи модулей и их жизненный цикл.
//!
//! ## Жизненный цикл
//!
//! ```text
//! compile -> Compiled
//! link    -> Linking       (резолвер возвращает будущие, они ждутся снаружи)
//! instantiate -> Instantiated
//! evaluate    -> Evaluating -> Evaluated | Errored
//! ```
//!
//! [`ModuleLinker`] реализует операции над одной записью,
//! [`ModuleLoader`] — загрузку целого графа по спецификатору.

mod hooks;
mod linker;
mod loader;
mod record;
mod registry;
mod source;

pub use hooks::{DynamicImportHook, ImportMetaHook, NamespaceFuture, Resolver};
pub use linker::ModuleLinker;
pub use loader::{ModuleJob, ModuleLoader};
pub use record::{ModuleFuture, ModuleHandle, ModuleRecord, ModuleStatus};
pub use registry::ModuleRegistry;
pub use source::{FileSource, MemorySource, ModuleSource};
