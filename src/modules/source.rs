//! Источники модулей: разрешение спецификаторов в url и чтение текста.
//!
//! Политика разрешения принадлежит хосту, а не компоновщику: загрузчик
//! получает её через трейт [`ModuleSource`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::trace;

use crate::config::ModuleConfig;
use crate::error::{LoaderError, LoaderResult};

const FILE_SCHEME: &str = "file://";

/// Источник текстов модулей.
pub trait ModuleSource {
    /// Разрешить спецификатор относительно url импортирующего модуля.
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> LoaderResult<String>;

    /// Прочитать текст модуля по url.
    fn fetch(&self, url: &str) -> LoaderResult<String>;
}

fn not_found(specifier: &str, referrer: Option<&str>) -> LoaderError {
    LoaderError::ModuleNotFound {
        specifier: specifier.to_string(),
        referrer: referrer.map(str::to_string),
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Модули на файловой системе.
///
/// - `./x`, `../x` — относительно каталога импортирующего модуля;
/// - `/abs/x` и `file:///abs/x` — абсолютные пути;
/// - `std/x` — только из stdlib;
/// - `x` — сначала пути поиска, затем stdlib.
///
/// Для каждого кандидата пробуются `x`, `x.<ext>`, `x/mod.<ext>`,
/// `x/index.<ext>`.
#[derive(Debug)]
pub struct FileSource {
    search_paths: Vec<PathBuf>,
    stdlib_path: Option<PathBuf>,
    extensions: Vec<String>,
    /// Кэш разрешённых url: (спецификатор, каталог импортёра)
    cache: RefCell<HashMap<(String, Option<PathBuf>), String>>,
}

impl FileSource {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            stdlib_path: None,
            extensions: vec!["asg".to_string()],
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ModuleConfig) -> Self {
        Self {
            search_paths: config.search_paths.clone(),
            stdlib_path: config.stdlib_path.clone(),
            extensions: config.extensions.clone(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Установить путь к stdlib.
    pub fn set_stdlib_path(&mut self, path: PathBuf) {
        self.stdlib_path = Some(path);
    }

    /// Url файла модуля.
    pub fn url_for(path: &Path) -> String {
        format!("{}{}", FILE_SCHEME, path.display())
    }

    /// Путь файла по url (`file://` необязателен).
    pub fn path_for(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix(FILE_SCHEME).unwrap_or(url))
    }

    fn referrer_dir(referrer: Option<&str>) -> Option<PathBuf> {
        referrer
            .map(Self::path_for)
            .and_then(|path| path.parent().map(Path::to_path_buf))
    }

    fn find_module(&self, base: &Path) -> Option<PathBuf> {
        if base.is_file() {
            return Some(base.to_path_buf());
        }

        let candidates = self.extensions.iter().flat_map(|ext| {
            let mut with_ext = base.as_os_str().to_owned();
            with_ext.push(format!(".{}", ext));
            [
                PathBuf::from(with_ext),
                base.join(format!("mod.{}", ext)),
                base.join(format!("index.{}", ext)),
            ]
        });

        for candidate in candidates {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn resolve_bare(&self, specifier: &str) -> Option<PathBuf> {
        if let Some(name) = specifier.strip_prefix("std/") {
            return self
                .stdlib_path
                .as_ref()
                .and_then(|stdlib| self.find_module(&stdlib.join(name)));
        }

        self.search_paths
            .iter()
            .find_map(|dir| self.find_module(&dir.join(specifier)))
            .or_else(|| {
                self.stdlib_path
                    .as_ref()
                    .and_then(|stdlib| self.find_module(&stdlib.join(specifier)))
            })
    }
}

impl ModuleSource for FileSource {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> LoaderResult<String> {
        let base_dir = if is_relative(specifier) {
            Some(Self::referrer_dir(referrer).unwrap_or_else(|| PathBuf::from(".")))
        } else {
            None
        };
        let key = (specifier.to_string(), base_dir.clone());
        if let Some(url) = self.cache.borrow().get(&key) {
            return Ok(url.clone());
        }

        let found = if let Some(dir) = base_dir {
            self.find_module(&dir.join(specifier))
        } else if specifier.starts_with(FILE_SCHEME) || specifier.starts_with('/') {
            self.find_module(&Self::path_for(specifier))
        } else {
            self.resolve_bare(specifier)
        };

        let path = found.ok_or_else(|| not_found(specifier, referrer))?;
        let path = path.canonicalize().map_err(|e| {
            LoaderError::IoError(format!("Failed to resolve {}: {}", path.display(), e))
        })?;
        let url = Self::url_for(&path);
        trace!("Resolved '{}' to {}", specifier, url);

        self.cache.borrow_mut().insert(key, url.clone());
        Ok(url)
    }

    fn fetch(&self, url: &str) -> LoaderResult<String> {
        let path = Self::path_for(url);
        fs::read_to_string(&path)
            .map_err(|e| LoaderError::IoError(format!("Failed to read {}: {}", path.display(), e)))
    }
}

/// Модули в памяти: `url -> текст`. Url вида `mem:/dir/name.asg`.
#[derive(Debug, Default)]
pub struct MemorySource {
    modules: RefCell<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить модуль (builder).
    pub fn with_module(self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(url, text);
        self
    }

    pub fn insert(&self, url: impl Into<String>, text: impl Into<String>) {
        self.modules.borrow_mut().insert(url.into(), text.into());
    }

    /// Склеить относительный путь с каталогом url импортёра.
    fn join(referrer: Option<&str>, specifier: &str) -> String {
        let (scheme, path) = referrer
            .and_then(|url| url.split_once(':'))
            .unwrap_or(("mem", "/"));

        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments.pop();
        for segment in specifier.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name),
            }
        }
        format!("{}:/{}", scheme, segments.join("/"))
    }
}

impl ModuleSource for MemorySource {
    fn resolve(&self, specifier: &str, referrer: Option<&str>) -> LoaderResult<String> {
        let base = if is_relative(specifier) {
            Self::join(referrer, specifier)
        } else if specifier.contains(':') {
            specifier.to_string()
        } else {
            format!("mem:/{}", specifier.trim_start_matches('/'))
        };

        let modules = self.modules.borrow();
        [
            base.clone(),
            format!("{}.asg", base),
            format!("{}/index.asg", base),
        ]
        .into_iter()
        .find(|url| modules.contains_key(url))
        .ok_or_else(|| not_found(specifier, referrer))
    }

    fn fetch(&self, url: &str) -> LoaderResult<String> {
        self.modules
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| LoaderError::IoError(format!("Failed to read {}: no such module", url)))
    }
}
