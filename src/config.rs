//! Конфигурация загрузчика модулей.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_IDENTITY_HASH_BITS;
use crate::error::{LoaderError, LoaderResult};

/// Конфигурация модульной системы.
///
/// ```json
/// {
///   "search_paths": ["src", "vendor"],
///   "stdlib_path": "/usr/lib/asg/std",
///   "extensions": ["asg"],
///   "json_modules": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Пути поиска модулей
    pub search_paths: Vec<PathBuf>,
    /// Путь к стандартной библиотеке
    pub stdlib_path: Option<PathBuf>,
    /// Расширения файлов модулей, в порядке приоритета
    pub extensions: Vec<String>,
    /// Загружать `.json` как модули с экспортом `default`
    pub json_modules: bool,
    /// Ширина пространства идентификаторов модулей (0..=32)
    pub identity_hash_bits: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
            stdlib_path: None,
            extensions: vec!["asg".to_string()],
            json_modules: true,
            identity_hash_bits: DEFAULT_IDENTITY_HASH_BITS,
        }
    }
}

impl ModuleConfig {
    /// Разобрать конфигурацию из JSON-строки.
    pub fn from_json_str(json: &str) -> LoaderResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LoaderError::Config(format!("invalid module config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Прочитать конфигурацию из JSON-файла.
    pub fn from_json_file(path: &Path) -> LoaderResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            LoaderError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> LoaderResult<()> {
        if self.identity_hash_bits > 32 {
            return Err(LoaderError::Config(format!(
                "identity_hash_bits must be at most 32, got {}",
                self.identity_hash_bits
            )));
        }
        if self.extensions.is_empty() {
            return Err(LoaderError::Config(
                "at least one module extension is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ModuleConfig::from_json_str(r#"{ "search_paths": ["lib"] }"#).unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("lib")]);
        assert_eq!(config.extensions, vec!["asg".to_string()]);
        assert_eq!(config.identity_hash_bits, DEFAULT_IDENTITY_HASH_BITS);
        assert!(config.json_modules);
    }

    #[test]
    fn test_invalid_bits() {
        let err = ModuleConfig::from_json_str(r#"{ "identity_hash_bits": 40 }"#).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ModuleConfig::from_json_str("{ nope"),
            Err(LoaderError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stdlib_path": "/opt/asg/std", "json_modules": false }}"#).unwrap();

        let config = ModuleConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.stdlib_path, Some(PathBuf::from("/opt/asg/std")));
        assert!(!config.json_modules);
    }
}
