//! Model descriptors and the catalog of models the registry may load
//!
//! A descriptor is static configuration: where the artifact lives, what
//! spatial size it expects, and which label each output channel means.
//! The catalog is replaceable (JSON file) without touching the registry.

use crate::error::{AgrivError, AgrivResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Identifies one loadable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique key used to select the model at request time
    pub name: String,
    /// Location of the ONNX artifact
    #[serde(rename = "path")]
    pub storage_path: PathBuf,
    /// Expected spatial input size as (height, width)
    pub input_size: (u32, u32),
    /// Position `i` is the meaning of output channel `i`
    pub classes: Vec<String>,
}

impl ModelDescriptor {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        input_size: (u32, u32),
        classes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            storage_path: storage_path.into(),
            input_size,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Whether the backing artifact is present on disk
    pub fn artifact_exists(&self) -> bool {
        self.storage_path.is_file()
    }

    /// Check the descriptor is internally consistent
    pub fn validate(&self) -> AgrivResult<()> {
        if self.name.trim().is_empty() {
            return Err(AgrivError::config("Model name must not be empty"));
        }
        if self.classes.is_empty() {
            return Err(AgrivError::config(format!(
                "Model '{}' has no class labels",
                self.name
            )));
        }
        let (h, w) = self.input_size;
        if h == 0 || w == 0 {
            return Err(AgrivError::config(format!(
                "Model '{}' has an empty input size {h}x{w}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Ordered table of model descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> AgrivResult<Self> {
        let catalog = Self { models };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The two crop disease classifiers that ship by default
    pub fn builtin<P: AsRef<Path>>(model_dir: P) -> Self {
        let dir = model_dir.as_ref();
        Self {
            models: vec![
                ModelDescriptor::new(
                    "bean",
                    dir.join("bean_model.onnx"),
                    (224, 224),
                    ["angular_leaf_spot", "bean_rust", "healthy"],
                ),
                ModelDescriptor::new(
                    "maize",
                    dir.join("maize_model.onnx"),
                    (224, 224),
                    ["Healthy", "MSV", "MLB"],
                ),
            ],
        }
    }

    /// Load a catalog from a JSON file.
    ///
    /// Relative artifact paths are resolved against the catalog's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AgrivResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut catalog: Self = serde_json::from_str(&content)?;

        if let Some(base) = path.parent() {
            for model in &mut catalog.models {
                if model.storage_path.is_relative() {
                    model.storage_path = base.join(&model.storage_path);
                }
            }
        }

        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> AgrivResult<()> {
        let mut seen = HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !seen.insert(model.name.as_str()) {
                return Err(AgrivError::config(format!(
                    "Duplicate model name '{}' in catalog",
                    model.name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog() {
        let catalog = ModelCatalog::builtin("models");
        assert_eq!(catalog.len(), 2);

        let bean = catalog.get("bean").unwrap();
        assert_eq!(bean.classes, ["angular_leaf_spot", "bean_rust", "healthy"]);
        assert_eq!(bean.input_size, (224, 224));
        assert_eq!(bean.storage_path, Path::new("models").join("bean_model.onnx"));

        let maize = catalog.get("maize").unwrap();
        assert_eq!(maize.classes, ["Healthy", "MSV", "MLB"]);
        assert_eq!(maize.num_classes(), 3);
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let d = ModelDescriptor::new("bean", "a.onnx", (224, 224), ["x"]);
        assert!(ModelCatalog::new(vec![d.clone(), d]).is_err());
    }

    #[test]
    fn test_rejects_empty_classes_and_size() {
        let no_classes = ModelDescriptor::new("bean", "a.onnx", (224, 224), Vec::<String>::new());
        assert!(no_classes.validate().is_err());

        let no_size = ModelDescriptor::new("bean", "a.onnx", (0, 224), ["x"]);
        assert!(no_size.validate().is_err());
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        let mut file = std::fs::File::create(&catalog_path).unwrap();
        write!(
            file,
            r#"{{"models": [{{"name": "cassava", "path": "cassava.onnx",
                "input_size": [256, 256], "classes": ["cbb", "healthy"]}}]}}"#
        )
        .unwrap();

        let catalog = ModelCatalog::from_file(&catalog_path).unwrap();
        let cassava = catalog.get("cassava").unwrap();
        assert_eq!(cassava.storage_path, dir.path().join("cassava.onnx"));
        assert_eq!(cassava.input_size, (256, 256));
        assert!(!cassava.artifact_exists());
    }
}
