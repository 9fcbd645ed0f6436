//! Plugin loader - Discovers modules, validates metadata, fills the registry
//!
//! Modules come either compiled into the host or as shared libraries under
//! the plugin directory. A bad module is reported and skipped; the rest of
//! the batch still loads.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::{debug, info, warn};

use super::manifest::{PluginManifest, MANIFEST_FILE};
use super::module::{ModuleMetadata, PluginBinder, PluginEntryFn, PluginModule};
use super::registry::PluginRegistry;
use crate::application::errors::{CollisionError, PluginError, PluginResult, ValidationError};
use crate::application::handlers::panic_message;
use crate::domain::entities::{is_canonical_uuid_v4, is_valid_token, PluginMeta, PluginState};

/// Where a module comes from
pub enum ModuleSource {
    /// Compiled into the host
    Builtin(Arc<dyn PluginModule>),
    /// A plugin directory with a `plugin.yaml`
    Library { dir: PathBuf, manifest: PluginManifest },
}

impl ModuleSource {
    pub fn builtin(module: impl PluginModule + 'static) -> Self {
        ModuleSource::Builtin(Arc::new(module))
    }

    fn label(&self) -> String {
        match self {
            ModuleSource::Builtin(module) => {
                let id = catch_unwind(AssertUnwindSafe(|| module.metadata().id)).ok().flatten();
                format!("builtin:{}", id.unwrap_or_else(|| "?".to_string()))
            }
            ModuleSource::Library { dir, .. } => dir.display().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct LoadFailure {
    /// Module label (`builtin:<id>` or its directory)
    pub module: String,
    pub error: PluginError,
}

/// Outcome of loading a batch of modules
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
    pub skipped: Vec<String>,
}

impl LoadReport {
    fn fail(&mut self, module: String, error: PluginError) {
        warn!("Failed to load plugin from {}: {}", module, error);
        self.failed.push(LoadFailure { module, error });
    }

    pub fn log(&self) {
        info!(
            "Plugins: {} loaded, {} failed, {} skipped",
            self.loaded.len(),
            self.failed.len(),
            self.skipped.len()
        );
        for id in &self.loaded {
            info!("  loaded {}", id);
        }
        for failure in &self.failed {
            warn!("  failed {}: {}", failure.module, failure.error);
        }
        for module in &self.skipped {
            info!("  skipped {}", module);
        }
    }
}

/// Plugin loader
pub struct PluginLoader {
    plugin_dir: PathBuf,
    require_uuid_ids: bool,
}

impl PluginLoader {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            require_uuid_ids: false,
        }
    }

    /// Demand canonical UUIDv4 plugin ids
    pub fn require_uuid_ids(mut self, required: bool) -> Self {
        self.require_uuid_ids = required;
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Find library plugins in the plugin directory, in name order.
    ///
    /// Directories whose manifest cannot be read are reported as failures.
    pub fn discover(&self, report: &mut LoadReport) -> Vec<ModuleSource> {
        let mut sources = Vec::new();

        if !self.plugin_dir.exists() {
            debug!("Plugin directory does not exist: {}", self.plugin_dir.display());
            return sources;
        }

        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read plugin directory {}: {}", self.plugin_dir.display(), e);
                return sources;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(e) => Some(e.path()),
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_dir())
            .filter(|path| {
                // Skip hidden directories
                !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true)
            })
            .collect();
        dirs.sort();

        for dir in dirs {
            let manifest_path = dir.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                debug!("No {} in {}, ignoring", MANIFEST_FILE, dir.display());
                continue;
            }
            match PluginManifest::from_file(&manifest_path) {
                Ok(manifest) if manifest.skip => report.skipped.push(dir.display().to_string()),
                Ok(manifest) => sources.push(ModuleSource::Library { dir, manifest }),
                Err(e) => report.fail(dir.display().to_string(), e),
            }
        }
        sources
    }

    /// Load `builtins` followed by everything discovered on disk.
    ///
    /// The first module to claim an id wins; later ones fail with
    /// `DuplicateId`.
    pub fn load_all(&self, registry: &PluginRegistry, builtins: Vec<ModuleSource>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut sources = builtins;
        sources.extend(self.discover(&mut report));

        for source in sources {
            let label = source.label();
            match self.load(registry, source) {
                Ok(id) => report.loaded.push(id),
                Err(e) => report.fail(label, e),
            }
        }
        report
    }

    /// Load one module into the registry and return its id
    pub fn load(&self, registry: &PluginRegistry, source: ModuleSource) -> PluginResult<String> {
        let (module, declared, origin) = match source {
            ModuleSource::Builtin(module) => (module, ModuleMetadata::default(), None),
            ModuleSource::Library { dir, manifest } => {
                let module = self.open_library(registry, &dir, &manifest)?;
                (module, manifest.metadata(), Some(dir.display().to_string()))
            }
        };

        let metadata = catch_unwind(AssertUnwindSafe(|| module.metadata())).map_err(|p| {
            PluginError::Load(format!("module panicked while reporting metadata: {}", panic_message(p)))
        })?;
        debug!("Plugin module {:?}: {}", metadata.id, PluginState::Discovered);
        let meta = self.validate_metadata(declared.or(metadata))?;
        if registry.contains(&meta.id) {
            return Err(ValidationError::DuplicateId(meta.id).into());
        }
        debug!("Plugin module {}: {}", meta.id, PluginState::Validated);

        let mut binder = PluginBinder::new();
        catch_unwind(AssertUnwindSafe(|| module.bind(&mut binder)))
            .map_err(|p| PluginError::Load(format!("module panicked while binding: {}", panic_message(p))))?
            .map_err(|e| PluginError::Load(format!("module failed to bind: {}", e)))?;
        let bindings = binder.finish()?;

        let id = meta.id.clone();
        let source = origin.unwrap_or_else(|| format!("builtin:{}", id));
        registry.insert(meta, source, bindings).map_err(|e| match e {
            PluginError::Collision(CollisionError::PluginId(id)) => ValidationError::DuplicateId(id).into(),
            other => other,
        })?;
        debug!("Plugin module {}: {}", id, PluginState::Loaded);
        Ok(id)
    }

    /// Check the five metadata fields and the id policy
    pub fn validate_metadata(&self, metadata: ModuleMetadata) -> Result<PluginMeta, ValidationError> {
        fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
            let value = value.ok_or(ValidationError::MissingField(field))?;
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(field));
            }
            Ok(value)
        }

        let meta = PluginMeta {
            id: required(metadata.id, "id")?,
            name: required(metadata.name, "name")?,
            version: required(metadata.version, "version")?,
            description: required(metadata.description, "description")?,
            author: required(metadata.author, "author")?,
        };

        if !is_valid_token(&meta.id) || (self.require_uuid_ids && !is_canonical_uuid_v4(&meta.id)) {
            return Err(ValidationError::InvalidId(meta.id));
        }
        Ok(meta)
    }

    fn open_library(
        &self,
        registry: &PluginRegistry,
        dir: &Path,
        manifest: &PluginManifest,
    ) -> PluginResult<Arc<dyn PluginModule>> {
        let library_path = manifest.library_path(dir);
        if !library_path.exists() {
            return Err(PluginError::Load(format!("Library not found: {}", library_path.display())));
        }

        // Loading runs the library's initializers; nothing more can be checked
        // before that.
        let library = unsafe {
            Library::new(&library_path).map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))?
        };

        let module = {
            let entry: Symbol<PluginEntryFn> = unsafe {
                library
                    .get(b"bazaar_plugin_entry")
                    .map_err(|e| PluginError::Load(format!("Failed to find entry point: {}", e)))?
            };
            let raw = catch_unwind(AssertUnwindSafe(|| unsafe { entry() }))
                .map_err(|p| PluginError::Load(format!("entry point panicked: {}", panic_message(p))))?;
            if raw.is_null() {
                return Err(PluginError::Load("Plugin entry returned null".to_string()));
            }
            // The pointer came from `Box::into_raw` in `export_plugin!`.
            let boxed = unsafe { Box::from_raw(raw) };
            Arc::<dyn PluginModule>::from(*boxed)
        };

        registry.keep_library(library);
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::NullMarketplace;
    use crate::infrastructure::plugins::PluginDefinition;
    use crate::infrastructure::storage::PluginStorage;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(NullMarketplace), Arc::new(PluginStorage::in_memory()))
    }

    fn definition(id: &str) -> PluginDefinition {
        PluginDefinition::new(id)
            .name("Demo")
            .version("1.0.0")
            .description("Demo plugin")
            .author("Shop team")
    }

    struct Exploding;

    impl PluginModule for Exploding {
        fn metadata(&self) -> ModuleMetadata {
            panic!("cannot inspect")
        }

        fn bind(&self, _binder: &mut PluginBinder) -> Result<(), crate::application::handlers::HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_and_empty_fields_are_named() {
        let loader = PluginLoader::new("/nonexistent");
        let err = loader
            .validate_metadata(ModuleMetadata {
                id: Some("demo".into()),
                name: Some("Demo".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("version"));

        let err = loader
            .validate_metadata(ModuleMetadata::new("demo", "Demo", "1.0", "  ", "me"))
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyField("description"));
    }

    #[test]
    fn test_id_policy() {
        let loader = PluginLoader::new("/nonexistent");
        assert!(loader.validate_metadata(ModuleMetadata::new("../x", "n", "v", "d", "a")).is_err());

        let strict = PluginLoader::new("/nonexistent").require_uuid_ids(true);
        assert_eq!(
            strict.validate_metadata(ModuleMetadata::new("demo-1", "n", "v", "d", "a")).unwrap_err(),
            ValidationError::InvalidId("demo-1".into())
        );
        assert!(strict
            .validate_metadata(ModuleMetadata::new("5c0b4bd4-8a5e-4f2e-9a57-3f1c2d7b9e10", "n", "v", "d", "a"))
            .is_ok());
    }

    #[test]
    fn test_bad_module_does_not_abort_batch() {
        let registry = registry();
        let loader = PluginLoader::new("/nonexistent");
        let report = loader.load_all(
            &registry,
            vec![
                ModuleSource::builtin(Exploding),
                ModuleSource::builtin(PluginDefinition::new("half").name("Half")),
                ModuleSource::builtin(definition("good")),
            ],
        );
        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(report.failed[0].error, PluginError::Load(_)));
        assert!(matches!(
            report.failed[1].error,
            PluginError::Validation(ValidationError::MissingField("version"))
        ));
        assert_eq!(registry.state("good"), Some(PluginState::Loaded));
    }

    #[test]
    fn test_failing_bind_is_a_load_error() {
        let registry = registry();
        let loader = PluginLoader::new("/nonexistent");
        let module = definition("broken").setup(|_binder| Err("no config".into()));
        let err = loader.load(&registry, ModuleSource::builtin(module)).unwrap_err();
        assert!(err.to_string().contains("no config"));
        assert!(!registry.contains("broken"));
    }

    #[test]
    fn test_discover_reads_manifests_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, manifest: &str| {
            let plugin_dir = dir.path().join(name);
            std::fs::create_dir_all(&plugin_dir).unwrap();
            std::fs::write(plugin_dir.join(MANIFEST_FILE), manifest).unwrap();
        };
        write("alpha", "id: alpha\nname: A\nversion: '1'\ndescription: d\nauthor: a\n");
        write("beta", "id: beta\nskip: true\n");
        write("gamma", "id: [broken\n");
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();

        let loader = PluginLoader::new(dir.path());
        let mut report = LoadReport::default();
        let sources = loader.discover(&mut report);
        assert_eq!(sources.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.failed.len(), 1);

        // alpha has no library next to its manifest
        let registry = registry();
        let report = loader.load_all(&registry, Vec::new());
        assert!(report.loaded.is_empty());
        assert!(report.failed.iter().any(|f| f.error.to_string().contains("Library not found")));
    }
}
