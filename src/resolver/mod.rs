//! Node.js-compatible CommonJS `require()` for Boa
//!
//! A [`Registry`] is shared by every engine that loads from the same module
//! tree. It owns the source loader, the path resolver, the global package
//! folders, per-registry native modules and the cache of prepared module
//! sources. Each engine gets its own [`RequireModule`] from
//! [`Registry::enable`], which holds that engine's module instances.
//!
//! Resolution follows Node.js:
//! - relative and absolute requests (`./x`, `../x`, `/x`) as file, then directory
//! - native modules by name (per registry, then process wide, then core)
//! - `node_modules` folders walking up from the requiring module, then global folders
//! - `.js` and `.json` extensions, `package.json` `main`, `index.js`/`index.json`

mod require;
mod source;
mod trace;

pub use require::RequireModule;
pub use source::{
    DefaultPathResolver, FsSourceLoader, LexicalPathResolver, MemorySourceLoader, PathResolver,
    SourceLoader, clean, dir_of, is_file_or_directory_path,
};

use boa_engine::{Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue, js_string};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Prefix that forces a request to resolve to a core module
pub const NODE_PREFIX: &str = "node:";

/// Errors that can occur while resolving or loading a module
#[derive(Error, Debug)]
pub enum RequireError {
    #[error("Invalid module name")]
    IllegalModuleName,

    #[error("Module file does not exist: {}", .0.display())]
    ModuleFileDoesNotExist(PathBuf),

    #[error("No such built-in module: {0}")]
    NoSuchBuiltinModule(String),

    #[error("Invalid module: {}", .0.display())]
    InvalidModule(PathBuf),

    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid JSON in '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Script(#[from] JsError),
}

/// Result type for module operations
pub type RequireResult<T> = Result<T, RequireError>;

impl RequireError {
    /// Convert into an exception for script code.
    ///
    /// Script exceptions are rethrown unchanged; everything else becomes an
    /// `Error` whose message names the request.
    pub fn into_js_error(self, request: &str) -> JsError {
        match self {
            RequireError::Script(err) => err,
            err @ RequireError::ModuleNotFound(_) => {
                JsNativeError::error().with_message(err.to_string()).into()
            }
            err => JsNativeError::error()
                .with_message(format!("Cannot load module '{request}': {err}"))
                .into(),
        }
    }
}

/// Populates `module.exports` of a native module
pub type ModuleLoader = Arc<dyn Fn(&JsObject, &mut Context) -> JsResult<()> + Send + Sync>;

#[derive(Default)]
struct ModuleTable {
    native: HashMap<String, ModuleLoader>,
    core: HashMap<String, ModuleLoader>,
}

static GLOBAL_MODULES: LazyLock<Mutex<ModuleTable>> = LazyLock::new(Default::default);

/// Register a native module visible to every registry in the process.
///
/// Per-registry modules of the same name take precedence.
pub fn register_native_module<F>(name: &str, loader: F)
where
    F: Fn(&JsObject, &mut Context) -> JsResult<()> + Send + Sync + 'static,
{
    let name = clean_name(name);
    GLOBAL_MODULES.lock().native.insert(name, Arc::new(loader));
}

/// Register a core module, also reachable as `node:<name>`
pub fn register_core_module<F>(name: &str, loader: F)
where
    F: Fn(&JsObject, &mut Context) -> JsResult<()> + Send + Sync + 'static,
{
    let name = clean_name(name);
    GLOBAL_MODULES.lock().core.insert(name, Arc::new(loader));
}

fn global_native(name: &str) -> Option<ModuleLoader> {
    GLOBAL_MODULES.lock().native.get(name).cloned()
}

fn core_module(name: &str) -> Option<ModuleLoader> {
    GLOBAL_MODULES.lock().core.get(name).cloned()
}

/// Module names are stored the way a path would be cleaned, with `/` separators
fn clean_name(name: &str) -> String {
    if let Some(bare) = name.strip_prefix(NODE_PREFIX) {
        return format!("{NODE_PREFIX}{}", clean_name(bare));
    }
    let cleaned = clean(Path::new(name));
    cleaned
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

/// Call the global `require` installed in `context`.
///
/// This is how host code loads a module, for example the main script.
pub fn require(context: &mut Context, request: &str) -> JsResult<JsValue> {
    let require = context.global_object().get(js_string!("require"), context)?;
    let Some(function) = require.as_callable().map(|f| f.clone()) else {
        return Err(JsNativeError::typ()
            .with_message("require is not enabled for this context; call Registry::enable first")
            .into());
    };
    function.call(&JsValue::undefined(), &[JsString::from(request).into()], context)
}

struct RegistryInner {
    native: Mutex<HashMap<String, ModuleLoader>>,
    compiled: Mutex<HashMap<PathBuf, Arc<str>>>,
    source_loader: Box<dyn SourceLoader>,
    path_resolver: Box<dyn PathResolver>,
    global_folders: Vec<PathBuf>,
    base_dir: PathBuf,
}

/// Module tree shared between engines.
///
/// Cloning is cheap; clones share natives and the source cache.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Registry reading from the file system relative to the current directory
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register a native module for engines using this registry only
    pub fn register_native_module<F>(&self, name: &str, loader: F)
    where
        F: Fn(&JsObject, &mut Context) -> JsResult<()> + Send + Sync + 'static,
    {
        let name = clean_name(name);
        self.inner.native.lock().insert(name, Arc::new(loader));
    }

    /// Install a global `require` in `context` and return its module state
    pub fn enable(&self, context: &mut Context) -> JsResult<RequireModule> {
        let module = RequireModule::new(self.clone());
        let require = module.bound_require(self.inner.base_dir.clone(), context);
        context
            .global_object()
            .set(js_string!("require"), require, false, context)?;
        Ok(module)
    }

    pub fn global_folders(&self) -> &[PathBuf] {
        &self.inner.global_folders
    }

    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    pub(crate) fn native_loader(&self, name: &str) -> Option<ModuleLoader> {
        self.inner.native.lock().get(name).cloned()
    }

    pub(crate) fn resolve_path(&self, base: &Path, request: &str) -> PathBuf {
        self.inner.path_resolver.resolve(base, request)
    }

    /// Pass a derived candidate (`x` + `.js`) back through the path resolver
    /// so it gets the same cache key as a direct request for that file
    pub(crate) fn resolve_candidate(&self, path: &Path) -> PathBuf {
        match path.file_name() {
            Some(name) => self.resolve_path(&dir_of(path), &name.to_string_lossy()),
            None => path.to_path_buf(),
        }
    }

    pub(crate) fn load_source(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.source_loader.load(path)
    }

    /// Wrapped module source for `path`, prepared once per registry.
    ///
    /// JSON files are validated and become a module assigning `module.exports`.
    pub(crate) fn compiled_source(&self, path: &Path) -> RequireResult<Arc<str>> {
        let mut compiled = self.inner.compiled.lock();
        if let Some(source) = compiled.get(path) {
            return Ok(source.clone());
        }

        let bytes = self.load_source(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                RequireError::ModuleFileDoesNotExist(path.to_path_buf())
            } else {
                RequireError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let body = if path.extension().is_some_and(|ext| ext == "json") {
            let json_error = |source| RequireError::Json {
                path: path.to_path_buf(),
                source,
            };
            let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(json_error)?;
            format!("module.exports = {};", serde_json::to_string(&value).map_err(json_error)?)
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        let source: Arc<str> = wrap_source(&body).into();
        compiled.insert(path.to_path_buf(), source.clone());
        Ok(source)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Module body wrapped as a function expression; line numbers are preserved
fn wrap_source(body: &str) -> String {
    format!("(function(exports, require, module, __filename, __dirname) {{{body}\n}})")
}

/// Builder for [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    source_loader: Option<Box<dyn SourceLoader>>,
    path_resolver: Option<Box<dyn PathResolver>>,
    global_folders: Vec<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl RegistryBuilder {
    pub fn source_loader(mut self, loader: impl SourceLoader + 'static) -> Self {
        self.source_loader = Some(Box::new(loader));
        self
    }

    pub fn path_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.path_resolver = Some(Box::new(resolver));
        self
    }

    /// Folders searched for packages after every `node_modules` folder
    pub fn global_folders<I, P>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.global_folders.extend(folders.into_iter().map(Into::into));
        self
    }

    /// Directory the global `require` resolves against, `.` by default
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Registry {
        let base_dir = self.base_dir.unwrap_or_else(|| PathBuf::from("."));
        // The default resolver yields absolute paths for existing files
        let base_dir = if self.path_resolver.is_none() {
            std::path::absolute(&base_dir)
                .map(|dir| clean(&dir))
                .unwrap_or(base_dir)
        } else {
            base_dir
        };
        Registry {
            inner: Arc::new(RegistryInner {
                native: Mutex::new(HashMap::new()),
                compiled: Mutex::new(HashMap::new()),
                source_loader: self
                    .source_loader
                    .unwrap_or_else(|| Box::new(FsSourceLoader)),
                path_resolver: self
                    .path_resolver
                    .unwrap_or_else(|| Box::new(DefaultPathResolver)),
                global_folders: self.global_folders,
                base_dir,
            }),
        }
    }
}
