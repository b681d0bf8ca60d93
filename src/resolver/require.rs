//! Per-engine module state and the resolution algorithm

use super::source::{dir_of, is_file_or_directory_path, is_node_modules, with_suffix};
use super::trace::{Outcome, record};
use super::{
    ModuleLoader, NODE_PREFIX, Registry, RequireError, RequireResult, core_module, global_native,
};
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    Context, JsArgs, JsObject, JsResult, JsString, JsValue, NativeFunction, Source, js_string,
};
use boa_gc::{Finalize, Trace};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    main: Option<String>,
}

struct RequireState {
    registry: Registry,
    files: RefCell<HashMap<PathBuf, JsObject>>,
    natives: RefCell<HashMap<String, JsObject>>,
    packages: RefCell<HashMap<(PathBuf, String), JsObject>>,
}

/// Module instances loaded into one engine.
///
/// Every module is evaluated at most once per engine. Cloning shares state.
#[derive(Clone)]
pub struct RequireModule {
    state: Rc<RequireState>,
}

/// Captures of a `require` function bound to a directory
#[derive(Trace, Finalize)]
struct RequireBinding {
    #[unsafe_ignore_trace]
    module: RequireModule,
    #[unsafe_ignore_trace]
    dir: PathBuf,
}

fn require_call(
    _this: &JsValue,
    args: &[JsValue],
    binding: &RequireBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    let request = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();
    binding
        .module
        .resolve(&request, &binding.dir, context)
        .map_err(|err| err.into_js_error(&request))
}

impl RequireModule {
    pub(crate) fn new(registry: Registry) -> Self {
        Self {
            state: Rc::new(RequireState {
                registry,
                files: RefCell::new(HashMap::new()),
                natives: RefCell::new(HashMap::new()),
                packages: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Load `request` relative to the registry base directory and return its exports
    pub fn require(&self, request: &str, context: &mut Context) -> RequireResult<JsValue> {
        let base = self.state.registry.base_dir().to_path_buf();
        self.resolve(request, &base, context)
    }

    /// Load `request` as if required from a module in `from_dir`
    pub fn resolve(
        &self,
        request: &str,
        from_dir: &Path,
        context: &mut Context,
    ) -> RequireResult<JsValue> {
        let module = self.resolve_module(request, from_dir, context)?;
        Ok(module.get(js_string!("exports"), context)?)
    }

    /// A `require` function resolving relative requests against `dir`
    pub(crate) fn bound_require(&self, dir: PathBuf, context: &mut Context) -> JsValue {
        let binding = RequireBinding {
            module: self.clone(),
            dir,
        };
        NativeFunction::from_copy_closure_with_captures(require_call, binding)
            .to_js_function(context.realm())
            .into()
    }

    fn resolve_module(
        &self,
        request: &str,
        start: &Path,
        context: &mut Context,
    ) -> RequireResult<JsObject> {
        if request.trim().is_empty() {
            return Err(RequireError::IllegalModuleName);
        }

        if is_file_or_directory_path(request) {
            let path = self.state.registry.resolve_path(start, request);
            if let Some(module) = self.state.files.borrow().get(&path).cloned() {
                record(&path, Outcome::Cached);
                return Ok(module);
            }
            return match self.load_as_file_or_directory(&path, context)? {
                Some(module) => {
                    self.state.files.borrow_mut().insert(path.clone(), module.clone());
                    record(&path, Outcome::Loaded);
                    Ok(module)
                }
                None => {
                    record(&path, Outcome::Fatal);
                    Err(RequireError::ModuleNotFound(request.to_string()))
                }
            };
        }

        if let Some(module) = self.load_native(request, context)? {
            record(Path::new(request), Outcome::Native);
            return Ok(module);
        }

        let key = (start.to_path_buf(), request.to_string());
        if let Some(module) = self.state.packages.borrow().get(&key).cloned() {
            record(Path::new(request), Outcome::Cached);
            return Ok(module);
        }
        match self.load_package(request, start, context)? {
            Some(module) => {
                self.state.packages.borrow_mut().insert(key, module.clone());
                Ok(module)
            }
            None => {
                record(Path::new(request), Outcome::Fatal);
                Err(RequireError::ModuleNotFound(request.to_string()))
            }
        }
    }

    fn load_native(&self, name: &str, context: &mut Context) -> RequireResult<Option<JsObject>> {
        if let Some(module) = self.state.natives.borrow().get(name).cloned() {
            return Ok(Some(module));
        }

        let (loader, alias): (ModuleLoader, Option<String>) = match self
            .state
            .registry
            .native_loader(name)
            .or_else(|| global_native(name))
        {
            Some(loader) => (loader, None),
            None => match core_module(name) {
                Some(loader) => (loader, Some(format!("{NODE_PREFIX}{name}"))),
                None => match name.strip_prefix(NODE_PREFIX) {
                    Some(bare) => match core_module(bare) {
                        Some(loader) => (loader, Some(bare.to_string())),
                        None => return Err(RequireError::NoSuchBuiltinModule(name.to_string())),
                    },
                    None => return Ok(None),
                },
            },
        };

        let module = create_module_object(name, context)?;
        {
            let mut natives = self.state.natives.borrow_mut();
            natives.insert(name.to_string(), module.clone());
            if let Some(alias) = &alias {
                natives.insert(alias.clone(), module.clone());
            }
        }

        if let Err(err) = loader(&module, context) {
            let mut natives = self.state.natives.borrow_mut();
            natives.remove(name);
            if let Some(alias) = &alias {
                natives.remove(alias);
            }
            return Err(err.into());
        }
        module.set(js_string!("loaded"), true, false, context)?;
        Ok(Some(module))
    }

    fn load_as_file_or_directory(
        &self,
        path: &Path,
        context: &mut Context,
    ) -> RequireResult<Option<JsObject>> {
        if let Some(module) = self.load_as_file(path, context)? {
            return Ok(Some(module));
        }
        self.load_as_directory(path, context)
    }

    fn load_as_file(&self, path: &Path, context: &mut Context) -> RequireResult<Option<JsObject>> {
        let registry = &self.state.registry;
        for candidate in [
            path.to_path_buf(),
            registry.resolve_candidate(&with_suffix(path, ".js")),
            registry.resolve_candidate(&with_suffix(path, ".json")),
        ] {
            if let Some(module) = self.load_module(&candidate, context)? {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }

    fn load_index(&self, dir: &Path, context: &mut Context) -> RequireResult<Option<JsObject>> {
        for index in ["index.js", "index.json"] {
            let candidate = self.state.registry.resolve_path(dir, index);
            if let Some(module) = self.load_module(&candidate, context)? {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }

    fn load_as_directory(
        &self,
        dir: &Path,
        context: &mut Context,
    ) -> RequireResult<Option<JsObject>> {
        let manifest_path = self.state.registry.resolve_path(dir, "package.json");
        let main = match self.state.registry.load_source(&manifest_path) {
            Ok(bytes) => serde_json::from_slice::<PackageManifest>(&bytes)
                .ok()
                .and_then(|manifest| manifest.main)
                .filter(|main| !main.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                record(&manifest_path, Outcome::NotFound);
                None
            }
            Err(source) => {
                return Err(RequireError::Io {
                    path: manifest_path,
                    source,
                });
            }
        };

        let Some(main) = main else {
            return self.load_index(dir, context);
        };

        let target = self.state.registry.resolve_path(dir, &main);
        if let Some(module) = self.load_as_file(&target, context)? {
            record(&target, Outcome::Ok);
            return Ok(Some(module));
        }
        record(&target, Outcome::Fail);
        self.load_index(&target, context)
    }

    fn load_package(
        &self,
        request: &str,
        start: &Path,
        context: &mut Context,
    ) -> RequireResult<Option<JsObject>> {
        let mut dir = start.to_path_buf();
        loop {
            let root = if is_node_modules(&dir) {
                dir.clone()
            } else {
                dir.join("node_modules")
            };
            let candidate = self.state.registry.resolve_path(&root, request);
            if let Some(module) = self.load_as_file_or_directory(&candidate, context)? {
                return Ok(Some(module));
            }

            if dir == Path::new("..") {
                break;
            }
            let parent = dir_of(&dir);
            if parent == dir {
                break;
            }
            dir = parent;
        }

        let folders = self.state.registry.global_folders().to_vec();
        for folder in folders {
            let candidate = self.state.registry.resolve_path(&folder, request);
            if let Some(module) = self.load_as_file_or_directory(&candidate, context)? {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }

    /// Load a single file as a module, caching it before evaluation so that
    /// cyclic requires observe the partially populated exports.
    fn load_module(&self, path: &Path, context: &mut Context) -> RequireResult<Option<JsObject>> {
        if let Some(module) = self.state.files.borrow().get(path).cloned() {
            return Ok(Some(module));
        }

        let id = path.to_string_lossy();
        let module = create_module_object(&id, context)?;
        self.state
            .files
            .borrow_mut()
            .insert(path.to_path_buf(), module.clone());

        match self.evaluate(path, &module, context) {
            Ok(()) => Ok(Some(module)),
            Err(err) => {
                self.state.files.borrow_mut().remove(path);
                match err {
                    RequireError::ModuleFileDoesNotExist(_) => {
                        record(path, Outcome::NotFound);
                        Ok(None)
                    }
                    err => Err(err),
                }
            }
        }
    }

    fn evaluate(&self, path: &Path, module: &JsObject, context: &mut Context) -> RequireResult<()> {
        let source = self.state.registry.compiled_source(path)?;
        record(path, Outcome::Ok);

        let wrapper = context.eval(Source::from_bytes(source.as_bytes()).with_path(path))?;
        let Some(function) = wrapper.as_callable().map(|f| f.clone()) else {
            record(path, Outcome::Invalid);
            return Err(RequireError::InvalidModule(path.to_path_buf()));
        };

        let dir = dir_of(path);
        let exports = module.get(js_string!("exports"), context)?;
        let require = self.bound_require(dir.clone(), context);
        let filename = JsValue::from(JsString::from(path.to_string_lossy().as_ref()));
        let dirname = JsValue::from(JsString::from(dir.to_string_lossy().as_ref()));

        function.call(
            &exports,
            &[exports.clone(), require, module.clone().into(), filename, dirname],
            context,
        )?;
        module.set(js_string!("loaded"), true, false, context)?;
        Ok(())
    }
}

fn create_module_object(id: &str, context: &mut Context) -> JsResult<JsObject> {
    let exports = JsObject::with_object_proto(context.intrinsics());
    let id = JsString::from(id);
    Ok(ObjectInitializer::new(context)
        .property(js_string!("exports"), exports, Attribute::all())
        .property(js_string!("id"), id.clone(), Attribute::all())
        .property(js_string!("filename"), id, Attribute::all())
        .property(js_string!("loaded"), false, Attribute::all())
        .build())
}

#[cfg(test)]
mod tests {
    use super::super::{
        LexicalPathResolver, MemorySourceLoader, clean, register_core_module, register_native_module,
    };
    use super::*;
    use std::sync::Arc;

    const HOME_FILES: &[(&str, &str)] = &[
        ("/home/src/app/app.js", "exports.name = 'app';"),
        ("/home/src/app2/app2.json", r#"{"name": "app2"}"#),
        ("/home/src/app3/index.js", "exports.name = 'app3';"),
        ("/home/src/app4/index.json", r#"{"name": "app4"}"#),
        ("/home/src/app5/package.json", r#"{"main": "app5.js"}"#),
        ("/home/src/app5/app5.js", "exports.name = 'app5';"),
        ("/home/src/app6/package.json", r#"{"main": "."}"#),
        ("/home/src/app6/index.js", "exports.name = 'app6';"),
        ("/home/src/app7/package.json", r#"{"main": "bin/app7.js"}"#),
        ("/home/src/app7/index.js", "exports.name = 'app7 index';"),
        ("/home/src/app7/bin/app7.js", "exports.name = 'app7';"),
        ("/usr/lib/node_modules/app8", "exports.name = 'app8';"),
        ("/home/src/app9/app9.js", "exports.name = require('./a/file.js').name;"),
        ("/home/src/app9/a/file.js", "exports.name = 'app9';"),
        ("/usr/lib/node_modules/app10/app10.js", "exports.name = 'app10';"),
        ("/home/src/app11/app11.js", "exports.name = require('app12').name;"),
        ("/home/src/app11/node_modules/app12/index.js", "exports.name = 'app12';"),
        ("/home/src/node_modules/app15/index.js", "exports.name = 'app15';"),
        ("node_modules/app14/index.js", "exports.name = 'app14';"),
    ];

    fn registry(files: &[(&str, &str)]) -> Registry {
        let mut loader = MemorySourceLoader::new();
        for (path, contents) in files {
            loader.insert(path, *contents);
        }
        Registry::builder()
            .source_loader(loader)
            .path_resolver(LexicalPathResolver)
            .global_folders(["/usr/lib/node_modules", "/home/src/.node_modules"])
            .build()
    }

    fn enabled(files: &[(&str, &str)]) -> (Context, RequireModule) {
        let mut context = Context::default();
        let module = registry(files).enable(&mut context).unwrap();
        (context, module)
    }

    fn exported_name(value: &JsValue, context: &mut Context) -> String {
        value
            .to_object(context)
            .unwrap()
            .get(js_string!("name"), context)
            .unwrap()
            .to_string(context)
            .unwrap()
            .to_std_string_escaped()
    }

    fn eval(code: &str, context: &mut Context) -> JsResult<JsValue> {
        context.eval(Source::from_bytes(code.as_bytes()))
    }

    #[test]
    fn test_resolve_table() {
        let cases = [
            ("/home/src", "./app/app", Some("app")),
            ("/home/src", "./app/app.js", Some("app")),
            ("/home/src", "./app/bad.js", None),
            ("/home/src", "./app2/app2", Some("app2")),
            ("/home/src", "./app2/app2.json", Some("app2")),
            ("/home/src", "./app/bad.json", None),
            ("/home/src", "./app3", Some("app3")),
            ("/home/src", "./appbad", None),
            ("/home/src", "./app4", Some("app4")),
            ("/home/src", "./appbad", None),
            ("/home/src", "./app5", Some("app5")),
            ("/home/src", "./app6", Some("app6")),
            ("/home/src", "./app7", Some("app7")),
            ("/home/src", "app8", Some("app8")),
            ("/home/src", "./app9/app9", Some("app9")),
            ("/home/src", "app10/app10", Some("app10")),
            ("/home/src", "./app11/app11.js", Some("app12")),
            ("/home/src/app9", "../app9/app9", Some("app9")),
            ("/home/src/app11/lib", "app15", Some("app15")),
            (".", "app14", Some("app14")),
            ("..", "nonexistent", None),
        ];

        for (start, request, expected) in cases {
            let (mut context, module) = enabled(HOME_FILES);
            let result = module.resolve(request, Path::new(start), &mut context);
            match expected {
                Some(name) => {
                    let exports = result.unwrap_or_else(|err| panic!("{request}: {err}"));
                    assert_eq!(exported_name(&exports, &mut context), name, "{request}");
                }
                None => assert!(result.is_err(), "{request} should fail"),
            }
        }
    }

    #[test]
    fn test_missing_module_message() {
        let (mut context, module) = enabled(HOME_FILES);
        let err = module
            .resolve("./appbad", Path::new("/home/src"), &mut context)
            .unwrap_err();
        assert!(matches!(err, RequireError::ModuleNotFound(_)));
        assert_eq!(err.to_string(), "Cannot find module './appbad'");

        let err = eval("require('./nowhere')", &mut context).unwrap_err();
        assert!(err.to_string().contains("Cannot find module './nowhere'"));
    }

    #[test]
    fn test_illegal_module_name() {
        let (mut context, module) = enabled(HOME_FILES);
        assert!(matches!(
            module.require("", &mut context),
            Err(RequireError::IllegalModuleName)
        ));
        assert!(matches!(
            module.require("   ", &mut context),
            Err(RequireError::IllegalModuleName)
        ));
    }

    #[test]
    fn test_cyclic_requires_see_partial_exports() {
        let files = [
            (
                "a.js",
                "var b = require('./b.js'); exports.test = function() { return b.test(); };",
            ),
            (
                "b.js",
                "var a = require('./a.js'); exports.test = function() { return typeof a.test; };",
            ),
        ];
        let (mut context, _module) = enabled(&files);
        let result = eval("require('./a.js').test()", &mut context).unwrap();
        assert_eq!(result.to_string(&mut context).unwrap().to_std_string_escaped(), "function");
    }

    #[test]
    fn test_module_evaluated_once() {
        let files = [(
            "/srv/counter.js",
            "globalThis.count = (globalThis.count || 0) + 1; exports.count = globalThis.count;",
        )];
        let (mut context, _module) = enabled(&files);
        let result = eval(
            "var a = require('/srv/counter.js'); var b = require('/srv/counter');\
             [a === b, globalThis.count].join()",
            &mut context,
        )
        .unwrap();
        assert_eq!(result.to_string(&mut context).unwrap().to_std_string_escaped(), "true,1");
    }

    #[test]
    fn test_module_wrapper_arguments() {
        let files = [(
            "/srv/lib/info.js",
            "module.exports = [__filename, __dirname, module.id, this === exports].join('|');",
        )];
        let (mut context, module) = enabled(&files);
        let value = module.require("/srv/lib/info.js", &mut context).unwrap();
        assert_eq!(
            value.to_string(&mut context).unwrap().to_std_string_escaped(),
            "/srv/lib/info.js|/srv/lib|/srv/lib/info.js|true"
        );
    }

    #[test]
    fn test_module_exports_reassignment() {
        let files = [("/srv/fn.js", "module.exports = function() { return 7; };")];
        let (mut context, _module) = enabled(&files);
        let result = eval("require('/srv/fn.js')()", &mut context).unwrap();
        assert_eq!(result.to_number(&mut context).unwrap(), 7.0);

        let loaded = eval("require('/srv/fn.js') && true", &mut context).unwrap();
        assert!(loaded.to_boolean());
    }

    #[test]
    fn test_node_modules_walk() {
        let files = [
            ("/a/b/c/main.js", "module.exports = require('pkg');"),
            ("/a/b/node_modules/pkg/index.js", "exports.name = 'walked';"),
        ];
        let (mut context, module) = enabled(&files);
        let exports = module.require("/a/b/c/main.js", &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "walked");
    }

    #[test]
    fn test_node_modules_before_global_folders() {
        let files = [
            ("/home/src/node_modules/dup.js", "exports.name = 'local';"),
            ("/usr/lib/node_modules/dup.js", "exports.name = 'global';"),
        ];
        let (mut context, module) = enabled(&files);
        let exports = module.resolve("dup", Path::new("/home/src"), &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "local");
    }

    #[test]
    fn test_package_main_preferred_over_index() {
        let files = [
            ("/p/package.json", r#"{"name": "p", "main": "lib/main.js"}"#),
            ("/p/lib/main.js", "exports.name = 'main';"),
            ("/p/index.js", "exports.name = 'index';"),
            ("/q/package.json", "{broken"),
            ("/q/index.js", "exports.name = 'fallback';"),
        ];
        let (mut context, module) = enabled(&files);
        let exports = module.require("/p", &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "main");

        let exports = module.require("/q", &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "fallback");
    }

    #[test]
    fn test_script_errors_propagate_unchanged() {
        let files = [("/m.js", "throw 'test passed';")];
        let (mut context, module) = enabled(&files);

        let err = module.require("/m.js", &mut context).unwrap_err();
        let RequireError::Script(err) = err else {
            panic!("expected a script error, got {err}");
        };
        let thrown = err.as_opaque().and_then(|value| value.as_string().map(|s| s.to_std_string_escaped()));
        assert_eq!(thrown.as_deref(), Some("test passed"));

        let result = eval(
            "try { require('/m.js'); 'no error' } catch (e) { e }",
            &mut context,
        )
        .unwrap();
        assert_eq!(result.to_string(&mut context).unwrap().to_std_string_escaped(), "test passed");
    }

    #[test]
    fn test_failed_module_is_retried() {
        let files = [(
            "/flaky.js",
            "if (!globalThis.ready) throw new Error('not ready'); exports.ok = true;",
        )];
        let (mut context, module) = enabled(&files);
        assert!(module.require("/flaky.js", &mut context).is_err());

        eval("globalThis.ready = true", &mut context).unwrap();
        let exports = module.require("/flaky.js", &mut context).unwrap();
        let ok = exports
            .to_object(&mut context)
            .unwrap()
            .get(js_string!("ok"), &mut context)
            .unwrap();
        assert!(ok.to_boolean());
    }

    #[test]
    fn test_invalid_module() {
        // The body closes the wrapper early so the unit evaluates to an object
        let files = [("/odd.js", "}, 42, {a: 1")];
        let (mut context, module) = enabled(&files);
        assert!(matches!(
            module.require("/odd.js", &mut context),
            Err(RequireError::InvalidModule(_))
        ));
    }

    #[test]
    fn test_syntax_errors_are_hard_errors() {
        let files = [("/broken.js", "exports.x = ;")];
        let (mut context, module) = enabled(&files);
        assert!(matches!(
            module.require("/broken.js", &mut context),
            Err(RequireError::Script(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_a_hard_error() {
        let files = [("/bad.json", "{nope")];
        let (mut context, module) = enabled(&files);
        assert!(matches!(
            module.require("/bad.json", &mut context),
            Err(RequireError::Json { .. })
        ));
    }

    #[test]
    fn test_io_errors_abort_resolution() {
        let registry = Registry::builder()
            .source_loader(|path: &Path| -> io::Result<Vec<u8>> {
                if path == Path::new("/locked.js") {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
                }
            })
            .path_resolver(LexicalPathResolver)
            .build();
        let mut context = Context::default();
        let module = registry.enable(&mut context).unwrap();

        let err = module.require("/locked", &mut context).unwrap_err();
        assert!(matches!(err, RequireError::Io { .. }), "{err}");
    }

    #[test]
    fn test_default_loader_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("module")).unwrap();
        std::fs::write(
            dir.path().join("module/index.js"),
            "throw new Error('test passed');",
        )
        .unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"name": "data"}"#).unwrap();

        let mut context = Context::default();
        let module = Registry::builder()
            .base_dir(dir.path())
            .build()
            .enable(&mut context)
            .unwrap();

        let exports = module.require("./data", &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "data");

        let err = module.require("./module", &mut context).unwrap_err();
        assert!(err.to_string().contains("test passed"), "{err}");
    }

    #[test]
    fn test_default_resolver_evaluates_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("x.js"),
            "globalThis.n = (globalThis.n || 0) + 1;",
        )
        .unwrap();

        let mut context = Context::default();
        Registry::builder()
            .base_dir(dir.path())
            .build()
            .enable(&mut context)
            .unwrap();

        let result = eval(
            "[require('./x') === require('./x.js'), require('./x.js') === require('./x'), globalThis.n].join()",
            &mut context,
        )
        .unwrap();
        assert_eq!(result.to_string(&mut context).unwrap().to_std_string_escaped(), "true,true,1");
    }

    #[test]
    fn test_default_base_dir_is_absolute() {
        let registry = Registry::new();
        assert!(registry.base_dir().is_absolute());
        assert_eq!(registry.base_dir(), clean(&std::env::current_dir().unwrap()));

        let lexical = Registry::builder().path_resolver(LexicalPathResolver).build();
        assert_eq!(lexical.base_dir(), Path::new("."));
    }

    #[test]
    fn test_registry_natives_are_per_registry() {
        let (mut first, _first_module) = enabled(&[]);
        let (mut second, second_module) = enabled(&[]);
        second_module
            .registry()
            .register_native_module("test/./greeting", |module: &JsObject, context: &mut Context| {
                let exports = module.get(js_string!("exports"), context)?.to_object(context)?;
                exports.set(js_string!("name"), js_string!("hello"), false, context)?;
                Ok(())
            });

        let exports = eval("require('test/greeting')", &mut second).unwrap();
        assert_eq!(exported_name(&exports, &mut second), "hello");
        assert!(eval("require('test/greeting')", &mut first).is_err());
    }

    #[test]
    fn test_native_module_instances_are_per_engine() {
        register_native_module("test/engine-local", |module: &JsObject, context: &mut Context| {
            let exports = module.get(js_string!("exports"), context)?.to_object(context)?;
            exports.set(js_string!("name"), js_string!("native"), false, context)?;
            Ok(())
        });

        let registry = registry(&[]);
        let mut first = Context::default();
        let mut second = Context::default();
        registry.enable(&mut first).unwrap();
        registry.enable(&mut second).unwrap();

        eval("require('test/engine-local').name = 'changed'", &mut first).unwrap();
        let first_value = eval("require('test/engine-local')", &mut first).unwrap();
        let second_value = eval("require('test/engine-local')", &mut second).unwrap();
        assert_eq!(exported_name(&first_value, &mut first), "changed");
        assert_eq!(exported_name(&second_value, &mut second), "native");
    }

    #[test]
    fn test_registry_native_overrides_global() {
        register_native_module("test/override", |module: &JsObject, context: &mut Context| {
            let exports = module.get(js_string!("exports"), context)?.to_object(context)?;
            exports.set(js_string!("name"), js_string!("global"), false, context)?;
            Ok(())
        });
        let registry = registry(&[]);
        registry.register_native_module("test/override", |module: &JsObject, context: &mut Context| {
            let exports = module.get(js_string!("exports"), context)?.to_object(context)?;
            exports.set(js_string!("name"), js_string!("local"), false, context)?;
            Ok(())
        });
        let mut context = Context::default();
        let module = registry.enable(&mut context).unwrap();
        let exports = module.require("test/override", &mut context).unwrap();
        assert_eq!(exported_name(&exports, &mut context), "local");
    }

    #[test]
    fn test_core_module_prefix() {
        let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = loads.clone();
        register_core_module("testcore", move |module: &JsObject, context: &mut Context| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let exports = module.get(js_string!("exports"), context)?.to_object(context)?;
            exports.set(js_string!("name"), js_string!("core"), false, context)?;
            Ok(())
        });

        let (mut context, module) = enabled(&[]);
        let prefixed = module.require("node:testcore", &mut context).unwrap();
        let bare = module.require("testcore", &mut context).unwrap();
        assert_eq!(exported_name(&bare, &mut context), "core");
        assert!(JsValue::same_value(&prefixed, &bare));
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);

        assert!(matches!(
            module.require("node:no-such-core", &mut context),
            Err(RequireError::NoSuchBuiltinModule(_))
        ));
    }

    #[test]
    fn test_failing_native_loader_is_retried() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry = registry(&[]);
        registry.register_native_module("flaky-native", move |_: &JsObject, _: &mut Context| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Err(boa_engine::JsNativeError::error()
                    .with_message("first load fails")
                    .into());
            }
            Ok(())
        });
        let mut context = Context::default();
        let module = registry.enable(&mut context).unwrap();

        assert!(module.require("flaky-native", &mut context).is_err());
        assert!(module.require("flaky-native", &mut context).is_ok());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
