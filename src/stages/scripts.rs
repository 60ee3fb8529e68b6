//! A small CommonJS bundler.
//!
//! Every module is wrapped into a factory and registered in a global module
//! table shared by all bundles on the page, so `app.js` can `require` what
//! `vendor.js` defined.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::config::Manifest;
use crate::output::{Output, normalize_path};
use crate::{Mode, TaskContext};

static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("Error compiling require pattern")
});

const RUNTIME: &str = r#"var __modules = typeof __modules === "object" ? __modules : {};
var __require = typeof __require === "function" ? __require : (function () {
  var cache = {};
  return function load(id) {
    if (cache[id]) return cache[id].exports;
    var def = __modules[id];
    if (!def) throw new Error("Cannot find module '" + id + "'");
    var module = cache[id] = { exports: {} };
    def[0].call(module.exports, function (name) { return load(def[1][name] || name); }, module, module.exports);
    return module.exports;
  };
})();
"#;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Cannot resolve module '{specifier}' required from {from}")]
    Unresolved { specifier: String, from: Utf8PathBuf },

    #[error("Vendor dependency '{name}' has no entry file at {entry}")]
    MissingVendor { name: String, entry: Utf8PathBuf },

    #[error("Invalid package.json of vendor dependency '{0}'")]
    Package(String, #[source] serde_json::Error),

    #[error("Application entry point {0} does not exist")]
    MissingEntry(Utf8PathBuf),
}

#[derive(Deserialize)]
struct PackageJson {
    main: Option<String>,
}

#[derive(Debug)]
struct Module {
    source: String,
    links: BTreeMap<String, String>,
    origin: Utf8PathBuf,
}

/// How bare specifiers like `require('zepto')` are treated while walking.
#[derive(Clone, Copy)]
enum Externals<'a> {
    /// Must name a manifest dependency.
    Manifest(&'a Manifest),
    /// Left for the runtime to resolve.
    Any,
}

pub(crate) fn vendor(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;
    let mut modules = BTreeMap::new();
    let mut aliases = Vec::new();

    for name in ctx.env.manifest.names() {
        let entry = vendor_entry(&paths.modules, name)?;
        let id = walk(&entry, &paths.modules, Externals::Any, &mut modules)?;
        aliases.push((name.to_owned(), id));
    }

    let bundle = render(&modules, &aliases, None, ctx.env.mode)?;
    Ok(vec![Output::text(paths.dev.join("vendor.js"), bundle)])
}

pub(crate) fn app(ctx: &TaskContext) -> anyhow::Result<Vec<Output>> {
    let paths = &ctx.env.paths;
    let entry = paths.src.join("app.js");
    if !entry.is_file() {
        return Err(ScriptError::MissingEntry(entry).into());
    }

    let mut modules = BTreeMap::new();
    let id = walk(
        &entry,
        &paths.src,
        Externals::Manifest(&ctx.env.manifest),
        &mut modules,
    )?;

    let bundle = render(&modules, &[], Some(&id), ctx.env.mode)?;
    Ok(vec![Output::text(paths.dev.join("app.js"), bundle)])
}

/// The file a package exposes through the `main` field of its
/// `package.json`, `index.js` by default.
fn vendor_entry(modules: &Utf8Path, name: &str) -> anyhow::Result<Utf8PathBuf> {
    let dir = modules.join(name);
    let manifest = dir.join("package.json");

    let main = if manifest.is_file() {
        let text = fs::read_to_string(&manifest)?;
        let package: PackageJson = serde_json::from_str(&text)
            .map_err(|e| ScriptError::Package(name.to_owned(), e))?;
        package.main.unwrap_or_else(|| "index.js".to_owned())
    } else {
        "index.js".to_owned()
    };

    let entry = normalize_path(&dir.join(main));
    resolve_file(&entry).ok_or_else(|| {
        ScriptError::MissingVendor {
            name: name.to_owned(),
            entry,
        }
        .into()
    })
}

/// Tries `path`, `path.js` and `path/index.js`, in that order.
fn resolve_file(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let candidates = [
        path.to_owned(),
        Utf8PathBuf::from(format!("{path}.js")),
        path.join("index.js"),
    ];

    candidates.into_iter().find(|candidate| candidate.is_file())
}

fn module_id(base: &Utf8Path, file: &Utf8Path) -> String {
    file.strip_prefix(base).unwrap_or(file).as_str().replace('\\', "/")
}

/// Collects `entry` and every module reachable from it through relative
/// `require` calls into `modules`. Returns the id of the entry module.
fn walk(
    entry: &Utf8Path,
    base: &Utf8Path,
    externals: Externals,
    modules: &mut BTreeMap<String, Module>,
) -> anyhow::Result<String> {
    let base = &normalize_path(base);
    let entry = normalize_path(entry);
    let entry_id = module_id(base, &entry);
    let mut queue = vec![entry];

    while let Some(file) = queue.pop() {
        let id = module_id(base, &file);
        if modules.contains_key(&id) {
            continue;
        }

        let text = fs::read_to_string(&file)?;

        if file.extension() == Some("html") {
            let source = format!("module.exports = {};", serde_json::to_string(&text)?);
            modules.insert(
                id,
                Module {
                    source,
                    links: BTreeMap::new(),
                    origin: file,
                },
            );
            continue;
        }

        let mut links = BTreeMap::new();
        for capture in REQUIRE.captures_iter(&text) {
            let specifier = &capture[1];

            if specifier.starts_with("./") || specifier.starts_with("../") {
                // modules outside the base directory have no id
                let parent = file.parent().unwrap_or(base);
                let target = resolve_file(&normalize_path(&parent.join(specifier)))
                    .filter(|target| target.starts_with(base))
                    .ok_or_else(|| ScriptError::Unresolved {
                        specifier: specifier.to_owned(),
                        from: file.clone(),
                    })?;

                links.insert(specifier.to_owned(), module_id(base, &target));
                queue.push(target);
                continue;
            }

            if let Externals::Manifest(manifest) = externals
                && !manifest.contains(specifier)
            {
                return Err(ScriptError::Unresolved {
                    specifier: specifier.to_owned(),
                    from: file.clone(),
                }
                .into());
            }
        }

        modules.insert(
            id,
            Module {
                source: text,
                links,
                origin: file,
            },
        );
    }

    Ok(entry_id)
}

fn render(
    modules: &BTreeMap<String, Module>,
    aliases: &[(String, String)],
    entry: Option<&str>,
    mode: Mode,
) -> anyhow::Result<String> {
    let mut out = String::from(RUNTIME);

    for (id, module) in modules {
        let key = serde_json::to_string(id)?;
        let links = serde_json::to_string(&module.links)?;

        writeln!(out, "__modules[{key}] = [function (require, module, exports) {{")?;
        out.push_str(&module.source);
        if !module.source.ends_with('\n') {
            out.push('\n');
        }
        if mode == Mode::Watch {
            writeln!(out, "//# sourceURL={}", module.origin)?;
        }
        writeln!(out, "}}, {links}];")?;
    }

    for (name, id) in aliases {
        writeln!(
            out,
            "__modules[{}] = [function (require, module) {{ module.exports = require({}); }}, {{}}];",
            serde_json::to_string(name)?,
            serde_json::to_string(id)?
        )?;
    }

    if let Some(entry) = entry {
        writeln!(out, "__require({});", serde_json::to_string(entry)?)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_walk_relative_modules() {
        let (_dir, src) = sandbox();
        fs::create_dir_all(src.join("modules/nav")).unwrap();
        fs::write(
            src.join("app.js"),
            "var nav = require('./modules/nav');\nvar $ = require(\"zepto\");\n",
        )
        .unwrap();
        fs::write(
            src.join("modules/nav/index.js"),
            "module.exports = require('./template.html');\n",
        )
        .unwrap();
        fs::write(src.join("modules/nav/template.html"), "<nav>\"hi\"</nav>").unwrap();

        let manifest = Manifest::from_names(["zepto"]);
        let mut modules = BTreeMap::new();
        let id = walk(
            &src.join("app.js"),
            &src,
            Externals::Manifest(&manifest),
            &mut modules,
        )
        .unwrap();

        assert_eq!(id, "app.js");
        assert_eq!(
            modules.keys().collect::<Vec<_>>(),
            ["app.js", "modules/nav/index.js", "modules/nav/template.html"]
        );
        assert_eq!(
            modules["app.js"].links["./modules/nav"],
            "modules/nav/index.js"
        );
        assert_eq!(
            modules["modules/nav/template.html"].source,
            r#"module.exports = "<nav>\"hi\"</nav>";"#
        );
    }

    #[test]
    fn test_unknown_bare_specifier() {
        let (_dir, src) = sandbox();
        fs::write(src.join("app.js"), "require('left-pad');").unwrap();

        let manifest = Manifest::default();
        let error = walk(
            &src.join("app.js"),
            &src,
            Externals::Manifest(&manifest),
            &mut BTreeMap::new(),
        )
        .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<ScriptError>(),
            Some(ScriptError::Unresolved { specifier, .. }) if specifier == "left-pad"
        ));
    }

    #[test]
    fn test_missing_relative_module() {
        let (_dir, src) = sandbox();
        fs::write(src.join("app.js"), "require('./gone');").unwrap();

        let result = walk(
            &src.join("app.js"),
            &src,
            Externals::Any,
            &mut BTreeMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_relative_module_outside_base() {
        let (_dir, root) = sandbox();
        let src = root.join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(root.join("secret.js"), "module.exports = 'key';").unwrap();
        fs::write(src.join("app.js"), "require('../secret');").unwrap();

        let mut modules = BTreeMap::new();
        let error = walk(&src.join("app.js"), &src, Externals::Any, &mut modules).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<ScriptError>(),
            Some(ScriptError::Unresolved { specifier, .. }) if specifier == "../secret"
        ));
        assert!(modules.is_empty());
    }

    #[test]
    fn test_vendor_entry_from_package_main() {
        let (_dir, modules) = sandbox();
        fs::create_dir_all(modules.join("zepto/dist")).unwrap();
        fs::write(modules.join("zepto/package.json"), r#"{"main":"dist/zepto"}"#).unwrap();
        fs::write(modules.join("zepto/dist/zepto.js"), "module.exports = 1;").unwrap();

        assert_eq!(
            vendor_entry(&modules, "zepto").unwrap(),
            modules.join("zepto/dist/zepto.js")
        );
        assert!(vendor_entry(&modules, "absent").is_err());
    }

    #[test]
    fn test_render_bundle() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "app.js".to_owned(),
            Module {
                source: "console.log(1);".to_owned(),
                links: BTreeMap::new(),
                origin: Utf8PathBuf::from("/p/src/app.js"),
            },
        );

        let built = render(&modules, &[], Some("app.js"), Mode::Build).unwrap();
        assert!(built.starts_with(RUNTIME));
        assert!(built.contains("__modules[\"app.js\"] = [function (require, module, exports) {\nconsole.log(1);\n}, {}];"));
        assert!(built.ends_with("__require(\"app.js\");\n"));
        assert!(!built.contains("sourceURL"));

        let watched = render(&modules, &[], Some("app.js"), Mode::Watch).unwrap();
        assert!(watched.contains("//# sourceURL=/p/src/app.js"));
    }
}
