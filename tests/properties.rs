use css_modules_hook::pipeline::{Decl, Node, Rule, Stage, StageContext, Stylesheet};
use css_modules_hook::{
    CssModulesHook, Error, Exports, FetchEngine, Ignore, Module, ModuleLoader, Options, Result,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Counts how often the pipeline runs on each file.
#[derive(Default)]
struct Counter {
    runs: Mutex<Vec<PathBuf>>,
    total: AtomicUsize,
}

struct CountingStage(Arc<Counter>);

impl Stage for CountingStage {
    fn name(&self) -> &str {
        "count"
    }

    fn run(&self, _sheet: &mut Stylesheet, ctx: &mut StageContext<'_, '_>) -> Result<()> {
        self.0.total.fetch_add(1, Ordering::SeqCst);
        self.0.runs.lock().unwrap().push(ctx.from().to_path_buf());
        Ok(())
    }
}

impl Counter {
    fn runs_of(&self, name: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.file_name().is_some_and(|f| f == name))
            .count()
    }
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn counted(dir: &TempDir, dev_mode: bool) -> (FetchEngine, Arc<Counter>) {
    let counter = Arc::new(Counter::default());
    let engine = FetchEngine::new(
        Options::new()
            .dev_mode(dev_mode)
            .root_dir(dir.path())
            .prepend(CountingStage(Arc::clone(&counter))),
    )
    .unwrap();
    (engine, counter)
}

#[test]
fn normal_mode_returns_the_identical_mapping() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let (engine, counter) = counted(&dir, false);
    let file = dir.path().join("a.css");

    let first = engine.fetch_file(&file).unwrap();
    let second = engine.fetch_file(&file).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.total.load(Ordering::SeqCst), 1);
}

#[test]
fn live_mode_transforms_on_every_fetch() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let (engine, counter) = counted(&dir, true);
    let file = dir.path().join("a.css");

    engine.fetch_file(&file).unwrap();
    engine.fetch_file(&file).unwrap();
    assert_eq!(counter.total.load(Ordering::SeqCst), 2);
    assert!(engine.cache().is_empty());
}

#[test]
fn dependencies_are_fetched_once_in_normal_mode() {
    let dir = project(&[
        ("a.css", ".base { color: red; }"),
        ("b.css", ".button { composes: base from \"./a.css\"; }"),
    ]);
    let (engine, counter) = counted(&dir, false);
    let b = dir.path().join("b.css");

    let first = engine.fetch_file(&b).unwrap();
    let second = engine.fetch_file(&b).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.runs_of("a.css"), 1);
    assert_eq!(counter.runs_of("b.css"), 1);

    let a = engine.fetch_file(&dir.path().join("a.css")).unwrap();
    let button = first.get("button").unwrap();
    assert!(button.ends_with(a.get("base").unwrap()));
    assert_eq!(button.split(' ').count(), 2);
}

#[test]
fn deterministic_scoped_names() {
    let dir = project(&[("a.css", ".title { color: red }")]);
    let file = dir.path().join("a.css");
    let options = || {
        Options::new()
            .root_dir(dir.path())
            .scoped_name_template("[local]_[hash:base64:5]")
    };

    let one = FetchEngine::new(options()).unwrap();
    let two = FetchEngine::new(options()).unwrap();
    let title = one.fetch_file(&file).unwrap().get("title").unwrap().to_string();
    assert_eq!(two.fetch_file(&file).unwrap().get("title"), Some(title.as_str()));
    assert_eq!(one.fetch_file(&file).unwrap().get("title"), Some(title.as_str()));

    let hash = title.strip_prefix("title_").unwrap();
    assert_eq!(hash.len(), 5);
    assert!(hash.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn camel_case_adds_keys_for_the_same_values() {
    let dir = project(&[(
        "a.css",
        ".nav-item { top: 0; }\n.is_active { top: 1px; }\n.plain { top: 2px; }",
    )]);
    let engine = FetchEngine::new(Options::new().root_dir(dir.path()).camel_case(true)).unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert_eq!(tokens.get("navItem"), tokens.get("nav-item"));
    assert_eq!(tokens.get("isActive"), tokens.get("is_active"));
    assert!(tokens.get("nav-item").is_some());
    assert_eq!(tokens.len(), 5);
}

#[test]
fn processed_tokens_replace_the_result() {
    let dir = project(&[("a.css", ".title { color: red; }\n.body { top: 0; }")]);
    let engine = FetchEngine::new(
        Options::new()
            .root_dir(dir.path())
            .process_tokens(|tokens, _, _| tokens.map_values(|_, v| v.to_uppercase())),
    )
    .unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert_eq!(tokens.len(), 2);
    for (_, value) in tokens.iter() {
        assert_eq!(value, value.to_uppercase());
    }
}

#[test]
fn overrides_win_over_computed_tokens() {
    let dir = project(&[("a.css", ".foo { color: red; }")]);
    let mut loader = ModuleLoader::new();
    CssModulesHook::install(Options::new().root_dir(dir.path()), &mut loader).unwrap();

    let module = loader.load(&dir.path().join("a.css")).unwrap();
    let exports = module.tokens().unwrap();
    assert_ne!(exports.get("foo").unwrap().as_deref(), Some("bar"));
    exports.set("foo", "bar");
    assert_eq!(exports.get("foo").unwrap().as_deref(), Some("bar"));
    assert_eq!(exports.get("nothing-here").unwrap(), None);
}

#[test]
fn ignored_files_go_to_the_previous_handler() {
    let dir = project(&[("vendor.css", ".a { }"), ("own.css", ".a { }")]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let previous = {
        let seen = Arc::clone(&seen);
        move |module: &mut Module, filename: &Path| -> Result<()> {
            seen.lock().unwrap().push(filename.to_path_buf());
            module.compile(Exports::Source("untouched".into()));
            Ok(())
        }
    };
    let counter = Arc::new(Counter::default());

    let mut loader = ModuleLoader::new();
    loader.register(".css", Arc::new(previous));
    let hook = CssModulesHook::install(
        Options::new()
            .root_dir(dir.path())
            .ignore(Ignore::predicate(|p| p.ends_with("vendor.css")))
            .prepend(CountingStage(Arc::clone(&counter))),
        &mut loader,
    )
    .unwrap();

    let vendor = loader.load(&dir.path().join("vendor.css")).unwrap();
    assert!(matches!(vendor.exports, Exports::Source(ref s) if s == "untouched"));
    assert_eq!(seen.lock().unwrap().len(), 1);

    let own = loader.load(&dir.path().join("own.css")).unwrap();
    assert!(own.tokens().unwrap().get("a").unwrap().is_some());
    assert_eq!(counter.runs_of("vendor.css"), 0);
    assert_eq!(counter.runs_of("own.css"), 1);
    assert!(hook.proxy(&dir.path().join("vendor.css")).is_none());
}

#[test]
fn missing_imports_propagate_and_cache_nothing() {
    let dir = project(&[
        ("a.css", ".a { composes: b from \"./b.css\"; }"),
        ("b.css", ".b { composes: c from \"./gone.css\"; }"),
    ]);
    let engine = FetchEngine::new(Options::new().root_dir(dir.path())).unwrap();

    let err = engine.fetch_file(&dir.path().join("a.css")).unwrap_err();
    assert!(matches!(err, Error::FileNotFound { ref specifier, .. } if specifier == "./gone.css"));
    assert!(engine.cache().is_empty());

    fs::write(dir.path().join("gone.css"), ".c { top: 0; }").unwrap();
    assert!(engine.fetch_file(&dir.path().join("a.css")).is_ok());
    assert_eq!(engine.cache().len(), 3);
}

#[test]
fn invalid_options_fail_at_install() {
    let mut loader = ModuleLoader::new();
    let err = CssModulesHook::install(
        Options::new().scoped_name_template("no placeholders"),
        &mut loader,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(loader.handler(".css").is_none());
}

/// Remembers the selectors of every rule it sees.
struct Selectors(Arc<Mutex<Vec<String>>>);

impl Stage for Selectors {
    fn name(&self) -> &str {
        "selectors"
    }

    fn run(&self, sheet: &mut Stylesheet, _ctx: &mut StageContext<'_, '_>) -> Result<()> {
        let mut seen = self.0.lock().unwrap();
        sheet.walk_rules_mut(&mut |rule| seen.push(rule.selector.clone()));
        Ok(())
    }
}

/// Exports a fixed token instead of scoping anything.
struct ManualExport;

impl Stage for ManualExport {
    fn name(&self) -> &str {
        "manual-export"
    }

    fn run(&self, sheet: &mut Stylesheet, _ctx: &mut StageContext<'_, '_>) -> Result<()> {
        let export = vec![Node::Decl(Decl::new("title", "manual"))];
        sheet.nodes.push(Node::Rule(Rule::new(":export", export)));
        Ok(())
    }
}

fn css_sink() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str, &Path) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |css: &str, _: &Path| seen.lock().unwrap().push(css.to_string())
    };
    (seen, sink)
}

#[test]
fn preprocessed_source_feeds_the_pipeline() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let engine = FetchEngine::new(
        Options::new()
            .root_dir(dir.path())
            .preprocess_css(|css, _| format!("{css}\n.added {{ top: 0; }}")),
    )
    .unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert!(tokens.get("title").is_some());
    assert!(tokens.get("added").is_some());
}

#[test]
fn process_css_receives_the_final_css() {
    let dir = project(&[("a.css", ".title { composes: base; }\n.base { color: red; }")]);
    let (seen, sink) = css_sink();
    let engine = FetchEngine::new(
        Options::new()
            .root_dir(dir.path())
            .scoped_name_template("[name]_[local]")
            .process_css(sink),
    )
    .unwrap();
    engine.fetch_file(&dir.path().join("a.css")).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(".a_title"));
    assert!(seen[0].contains(".a_base"));
    assert!(!seen[0].contains(":export"));
    assert!(!seen[0].contains(":local"));
    assert!(!seen[0].contains("composes"));
}

#[test]
fn hash_prefix_changes_scoped_names() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let file = dir.path().join("a.css");
    let title = |prefix: &str| {
        let engine = FetchEngine::new(
            Options::new()
                .root_dir(dir.path())
                .scoped_name_template("[local]_[hash:base64:8]")
                .hash_prefix(prefix),
        )
        .unwrap();
        engine.fetch_file(&file).unwrap().get("title").unwrap().to_string()
    };

    assert_eq!(title("one"), title("one"));
    assert_ne!(title("one"), title("two"));
}

#[test]
fn appended_stages_run_after_scoping() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let selectors = Arc::new(Mutex::new(Vec::new()));
    let engine = FetchEngine::new(
        Options::new()
            .root_dir(dir.path())
            .scoped_name_template("[name]_[local]")
            .append(Selectors(Arc::clone(&selectors))),
    )
    .unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    let selectors = selectors.lock().unwrap();
    assert!(selectors.iter().any(|s| s == ".a_title"));
    assert!(selectors.iter().any(|s| s == ":export"));
    assert_eq!(tokens.get("title"), Some("a_title"));
}

#[test]
fn use_stages_replaces_the_defaults_but_keeps_interchange() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let (seen, sink) = css_sink();
    let engine = FetchEngine::new(
        Options::new()
            .root_dir(dir.path())
            .use_stages(vec![Arc::new(ManualExport) as Arc<dyn Stage>])
            .process_css(sink),
    )
    .unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens.get("title"), Some("manual"));
    let seen = seen.lock().unwrap();
    assert!(seen[0].contains(".title {"));
    assert!(!seen[0].contains(":export"));
}

#[test]
fn use_stages_cannot_be_mixed_with_prepend_or_append() {
    let dir = project(&[("a.css", ".title { color: red; }")]);
    let with_prepend = Options::new()
        .root_dir(dir.path())
        .use_stages(vec![Arc::new(ManualExport) as Arc<dyn Stage>])
        .prepend(ManualExport);
    let with_append = Options::new()
        .root_dir(dir.path())
        .use_stages(vec![Arc::new(ManualExport) as Arc<dyn Stage>])
        .append(ManualExport);

    for options in [with_prepend, with_append] {
        let err = FetchEngine::new(options).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

#[test]
fn warnings_do_not_fail_the_fetch() {
    let dir = project(&[("a.css", ".a { colorred; top: 0; }")]);
    let warnings = Arc::new(AtomicUsize::new(usize::MAX));
    let engine = FetchEngine::new(Options::new().root_dir(dir.path()).process_tokens({
        let warnings = Arc::clone(&warnings);
        move |tokens, _, output| {
            warnings.store(output.warnings.len(), Ordering::SeqCst);
            tokens
        }
    }))
    .unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert!(tokens.get("a").is_some());
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
}

#[test]
fn syntax_errors_fail_the_fetch_and_cache_nothing() {
    let dir = project(&[("a.css", ".a { color: red; } }")]);
    let engine = FetchEngine::new(Options::new().root_dir(dir.path())).unwrap();
    let file = dir.path().join("a.css");

    let err = engine.fetch_file(&file).unwrap_err();
    assert!(matches!(err, Error::Transform { .. }));
    assert!(engine.cache().is_empty());

    fs::write(&file, ".a { color: red; }").unwrap();
    assert!(engine.fetch_file(&file).unwrap().get("a").is_some());
    assert_eq!(engine.cache().len(), 1);
}

#[test]
fn unclosed_blocks_fail_the_fetch() {
    let dir = project(&[("a.css", ".title { color: red;\n.body { top: 0 }")]);
    let engine = FetchEngine::new(Options::new().root_dir(dir.path())).unwrap();

    let err = engine.fetch_file(&dir.path().join("a.css")).unwrap_err();
    assert!(matches!(
        err,
        Error::Transform { ref message, .. } if message.contains("Unclosed block")
    ));
    assert!(engine.cache().is_empty());
}

#[test]
fn commented_out_selectors_export_nothing() {
    let dir = project(&[("a.css", ".a /* was .legacy */ { color: red; }")]);
    let engine = FetchEngine::new(Options::new().root_dir(dir.path())).unwrap();
    let tokens = engine.fetch_file(&dir.path().join("a.css")).unwrap();

    assert!(tokens.get("a").is_some());
    assert!(tokens.get("legacy").is_none());
    assert_eq!(tokens.len(), 1);
}
