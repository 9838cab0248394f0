use clap::Parser;
use colored::Colorize;
use css_modules_hook::utils::display_path;
use css_modules_hook::{CssModulesHook, Exports, FileConfig, ModuleLoader, Options, watcher};
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser, Debug)]
#[command(name = "csshook")]
#[command(about = "Load style files as modules of scoped class-name tokens")]
struct Args {
    /// Settings file (defaults to csshook.toml in the working directory)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Re-transform on every access instead of caching
    #[arg(long = "dev")]
    dev: bool,

    /// Also export camelCased token names
    #[arg(long = "camel-case")]
    camel_case: bool,

    /// Scoped-name template, e.g. "[name]__[local]___[hash:base64:5]"
    #[arg(long = "scoped-name")]
    scoped_name: Option<String>,

    /// Seed mixed into every generated hash
    #[arg(long = "hash-prefix")]
    hash_prefix: Option<String>,

    /// Base directory for relative names in generated identifiers
    #[arg(long = "root")]
    root: Option<PathBuf>,

    /// Print the transformed CSS as well
    #[arg(long = "css")]
    css: bool,

    /// Reprint the tokens whenever a watched file changes
    #[arg(short = 'w', long = "watch")]
    watch: bool,

    /// Log every transformation with timings
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Style files to load
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let options = build_options(&args)?;
    let mut loader = ModuleLoader::new();
    let _hook = CssModulesHook::install(options, &mut loader)?;

    print_tokens(&loader, &args.files)?;
    if !args.watch {
        return Ok(());
    }

    let mut roots: Vec<PathBuf> = args
        .files
        .iter()
        .filter_map(|f| f.parent().map(Path::to_path_buf))
        .map(|dir| if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir })
        .collect();
    roots.sort();
    roots.dedup();

    watcher::watch(&roots, |changed| {
        for path in changed {
            println!("{} {}", "changed".yellow(), display_path(path));
        }
        if let Err(e) = print_tokens(&loader, &args.files) {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
    })
}

fn build_options(args: &Args) -> Result<Options, Box<dyn std::error::Error>> {
    let cwd = env::current_dir()?;
    let mut options = Options::new();

    let file_config = match &args.config {
        Some(path) => {
            let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.clone());
            Some((FileConfig::load(path)?, base))
        }
        None => FileConfig::load_from_dir(&cwd)?.map(|config| (config, cwd.clone())),
    };
    if let Some((config, base)) = file_config {
        options = config.apply(options, &base)?;
    }

    if args.dev || args.watch {
        options = options.dev_mode(true);
    }
    if args.camel_case {
        options = options.camel_case(true);
    }
    if let Some(template) = &args.scoped_name {
        options = options.scoped_name_template(template.clone());
    }
    if let Some(prefix) = &args.hash_prefix {
        options = options.hash_prefix(prefix.clone());
    }
    if let Some(root) = &args.root {
        options = options.root_dir(root.clone());
    }
    if args.verbose {
        options = options.verbose(true);
    }
    if args.css {
        options = options.process_css(|css: &str, path: &Path| {
            println!("/* {} */\n{}", display_path(path), css);
        });
    }
    Ok(options)
}

/// Prints one JSON object mapping every file to its tokens.
fn print_tokens(
    loader: &ModuleLoader,
    files: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = Map::new();
    for file in files {
        let module = loader.load(file)?;
        let value = match &module.exports {
            Exports::Tokens(exports) => {
                let tokens = exports.inspect()?;
                let mapping: Map<String, Value> = tokens
                    .sorted()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect();
                Value::Object(mapping)
            }
            Exports::Source(text) => Value::String(text.clone()),
            Exports::Empty => Value::Null,
        };
        out.insert(display_path(&module.filename), value);
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
    Ok(())
}
