use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Blocks and calls `on_change` with the changed files every time something
/// below `roots` settles after a change.
pub fn watch(
    roots: &[PathBuf],
    mut on_change: impl FnMut(&[PathBuf]),
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

    for root in roots {
        let mode = if root.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer.watch(root.as_path(), mode)?;
        println!("{} {}", "Watching".cyan(), root.display());
    }

    for res in rx {
        match res {
            Ok(events) => {
                let mut changed: Vec<PathBuf> = events
                    .iter()
                    .flat_map(|event| event.paths.iter())
                    .filter(|path| looks_like_file(path))
                    .cloned()
                    .collect();
                changed.sort();
                changed.dedup();
                if !changed.is_empty() {
                    on_change(&changed);
                }
            }
            Err(errors) => {
                for e in errors {
                    eprintln!("{} {:?}", "Watch error:".red(), e);
                }
            }
        }
    }

    Ok(())
}

fn looks_like_file(path: &Path) -> bool {
    path.extension().is_some() && !path.is_dir()
}
