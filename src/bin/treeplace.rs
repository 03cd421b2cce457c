use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use treeplace::common::config::{Config, config_file, layouts_file};
use treeplace::common::log;
use treeplace::layout_engine::{EventResponse, LayoutEngine};
use treeplace::model::saved_layout::SavedLayoutStore;
use treeplace::model::tree::NodeSpec;
use treeplace::replay;

#[derive(Parser)]
struct Cli {
    /// Path to configuration file to use (overrides default).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out a JSON forest and print the resulting positions and edges as JSON.
    Layout {
        /// File containing a JSON array of root nodes.
        forest: PathBuf,

        /// Restore the named layout before the first pass.
        #[arg(long, value_name = "NAME")]
        restore: Option<String>,

        /// Save the result under this name.
        #[arg(long, value_name = "NAME")]
        save: Option<String>,

        /// Layout store to use (overrides default).
        #[arg(long, value_name = "PATH")]
        layouts: Option<PathBuf>,

        /// Also print the tree to stderr.
        #[arg(long)]
        tree: bool,
    },
    /// Replay a recorded script and print every event it produces.
    Replay { script: PathBuf },
    /// Check the configuration file and report any issues.
    Validate,
}

fn main() {
    let opt = Cli::parse();
    log::init_logging();

    let config_path = opt.config.clone().unwrap_or_else(config_file);
    if let Commands::Validate = opt.command {
        process::exit(validate(&config_path));
    }

    let result = Config::read_or_default(&config_path).and_then(|config| match opt.command {
        Commands::Layout { forest, restore, save, layouts, tree } => layout(
            &config,
            forest,
            restore,
            save,
            layouts.unwrap_or_else(layouts_file),
            tree,
        ),
        Commands::Replay { script } => run_replay(&config, script),
        Commands::Validate => Ok(()),
    });
    if let Err(e) = result {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

fn validate(config_path: &Path) -> i32 {
    let config = match Config::read(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return 1;
        }
    };
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config validation passed");
        return 0;
    }
    for issue in issues {
        eprintln!("{}", issue);
    }
    1
}

fn layout(
    config: &Config,
    forest: PathBuf,
    restore: Option<String>,
    save: Option<String>,
    layouts: PathBuf,
    print_tree: bool,
) -> anyhow::Result<()> {
    let text = fs::read_to_string(&forest).with_context(|| format!("reading {}", forest.display()))?;
    let specs: Vec<NodeSpec> = serde_json::from_str(&text).context("parsing forest")?;

    let mut engine = LayoutEngine::new(config);
    let mut store = SavedLayoutStore::load(&layouts)?;
    let response: EventResponse = match &restore {
        Some(name) => {
            let saved = store.get(name).with_context(|| format!("no saved layout named {name:?}"))?;
            engine.load_forest_with_layout(specs, saved)?
        }
        None => engine.load_forest(specs)?,
    };

    if let Some(name) = save {
        _ = store.insert(engine.save_layout(&name));
        store.save(&layouts)?;
    }
    if print_tree {
        eprintln!("{}", engine.tree().draw_tree().trim());
    }

    let nodes: Vec<_> = engine
        .tree()
        .visible()
        .iter()
        .map(|v| {
            let p = v.node.position();
            json!({
                "id": v.id(),
                "x": p.x,
                "y": p.y,
                "manual": engine.is_manual(v.id()),
            })
        })
        .collect();
    let output = json!({
        "pass": response.pass_kind(),
        "nodes": nodes,
        "edges": engine.tree().visible_edges(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_replay(config: &Config, script: PathBuf) -> anyhow::Result<()> {
    let mut failed = None;
    replay::replay(&script, config, |at_ms, event| {
        if failed.is_some() {
            return;
        }
        match ron::ser::to_string(event) {
            Ok(text) => println!("{at_ms:>6} {text}"),
            Err(e) => failed = Some(e),
        }
    })?;
    match failed {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
