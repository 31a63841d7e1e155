use clap::{Parser, Subcommand};
use md_sections::{
    BlockStore, BlockType, Coordinator, CoordinatorConfig, OutlineEntry, TreeAdapter, ZoomMode,
    outline_entries,
};
use serde::Serialize;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const STORE_DIR: &str = ".mdsections";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Coordinator settings as a JSON file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project in the current directory
    Init {
        #[arg(long)]
        title: Option<String>,
    },
    /// Replace the project's content with a markdown file
    Import { file: PathBuf },
    /// Print the assembled markdown
    Export,
    /// Print the section outline
    Outline {
        #[arg(long)]
        json: bool,
    },
    /// Print one section as the zoomed surface would show it
    Zoom {
        /// Heading text of the section
        heading: String,
        /// Stop at the next heading of any level
        #[arg(long)]
        shallow: bool,
    },
    /// Demote headings that skip a level
    FixHierarchy,
    /// Check the store for integrity violations
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Repair integrity violations
    Repair,
}

#[derive(Serialize)]
struct OutlineOutput<'a> {
    title: &'a str,
    sections: &'a [OutlineEntry],
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = or_exit(env::current_dir()).join(STORE_DIR);

    match cli.command {
        Commands::Init { title } => init_command(&root, title),
        Commands::Import { file } => import_command(&root, &file),
        Commands::Export => export_command(&root),
        Commands::Outline { json } => outline_command(&root, json),
        Commands::Zoom { heading, shallow } => {
            let config = load_config(cli.config.as_deref());
            zoom_command(&root, &heading, shallow, config)
        }
        Commands::FixHierarchy => {
            let config = load_config(cli.config.as_deref());
            fix_hierarchy_command(&root, config)
        }
        Commands::Check { json } => check_command(&root, json),
        Commands::Repair => repair_command(&root),
    }
}

fn or_exit<T, E: Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> CoordinatorConfig {
    match path {
        Some(path) => or_exit(CoordinatorConfig::load(path)),
        None => CoordinatorConfig::default(),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    or_exit(
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build(),
    )
}

fn init_command(root: &Path, title: Option<String>) {
    let title = title.unwrap_or_else(|| {
        root.parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    or_exit(BlockStore::create(root, title.as_str()));
    println!("Initialized project \"{title}\"");
}

fn import_command(root: &Path, file: &Path) {
    let markdown = or_exit(fs::read_to_string(file));
    let mut store = or_exit(BlockStore::open(root));
    let outcome = or_exit(store.replace_all(&markdown, None));
    println!(
        "Imported {} blocks ({} replaced)",
        outcome.ids.len(),
        outcome.removed
    );
}

fn export_command(root: &Path) {
    let store = or_exit(BlockStore::open(root));
    println!("{}", store.document());
}

fn outline_command(root: &Path, json: bool) {
    let store = or_exit(BlockStore::open(root));
    let entries = outline_entries(&store, None);

    if json {
        let output = OutlineOutput {
            title: store.project().map_or("", |project| project.title.as_str()),
            sections: &entries,
        };
        println!("{}", or_exit(serde_json::to_string_pretty(&output)));
        return;
    }
    if entries.is_empty() {
        println!("No sections.");
        return;
    }
    for entry in &entries {
        let indent = "  ".repeat(usize::from(entry.level.saturating_sub(1)));
        let title = if entry.is_pseudo_section {
            "(break)"
        } else {
            entry.title.as_str()
        };
        match entry.aggregate_word_count {
            Some(total) => println!("{indent}{title} ({} words, {total} total)", entry.word_count),
            None => println!("{indent}{title} ({} words)", entry.word_count),
        }
    }
}

fn zoom_command(root: &Path, heading: &str, shallow: bool, config: CoordinatorConfig) {
    let store = or_exit(BlockStore::open(root));
    let Some(id) = store
        .fetch_all()
        .into_iter()
        .find(|block| block.block_type == BlockType::Heading && block.text_content == heading)
        .map(|block| block.id)
    else {
        eprintln!("Error: no section titled \"{heading}\"");
        std::process::exit(1);
    };
    let mode = if shallow {
        ZoomMode::Shallow
    } else {
        ZoomMode::Full
    };

    let coordinator = Coordinator::new(store, Box::new(TreeAdapter::new()), config);
    runtime().block_on(async {
        or_exit(coordinator.bootstrap().await);
        or_exit(coordinator.zoom_in(id, mode).await);
    });
    debug!(members = coordinator.members().map_or(0, |members| members.len()), "zoomed");
    println!("{}", coordinator.surface_content());
}

fn fix_hierarchy_command(root: &Path, config: CoordinatorConfig) {
    let store = or_exit(BlockStore::open(root));
    let coordinator = Coordinator::new(store, Box::new(TreeAdapter::new()), config);
    let fixes = runtime().block_on(async {
        or_exit(coordinator.bootstrap().await);
        or_exit(coordinator.fix_hierarchy().await)
    });

    if fixes.is_empty() {
        println!("Heading levels are consistent.");
        return;
    }
    coordinator.with_store(|store| {
        for fix in &fixes {
            let title = store
                .get(&fix.id)
                .map(|block| block.text_content.clone())
                .unwrap_or_default();
            println!("{title}: level {} -> {}", fix.from, fix.to);
        }
    });
    println!("Fixed {} headings", fixes.len());
}

fn check_command(root: &Path, json: bool) {
    // Load without the automatic repair `open` performs.
    let store = or_exit(BlockStore::load(root));
    let report = store.check_integrity();

    if json {
        println!("{}", or_exit(serde_json::to_string_pretty(&report)));
    } else if report.is_clean() {
        println!("Store is consistent.");
    } else {
        if report.root_missing {
            println!("Root record missing");
        }
        for id in &report.orphans {
            println!("Orphan: {id}");
        }
        for id in &report.foreign_blocks {
            println!("Foreign: {id}");
        }
    }
    if !report.is_clean() {
        std::process::exit(1);
    }
}

fn repair_command(root: &Path) {
    let mut store = or_exit(BlockStore::load(root));
    if store.check_integrity().is_clean() {
        println!("Nothing to repair.");
        return;
    }
    let report = or_exit(store.repair());
    println!(
        "Repaired project {} (identity from {:?}): {} orphans removed, {} blocks reassigned{}",
        report.project_id,
        report.source,
        report.removed_orphans,
        report.reassigned,
        if report.recreated_root {
            ", root record recreated"
        } else {
            ""
        }
    );
}
