use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use symgraph::config::{self, GraphConfig};
use symgraph::indexer::{IndexPhase, IndexProgress};
use symgraph::types::{ParsedFile, Symbol};
use symgraph::{GraphError, GraphStore, IndexOptions, Indexer, TraversalEngine};

#[derive(Debug, Parser)]
#[command(name = "symgraph")]
#[command(version = symgraph::utils::version())]
#[command(about = "Persisted code-dependency graph with bounded traversal queries")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(short = 'p', long = "path", global = true)]
    path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create .symgraph/ with a default config and an empty graph
    Init(InitArgs),
    /// Index the project tree through an external parser command
    Index(IndexArgs),
    /// Apply pre-parsed files (JSON array, object or JSON lines)
    Ingest(IngestArgs),
    /// Transitive callers of a symbol
    Callers(SymbolQueryArgs),
    /// Transitive callees of a symbol
    Callees(SymbolQueryArgs),
    /// Symbols using a type
    TypeUsers(SymbolQueryArgs),
    /// Files affected by a change to a file
    Impact(FileQueryArgs),
    /// Files a file includes, transitively
    Includes(FileQueryArgs),
    /// Resolve a name to a single symbol
    Lookup(LookupArgs),
    /// Shortest call chain between two symbols
    Path(PathArgs),
    /// Re-resolve every pending relation
    Reconcile,
    /// Remove files marked stale
    Prune,
    /// Remove one file from the graph
    Forget(ForgetArgs),
    /// Graph statistics
    Status,
    /// Symbols defined in critical files
    Critical,
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Extra include globs
    #[arg(long = "include")]
    include: Vec<String>,
    /// Extra exclude globs
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    /// Extra critical-path globs
    #[arg(long = "critical")]
    critical: Vec<String>,
}

#[derive(Debug, Args)]
struct IndexArgs {
    /// Program invoked as `<parser> [args..] <relative path>`; must print one
    /// parsed-file JSON object on stdout
    #[arg(long = "parser")]
    parser: String,
    #[arg(long = "parser-arg")]
    parser_args: Vec<String>,
    #[arg(short = 'f', long = "force")]
    force: bool,
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[derive(Debug, Args)]
struct IngestArgs {
    /// Input file, or `-` for stdin
    input: PathBuf,
    #[arg(short = 'f', long = "force")]
    force: bool,
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[derive(Debug, Args)]
struct SymbolQueryArgs {
    /// Symbol name (bare or qualified) or numeric id
    symbol: String,
    /// File path or module prefix used when the name is ambiguous
    #[arg(long = "hint")]
    hint: Option<String>,
    #[arg(short = 'd', long = "depth")]
    depth: Option<usize>,
}

#[derive(Debug, Args)]
struct FileQueryArgs {
    file: String,
    #[arg(short = 'd', long = "depth")]
    depth: Option<usize>,
}

#[derive(Debug, Args)]
struct LookupArgs {
    name: String,
    #[arg(long = "hint")]
    hint: Option<String>,
}

#[derive(Debug, Args)]
struct PathArgs {
    from: String,
    to: String,
    #[arg(short = 'd', long = "depth")]
    depth: Option<usize>,
}

#[derive(Debug, Args)]
struct ForgetArgs {
    file: String,
}

fn main() {
    let cli = Cli::parse();
    let project_root = resolve_project_root(cli.path);

    if let Command::Init(args) = cli.command {
        run_init(&project_root, args);
        return;
    }

    if !is_initialized(&project_root) {
        eprintln!("symgraph not initialized in {}", project_root.display());
        std::process::exit(1);
    }

    let cfg = or_exit(config::load_config(&project_root), "Failed to load config");
    let _guard = symgraph::logging::init_logging(&cfg.logging, cli.verbose, &project_root);
    let store = or_exit(GraphStore::open_project(&project_root), "Failed to open graph");
    let engine = TraversalEngine::new(&store, cfg.traversal);

    match cli.command {
        Command::Init(_) => {}
        Command::Index(args) => run_index(&store, &cfg, args),
        Command::Ingest(args) => run_ingest(&store, &cfg, args),
        Command::Callers(args) => {
            let id = select_symbol(&engine, &args.symbol, args.hint.as_deref());
            print_json(&or_exit(engine.get_symbol_callers(id, args.depth), "Query failed"));
        }
        Command::Callees(args) => {
            let id = select_symbol(&engine, &args.symbol, args.hint.as_deref());
            print_json(&or_exit(engine.get_symbol_callees(id, args.depth), "Query failed"));
        }
        Command::TypeUsers(args) => {
            let id = select_symbol(&engine, &args.symbol, args.hint.as_deref());
            print_json(&or_exit(engine.get_type_users(id, args.depth), "Query failed"));
        }
        Command::Impact(args) => {
            print_json(&or_exit(engine.get_file_impact(&args.file, args.depth), "Query failed"));
        }
        Command::Includes(args) => {
            print_json(&or_exit(engine.get_include_tree(&args.file, args.depth), "Query failed"));
        }
        Command::Lookup(args) => {
            let symbol = engine.get_symbol_by_name_qualified(&args.name, args.hint.as_deref());
            print_json(&or_exit_symbol(symbol));
        }
        Command::Path(args) => {
            let from = select_symbol(&engine, &args.from, None);
            let to = select_symbol(&engine, &args.to, None);
            print_json(&or_exit(
                engine.find_dependency_chain(from, to, args.depth),
                "Query failed",
            ));
        }
        Command::Reconcile => print_json(&or_exit(store.reconcile_all(), "Reconcile failed")),
        Command::Prune => {
            let pruned = or_exit(store.prune_stale(), "Prune failed");
            println!("Pruned {} stale files", pruned.len());
            for path in pruned {
                println!("  {path}");
            }
        }
        Command::Forget(args) => {
            if or_exit(store.remove_file(&args.file), "Remove failed") {
                println!("Removed {}", args.file);
            } else {
                eprintln!("{} is not in the graph", args.file);
                std::process::exit(1);
            }
        }
        Command::Status => run_status(&project_root, &store),
        Command::Critical => print_json(&or_exit(engine.critical_symbols(), "Query failed")),
    }
}

fn run_init(project_root: &Path, args: InitArgs) {
    if is_initialized(project_root) {
        eprintln!("symgraph already initialized in {}", project_root.display());
        return;
    }

    if let Err(err) = create_data_dir(project_root) {
        eprintln!("Failed to create .symgraph directory: {err}");
        std::process::exit(1);
    }

    let mut cfg = config::create_default_config(project_root);
    config::add_include_patterns(&mut cfg, &args.include);
    config::add_exclude_patterns(&mut cfg, &args.exclude);
    config::add_critical_patterns(&mut cfg, &args.critical);
    or_exit(config::save_config(project_root, &cfg), "Failed to write config");
    or_exit(GraphStore::open_project(project_root), "Failed to initialize graph");

    println!("Initialized symgraph in {}", project_root.display());
}

fn run_index(store: &GraphStore, cfg: &GraphConfig, args: IndexArgs) {
    let indexer = or_exit(Indexer::new(store, cfg), "Invalid indexing config");
    let root = indexer.root().to_path_buf();
    let parser = |rel: &str, _content: &str| -> symgraph::Result<ParsedFile> {
        let output = ProcessCommand::new(&args.parser)
            .args(&args.parser_args)
            .arg(rel)
            .current_dir(&root)
            .output()?;
        if !output.status.success() {
            return Err(GraphError::ParseInput {
                path: rel.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut parsed: ParsedFile = serde_json::from_slice(&output.stdout)?;
        if parsed.path.trim().is_empty() {
            parsed.path = rel.to_string();
        }
        Ok(parsed)
    };

    let bar = (!args.quiet).then(progress_bar);
    let on_progress = |progress: IndexProgress| {
        if let Some(bar) = &bar {
            update_progress(bar, &progress);
        }
    };
    let report = or_exit(
        indexer.index_directory(
            &parser,
            IndexOptions { force: args.force },
            Some(&on_progress),
        ),
        "Indexing failed",
    );
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    if !args.quiet {
        println!("Indexed {} files ({} unchanged)", report.indexed(), report.skipped());
        if report.stale_marked > 0 {
            println!("Marked {} missing files stale", report.stale_marked);
        }
        if let Some(reconciled) = report.reconciled {
            println!(
                "Resolved {} of {} pending relations",
                reconciled.resolved, reconciled.scanned
            );
        }
        println!("Completed in {}ms", report.duration_ms);
    }
    report_failures(&report.failures);
}

fn run_ingest(store: &GraphStore, cfg: &GraphConfig, args: IngestArgs) {
    let raw = if args.input.as_os_str() == "-" {
        let mut buf = String::new();
        or_exit(
            std::io::stdin().read_to_string(&mut buf).map_err(GraphError::from),
            "Failed to read stdin",
        );
        buf
    } else {
        or_exit(
            std::fs::read_to_string(&args.input).map_err(GraphError::from),
            "Failed to read input",
        )
    };
    let files = or_exit(parse_ingest_input(&raw), "Invalid parser output");
    let indexer = or_exit(Indexer::new(store, cfg), "Invalid indexing config");

    let bar = (!args.quiet).then(progress_bar);
    if let Some(bar) = &bar {
        bar.set_length(files.len() as u64);
    }
    let on_progress = |progress: IndexProgress| {
        if let Some(bar) = &bar {
            update_progress(bar, &progress);
        }
    };
    let report = indexer.index_batch(&files, IndexOptions { force: args.force }, Some(&on_progress));
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    if !args.quiet {
        let warnings: usize = report.results.iter().map(|r| r.warnings.len()).sum();
        println!(
            "Ingested {} files ({} unchanged, {} warnings)",
            report.indexed(),
            report.skipped(),
            warnings
        );
        println!("Completed in {}ms", report.duration_ms);
    }
    report_failures(&report.failures);
}

fn run_status(project_root: &Path, store: &GraphStore) {
    let stats = or_exit(store.stats(), "Failed to read graph");
    let db_size = std::fs::metadata(store.db_path()).map(|m| m.len()).unwrap_or(0);

    println!("symgraph status\n");
    println!("Project:  {}", project_root.display());
    println!("Config:   {}", config::config_path(project_root).display());
    println!("Database: {} ({} bytes)", store.db_path().display(), db_size);
    println!();
    println!("Files:     {} ({} stale, {} critical)", stats.files, stats.stale_files, stats.critical_files);
    println!("Symbols:   {}", stats.symbols);
    println!("Relations: {} ({} pending)", stats.relations, stats.pending_relations);
    println!(
        "Includes:  {} ({} pending)",
        stats.file_relations, stats.pending_file_relations
    );
}

/// Accepts a JSON array of files, a single file object, or one object per line.
fn parse_ingest_input(raw: &str) -> symgraph::Result<Vec<ParsedFile>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    if let Ok(single) = serde_json::from_str::<ParsedFile>(trimmed) {
        return Ok(vec![single]);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<ParsedFile>(line).map_err(GraphError::from))
        .collect()
}

fn select_symbol(engine: &TraversalEngine<'_>, symbol: &str, hint: Option<&str>) -> i64 {
    if let Ok(id) = symbol.parse::<i64>() {
        return id;
    }
    or_exit_symbol(engine.get_symbol_by_name_qualified(symbol, hint)).id
}

fn or_exit_symbol(result: symgraph::Result<Symbol>) -> Symbol {
    match result {
        Ok(symbol) => symbol,
        Err(GraphError::AmbiguousSymbol { name, candidates }) => {
            eprintln!("`{name}` matches {} symbols; pass --hint:", candidates.len());
            for candidate in candidates {
                eprintln!(
                    "  {} {:?} {}:{}",
                    candidate.qualified_name, candidate.kind, candidate.file_path, candidate.line_start
                );
            }
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Lookup failed: {err}");
            std::process::exit(1);
        }
    }
}

fn or_exit<T>(result: symgraph::Result<T>, context: &str) -> T {
    result.unwrap_or_else(|err| {
        eprintln!("{context}: {err}");
        std::process::exit(1);
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("Failed to encode result: {err}");
            std::process::exit(1);
        }
    }
}

fn report_failures(failures: &[symgraph::indexer::FileFailure]) {
    if failures.is_empty() {
        return;
    }
    eprintln!("{} files failed:", failures.len());
    for failure in failures {
        eprintln!("  {}: {}", failure.path, failure.error);
    }
    std::process::exit(1);
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template("{prefix:>9} [{bar:30.cyan}] {pos}/{len} {wide_msg}") {
        bar.set_style(style);
    }
    bar
}

fn update_progress(bar: &ProgressBar, progress: &IndexProgress) {
    let phase = match progress.phase {
        IndexPhase::Scanning => "Scanning",
        IndexPhase::Parsing => "Parsing",
        IndexPhase::Storing => "Storing",
        IndexPhase::Resolving => "Resolving",
    };
    bar.set_prefix(phase);
    if progress.total > 0 {
        bar.set_length(progress.total as u64);
    }
    bar.set_position(progress.current as u64);
    bar.set_message(progress.current_file.clone().unwrap_or_default());
}

fn resolve_project_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn is_initialized(project_root: &Path) -> bool {
    config::data_dir(project_root).is_dir()
}

fn create_data_dir(project_root: &Path) -> std::io::Result<()> {
    let dir = config::data_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        let content = "# symgraph data files\n# Local to each machine, do not commit\n\n*.db\n*.db-wal\n*.db-shm\n*.log\n";
        std::fs::write(gitignore_path, content)?;
    }
    Ok(())
}
