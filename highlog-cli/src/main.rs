use clap::{Parser, Subcommand};
use highlog::{
    Document, FileBackend, Highlighter, HighlogConfig, Marker, PageKey, Range, RecordId, Store,
};
use serde::Serialize;
use std::fmt::Display;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE_DIR: &str = ".highlog";
const DEFAULT_CONFIG_FILE: &str = "highlog.toml";
const PREVIEW_GRAPHEMES: usize = 60;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the highlight log
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Highlights the first occurrence of a text in an HTML file
    Highlight {
        html: PathBuf,
        url: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "yellow")]
        class: String,
        /// Writes the highlighted document here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replays the logged highlights of a page onto an HTML file
    Replay {
        html: PathBuf,
        url: String,
        #[arg(long)]
        json: bool,
        /// Writes the highlighted document here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Lists the live highlights of a page
    List {
        url: String,
        #[arg(long)]
        json: bool,
    },
    /// Deletes a highlight
    Delete {
        id: String,
        /// Highlighted HTML file to remove the highlight from, in place
        #[arg(long)]
        html: Option<PathBuf>,
    },
    /// Deletes the most recent highlight of a page
    Undo {
        url: String,
        /// Highlighted HTML file to remove the highlight from, in place
        #[arg(long)]
        html: Option<PathBuf>,
    },
    /// Prints the create/delete sum of a page
    Sum { url: String },
    /// Removes records that no longer contribute to any page
    Compact,
    /// Writes every record as JSON lines
    Export { file: Option<PathBuf> },
    /// Reads records written by export
    Import { file: PathBuf },
}

#[derive(Serialize)]
struct ListedHighlight {
    id: String,
    class: String,
    date: u64,
    text: String,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    let mut highlighter = open_highlighter(cli.store.as_deref(), &config);

    match cli.command {
        Commands::Highlight {
            html,
            url,
            text,
            class,
            output,
        } => highlight_command(&mut highlighter, &config, &html, &url, &text, &class, output),
        Commands::Replay {
            html,
            url,
            json,
            output,
        } => replay_command(&highlighter, &config, &html, &url, json, output),
        Commands::List { url, json } => list_command(&highlighter, &config, &url, json),
        Commands::Delete { id, html } => delete_command(&mut highlighter, &id, html),
        Commands::Undo { url, html } => undo_command(&mut highlighter, &config, &url, html),
        Commands::Sum { url } => sum_command(&highlighter, &config, &url),
        Commands::Compact => compact_command(&mut highlighter),
        Commands::Export { file } => export_command(&highlighter, file),
        Commands::Import { file } => import_command(&mut highlighter, &file),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HIGHLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
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

fn load_config(path: Option<&Path>) -> HighlogConfig {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    or_exit(HighlogConfig::load_from_path(path)).unwrap_or_default()
}

fn open_highlighter(store: Option<&Path>, config: &HighlogConfig) -> Highlighter<FileBackend> {
    let root = store
        .map(Path::to_path_buf)
        .or_else(|| config.store.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    debug!(root = %root.display(), "opening highlight log");
    let backend = or_exit(FileBackend::open(&root));
    let store = or_exit(Store::with_config(backend, config.store.clone()));
    Highlighter::new(store, Marker::new(config.marker.clone()))
}

fn page_key(config: &HighlogConfig, url: &str) -> PageKey {
    or_exit(PageKey::from_url(url, &config.page_key))
}

fn read_document(path: &Path) -> Document {
    Document::parse_html(&or_exit(fs::read_to_string(path)))
}

fn write_document(path: &Path, doc: &Document) {
    or_exit(fs::write(path, doc.to_html()));
}

fn highlight_command(
    highlighter: &mut Highlighter<FileBackend>,
    config: &HighlogConfig,
    html: &Path,
    url: &str,
    text: &str,
    class: &str,
    output: Option<PathBuf>,
) {
    let page = page_key(config, url);
    let mut doc = read_document(html);
    // Anchors are computed against the page as a reader sees it, with the
    // logged highlights already applied.
    let report = or_exit(highlighter.replay(&mut doc, &page));
    if !report.all_found() {
        warn!(
            missing = report.failures.len(),
            "some logged highlights could not be replayed"
        );
    }
    let Some(range) = Range::find_text(&doc, text) else {
        eprintln!("Error: text {text:?} not found in {}", html.display());
        std::process::exit(1);
    };
    let record = or_exit(highlighter.create(&mut doc, &page, &range, class));
    if let Some(output) = output {
        write_document(&output, &doc);
    }
    println!("{}", record.id);
}

fn replay_command(
    highlighter: &Highlighter<FileBackend>,
    config: &HighlogConfig,
    html: &Path,
    url: &str,
    json: bool,
    output: Option<PathBuf>,
) {
    let page = page_key(config, url);
    let mut doc = read_document(html);
    let report = or_exit(highlighter.replay(&mut doc, &page));
    if let Some(output) = output {
        write_document(&output, &doc);
    }

    if json {
        let output = serde_json::json!({
            "report": report,
            "indicator": report.indicator(),
        });
        println!("{}", or_exit(serde_json::to_string_pretty(&output)));
    } else if report.all_found() {
        println!("Replayed {} highlight(s).", report.marked);
    } else {
        println!(
            "Replayed {} highlight(s), {} not found:",
            report.marked,
            report.failures.len()
        );
        for id in &report.failures {
            println!("  {id}");
        }
    }

    if !report.all_found() {
        std::process::exit(2);
    }
}

fn list_command(
    highlighter: &Highlighter<FileBackend>,
    config: &HighlogConfig,
    url: &str,
    json: bool,
) {
    let page = page_key(config, url);
    let listed: Vec<ListedHighlight> = or_exit(highlighter.highlights(&page))
        .into_iter()
        .filter_map(|record| {
            let create = record.as_create()?;
            Some(ListedHighlight {
                id: record.id.to_string(),
                class: create.style_class.clone(),
                date: record.date,
                text: create.preview(PREVIEW_GRAPHEMES),
            })
        })
        .collect();

    if json {
        println!("{}", or_exit(serde_json::to_string_pretty(&listed)));
    } else if listed.is_empty() {
        println!("No highlights.");
    } else {
        for item in listed {
            println!("{}\t{}\t{}", item.id, item.class, item.text);
        }
    }
}

fn delete_command(highlighter: &mut Highlighter<FileBackend>, id: &str, html: Option<PathBuf>) {
    let mut doc = html.as_deref().map(read_document);
    let mut tabs: Vec<&mut Document> = doc.iter_mut().collect();
    let outcome = or_exit(highlighter.delete(&mut tabs, &RecordId::new(id)));
    if let (Some(path), Some(doc)) = (html, doc.as_ref()) {
        write_document(&path, doc);
    }
    println!("Deleted {id} ({} live left)", outcome.sum.max(0));
}

fn undo_command(
    highlighter: &mut Highlighter<FileBackend>,
    config: &HighlogConfig,
    url: &str,
    html: Option<PathBuf>,
) {
    let page = page_key(config, url);
    let mut doc = html.as_deref().map(read_document);
    let mut tabs: Vec<&mut Document> = doc.iter_mut().collect();
    let outcome = or_exit(highlighter.undo(&mut tabs, &page));
    if let (Some(path), Some(doc)) = (html, doc.as_ref()) {
        write_document(&path, doc);
    }
    println!("Undid highlight ({} live left)", outcome.sum.max(0));
}

fn sum_command(highlighter: &Highlighter<FileBackend>, config: &HighlogConfig, url: &str) {
    let page = page_key(config, url);
    println!("{}", or_exit(highlighter.store().sum(&page)));
}

fn compact_command(highlighter: &mut Highlighter<FileBackend>) {
    let store = highlighter.store_mut();
    let orphans = or_exit(store.remove_orphans());
    let mut superfluous = 0;
    for page in or_exit(store.page_keys()) {
        superfluous += or_exit(store.remove_superfluous(&page)).len();
    }
    println!("Removed {orphans} orphaned and {superfluous} superfluous record(s).");
}

fn export_command(highlighter: &Highlighter<FileBackend>, file: Option<PathBuf>) {
    let store = highlighter.store();
    let count = match file {
        Some(path) => or_exit(store.export(io::BufWriter::new(or_exit(fs::File::create(path))))),
        None => or_exit(store.export(io::stdout().lock())),
    };
    debug!(count, "exported records");
}

fn import_command(highlighter: &mut Highlighter<FileBackend>, file: &Path) {
    let reader = BufReader::new(or_exit(fs::File::open(file)));
    let report = or_exit(highlighter.store_mut().import(reader));
    println!(
        "Imported {} record(s), skipped {} existing.",
        report.imported, report.skipped
    );
}
