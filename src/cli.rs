use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::{
    cli_types::{BuildArgs, DumpArgs, InfoArgs, QueryArgs},
    config::IndexerConfig,
    fingerprint::Fingerprint,
    index::{BuildSummary, Indexer, ProgressEvent},
    parser::literal::unescape,
    query::QueryEngine,
    storage::{open_store, IndexStore, OpenMode},
    types::{display_bytes, IndexEntry, Occurrence},
    ui::UIManager,
};

#[derive(Debug, Serialize)]
struct EntryOutput<'a> {
    fingerprint: String,
    text: String,
    occurrences: Vec<&'a Occurrence>,
}

impl<'a> EntryOutput<'a> {
    fn new(fingerprint: Fingerprint, text: &[u8], occurrences: impl IntoIterator<Item = &'a Occurrence>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            text: display_bytes(text),
            occurrences: occurrences.into_iter().collect(),
        }
    }
}

pub struct CliApp {
    config: IndexerConfig,
    verbose: bool,
    ui: UIManager,
    cancel: Arc<AtomicBool>,
}

impl CliApp {
    pub fn new(config: IndexerConfig, verbose: bool, colors_enabled: bool) -> Result<Self> {
        let config = config.normalized().context("Invalid configuration")?;
        info!("Using index {} ({:?})", config.database.display(), config.backend);

        Ok(Self {
            config,
            verbose,
            ui: UIManager::new(colors_enabled),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Flag that stops a running build after the files in flight.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn build(&self, args: BuildArgs) -> Result<BuildSummary> {
        let mut config = self.config.clone();
        args.apply_to(&mut config);
        let config = config.normalized().context("Invalid build options")?;

        self.ui.print_header("Build");
        self.ui.print_info(&format!(
            "Indexing {} into {}",
            args.root.display(),
            config.database.display()
        ));
        self.ui.print_info(&format!(
            "Adjacent literals: {} (change with --concat)",
            config.concatenation.as_str()
        ));
        if self.verbose {
            self.ui.print_info(&format!("Extensions: {}", config.extensions.join(", ")));
            self.ui.print_info(&format!("Workers: {}", config.worker_count()));
            if !config.exclude.is_empty() {
                self.ui.print_info(&format!("Exclude: {}", config.exclude.join(", ")));
            }
        }

        let ui = self.ui.clone();
        let cancel = Arc::clone(&self.cancel);
        let root = args.root.clone();
        let restart = args.restart;

        let summary = tokio::task::spawn_blocking(move || -> Result<BuildSummary> {
            let mut store = open_store(&config, OpenMode::ReadWrite)
                .with_context(|| format!("Failed to open index {}", config.database.display()))?;
            if restart {
                store.clear().context("Failed to clear index")?;
                ui.print_info("Cleared existing index");
            }

            let indexer = Indexer::new(config).with_cancel_flag(cancel);
            let bar = ui.create_build_progress(0);
            let result = indexer.build(&root, store.as_mut(), &mut |event| match event {
                ProgressEvent::Started { files } => bar.set_length(*files as u64),
                ProgressEvent::Indexed { path, .. } | ProgressEvent::Unchanged { path } => {
                    bar.set_message(short_name(path));
                    bar.inc(1);
                }
                ProgressEvent::Failed(_) => bar.inc(1),
                ProgressEvent::Saved => bar.println("index autosaved"),
            });
            bar.finish_and_clear();

            match result {
                Ok(summary) => {
                    store.close().context("Failed to close index")?;
                    Ok(summary)
                }
                Err(e) => {
                    // Keep what was committed before the failure.
                    let _ = store.close();
                    Err(anyhow::Error::new(e).context(format!("Failed to index {}", root.display())))
                }
            }
        })
        .await
        .context("Build task failed")??;

        self.print_build_summary(&summary);
        Ok(summary)
    }

    /// Look up one string; returns the number of occurrences printed.
    pub async fn query(&self, args: QueryArgs) -> Result<usize> {
        let store = self.open_reader()?;
        let engine = QueryEngine::for_store(store.as_ref())?;
        let ui = self.ui.clone().with_quiet(args.json);

        if args.hash {
            let fingerprint: Fingerprint = args.text.parse()?;
            let entries = engine.entries(fingerprint)?;
            let count = entries.iter().map(|e| e.occurrences.len()).sum();
            if args.json {
                let output: Vec<_> = entries
                    .iter()
                    .map(|e| EntryOutput::new(e.fingerprint, &e.text, &e.occurrences))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if entries.is_empty() {
                ui.print_warning(&format!("No strings with fingerprint {}", fingerprint));
            } else {
                for entry in &entries {
                    self.print_entry(entry);
                }
            }
            return Ok(count);
        }

        let text = if args.escaped {
            unescape(args.text.as_bytes())
        } else {
            args.text.into_bytes()
        };
        let fingerprint = engine.fingerprint(&text);
        let occurrences = engine.lookup(&text)?;

        if args.json {
            let output = EntryOutput::new(fingerprint, &text, &occurrences);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else if occurrences.is_empty() {
            ui.print_warning(&format!("\"{}\" was not found", display_bytes(&text)));
        } else {
            ui.print_success(&format!(
                "\"{}\" [{}]: {} occurrence(s)",
                display_bytes(&text),
                fingerprint,
                occurrences.len()
            ));
            self.print_occurrences(&occurrences);
        }
        Ok(occurrences.len())
    }

    /// Print every entry; returns how many were printed.
    pub async fn dump(&self, args: DumpArgs) -> Result<usize> {
        let store = self.open_reader()?;
        let entries = store.entries().context("Failed to read index")?;
        let limit = args.limit.unwrap_or(usize::MAX);

        let mut printed = 0;
        for entry in entries.iter().take(limit) {
            if args.json {
                let output = EntryOutput::new(entry.fingerprint, &entry.text, &entry.occurrences);
                println!("{}", serde_json::to_string(&output)?);
            } else {
                self.print_entry(entry);
            }
            printed += 1;
        }
        if !args.json && printed < entries.len() {
            self.ui
                .print_info(&format!("{} of {} entries shown", printed, entries.len()));
        }
        Ok(printed)
    }

    pub async fn info(&self, args: InfoArgs) -> Result<()> {
        let store = self.open_reader()?;
        let stats = store.stats().context("Failed to read index statistics")?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        self.ui.print_header("Index");
        println!("  {:<14} {}", "location", self.config.database.display());
        println!("  {:<14} {:?}", "backend", self.config.backend);
        println!("  {:<14} {}", "fingerprint", stats.algorithm);
        println!("  {:<14} {}", "files", stats.files);
        println!("  {:<14} {}", "strings", stats.entries);
        println!("  {:<14} {}", "fingerprints", stats.fingerprints);
        println!("  {:<14} {}", "collisions", stats.collisions);
        println!("  {:<14} {}", "functions", stats.functions);
        println!("  {:<14} {}", "occurrences", stats.occurrences);
        if let Ok(metadata) = std::fs::metadata(&self.config.database) {
            println!("  {:<14} {:.1} MiB", "size", metadata.len() as f64 / (1024.0 * 1024.0));
        }
        Ok(())
    }

    fn open_reader(&self) -> Result<Box<dyn IndexStore>> {
        open_store(&self.config, OpenMode::ReadOnly).with_context(|| {
            format!(
                "Failed to open index {} (run 'strdb build' first)",
                self.config.database.display()
            )
        })
    }

    fn print_build_summary(&self, summary: &BuildSummary) {
        if summary.cancelled {
            self.ui.print_warning("Build cancelled; files committed so far are kept");
        }
        self.ui.print_success(&format!(
            "Indexed {} of {} files ({} unchanged, {} failed) in {:.2?}",
            summary.files_indexed,
            summary.files_seen,
            summary.files_unchanged,
            summary.files_failed(),
            summary.elapsed
        ));
        self.ui.print_info(&format!(
            "{} literals collected, {} filtered, {} records committed",
            summary.literals_collected, summary.literals_filtered, summary.records_committed
        ));
        self.ui.print_info(&format!(
            "{:.1} files/s, {:.1} KB/s",
            summary.files_per_second(),
            summary.kilobytes_per_second()
        ));

        if !summary.failures.is_empty() {
            self.ui.print_header("Failures");
            for failure in &summary.failures {
                self.ui.print_warning(&failure.to_string());
            }
        }
    }

    fn print_entry(&self, entry: &IndexEntry) {
        println!(
            "{} \"{}\"",
            entry.fingerprint.to_string().dimmed(),
            entry.display_text().bold()
        );
        self.print_occurrences(&entry.occurrences);
    }

    fn print_occurrences(&self, occurrences: &BTreeSet<Occurrence>) {
        for occurrence in occurrences {
            println!(
                "    {}:{}  {}",
                occurrence.file,
                occurrence.line.to_string().cyan(),
                occurrence.function.green()
            );
        }
    }
}

fn short_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
