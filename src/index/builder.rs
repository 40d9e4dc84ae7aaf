use crossbeam::channel;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::assign::build_records;
use super::summary::{BuildSummary, FileFailure};
use crate::config::IndexerConfig;
use crate::error::{IndexError, Result, StoreError};
use crate::extract::{collect_literals, extract_scopes, ExtractOptions};
use crate::fingerprint::{content_hash, Fingerprinter};
use crate::parser::{SourceParser, TreeSitterParser};
use crate::scanner::SourceEnumerator;
use crate::storage::IndexStore;
use crate::types::{FileContribution, SourceFile};

// Deeply nested initializers recurse deeply in the lowering pass.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Build progress, reported from the aggregating thread in commit order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { files: usize },
    Indexed { path: String, records: usize },
    Unchanged { path: String },
    Failed(FileFailure),
    Saved,
}

/// Result of processing one file on a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Indexed {
        contribution: FileContribution,
        literals: usize,
        filtered: usize,
    },
    Unchanged {
        path: String,
        size: u64,
    },
    Failed(FileFailure),
    Cancelled,
}

pub struct Indexer {
    config: IndexerConfig,
    parser: Arc<dyn SourceParser>,
    fingerprinter: Arc<dyn Fingerprinter>,
    options: ExtractOptions,
    settings_seed: u64,
    cancel: Arc<AtomicBool>,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let parser: Arc<dyn SourceParser> = Arc::new(TreeSitterParser::from_config(&config));
        let fingerprinter = config.hash.fingerprinter();
        let options = ExtractOptions::from_config(&config);
        let settings_seed = settings_seed(&config);
        Self {
            config,
            parser,
            fingerprinter,
            options,
            settings_seed,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Share a cancellation flag with e.g. a signal handler.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Ask workers to stop before their next file.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Read, parse, extract and join one file. Pure with respect to the store.
    pub fn index_file(&self, file: &SourceFile, known_hash: Option<u64>) -> FileOutcome {
        if self.cancel.load(Ordering::Relaxed) {
            return FileOutcome::Cancelled;
        }

        let source = match fs::read(&file.path) {
            Ok(source) => source,
            Err(e) => {
                return FileOutcome::Failed(FileFailure::from_error(&file.path, &IndexError::io(&file.path, e)));
            }
        };
        let hash = content_hash(&source, self.settings_seed);
        if known_hash == Some(hash) {
            return FileOutcome::Unchanged {
                path: file.key(),
                size: source.len() as u64,
            };
        }

        let tree = match self.parser.parse(&file.path, &source) {
            Ok(tree) => tree,
            Err(e) => return FileOutcome::Failed(FileFailure::from_error(&file.path, &IndexError::Parse(e))),
        };
        if !tree.diagnostics.is_empty() {
            debug!(
                "{}: recovered from {} syntax error(s), first: {}",
                file.path.display(),
                tree.diagnostics.len(),
                tree.diagnostics[0]
            );
        }

        let scopes = extract_scopes(&tree, &self.options);
        let mut literals = collect_literals(&tree, &self.options);
        let collected = literals.len();
        if self.config.min_length > 0 {
            literals.retain(|literal| literal.value.len() >= self.config.min_length);
        }
        let filtered = collected - literals.len();

        let records = build_records(&scopes, &literals, self.fingerprinter.as_ref());
        FileOutcome::Indexed {
            contribution: FileContribution {
                path: file.key(),
                content_hash: hash,
                size: source.len() as u64,
                records,
            },
            literals: collected,
            filtered,
        }
    }

    /// Index every source file under `root` into `store`.
    ///
    /// Per-file failures are collected in the summary. A store error stops
    /// the workers and is returned; files committed before it stay committed.
    pub fn build(
        &self,
        root: impl AsRef<Path>,
        store: &mut dyn IndexStore,
        progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<BuildSummary> {
        let started = Instant::now();
        if store.algorithm() != self.fingerprinter.name() {
            return Err(StoreError::AlgorithmMismatch {
                stored: store.algorithm().to_string(),
                requested: self.fingerprinter.name().to_string(),
            }
            .into());
        }

        let enumerator = SourceEnumerator::new(root.as_ref(), &self.config)?;
        let files: Vec<SourceFile> = enumerator.iter().collect();
        let known: HashMap<String, u64> = if self.config.force {
            HashMap::new()
        } else {
            store.indexed_files()?
        };

        let workers = self.config.worker_count();
        info!(
            "Indexing {} files under {} with {} workers (concatenation: {}, fingerprint: {})",
            files.len(),
            enumerator.root().display(),
            workers,
            self.config.concatenation.as_str(),
            self.fingerprinter.name()
        );

        let mut summary = BuildSummary::new(enumerator.root());
        summary.files_seen = files.len();
        progress(&ProgressEvent::Started { files: files.len() });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .stack_size(WORKER_STACK_SIZE)
            .thread_name(|i| format!("strdb-worker-{}", i))
            .build()
            .map_err(|e| IndexError::Config(format!("cannot start worker pool: {}", e)))?;

        let (sender, receiver) = channel::bounded::<FileOutcome>(workers * 2);
        let autosave = self.config.autosave_interval();
        let mut last_save = Instant::now();
        let mut store_error: Option<StoreError> = None;

        pool.in_place_scope(|scope| {
            let files = &files;
            let known = &known;
            scope.spawn(move |_| {
                files.par_iter().for_each_with(sender, |sender, file| {
                    let outcome = self.index_file(file, known.get(&file.key()).copied());
                    if outcome != FileOutcome::Cancelled {
                        // The receiver outlives every worker.
                        let _ = sender.send(outcome);
                    }
                });
            });

            // Single writer: every commit happens on this thread.
            for outcome in receiver.iter() {
                if store_error.is_some() {
                    continue;
                }
                let mut result = self.aggregate(outcome, store, &mut summary, progress);
                if result.is_ok() && autosave.is_some_and(|every| last_save.elapsed() >= every) {
                    result = store.flush();
                    last_save = Instant::now();
                    info!("Autosaved index ({} files so far)", summary.files_indexed);
                    progress(&ProgressEvent::Saved);
                }
                if let Err(e) = result {
                    warn!("Store failure, stopping workers: {}", e);
                    self.cancel();
                    store_error = Some(e);
                }
            }
        });

        if let Some(e) = store_error {
            return Err(e.into());
        }
        store.flush()?;

        summary.cancelled = self.cancel.load(Ordering::SeqCst);
        summary.elapsed = started.elapsed();
        summary.failures.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            "Indexed {} files ({} unchanged, {} failed) in {:.2?}: {} records, {:.1} files/s",
            summary.files_indexed,
            summary.files_unchanged,
            summary.files_failed(),
            summary.elapsed,
            summary.records_committed,
            summary.files_per_second()
        );
        Ok(summary)
    }

    fn aggregate(
        &self,
        outcome: FileOutcome,
        store: &mut dyn IndexStore,
        summary: &mut BuildSummary,
        progress: &mut dyn FnMut(&ProgressEvent),
    ) -> std::result::Result<(), StoreError> {
        match outcome {
            FileOutcome::Indexed {
                contribution,
                literals,
                filtered,
            } => {
                store.commit_file(&contribution)?;
                let records = contribution.records.len();
                debug!("Committed {} ({} records)", contribution.path, records);

                summary.files_indexed += 1;
                summary.literals_collected += literals;
                summary.literals_filtered += filtered;
                summary.records_committed += records;
                summary.bytes_read += contribution.size;
                progress(&ProgressEvent::Indexed {
                    path: contribution.path,
                    records,
                });
            }
            FileOutcome::Unchanged { path, size } => {
                summary.files_unchanged += 1;
                summary.bytes_read += size;
                progress(&ProgressEvent::Unchanged { path });
            }
            FileOutcome::Failed(failure) => {
                warn!("{}", failure);
                progress(&ProgressEvent::Failed(failure.clone()));
                summary.failures.push(failure);
            }
            FileOutcome::Cancelled => {}
        }
        Ok(())
    }
}

/// Seed for recorded file hashes. A file indexed under other extraction
/// settings never compares equal, so changing them re-indexes every file.
fn settings_seed(config: &IndexerConfig) -> u64 {
    let settings = format!(
        "concat={};lambdas={};min_length={}",
        config.concatenation.as_str(),
        config.include_lambdas,
        config.min_length
    );
    content_hash(settings.as_bytes(), 0)
}
