use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{ConcatPolicy, IndexerConfig, StoreBackend};
use crate::fingerprint::HashAlgorithm;

#[derive(Parser, Debug)]
#[command(name = "strdb")]
#[command(about = "Index C/C++ string literals by the functions that contain them")]
#[command(version)]
pub struct Cli {
    /// Index location (default: str2func.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Extra configuration file, applied after strdb.toml
    #[arg(long, global = true, env = "STRDB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    /// More output; repeat for debug logs
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index every C/C++ file under a directory
    Build(BuildArgs),
    /// Find the functions a string occurs in
    Query(QueryArgs),
    /// Print every indexed string
    Dump(DumpArgs),
    /// Show index statistics
    Info(InfoArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Source tree (or single file) to index
    pub root: PathBuf,

    /// Clear the index before building
    #[arg(long)]
    pub restart: bool,

    /// Re-index files whose content has not changed
    #[arg(long)]
    pub force: bool,

    /// Recognized file extensions (replaces the configured set)
    #[arg(long = "ext", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Glob of paths to skip; repeatable
    #[arg(long)]
    pub exclude: Vec<String>,

    /// How adjacent literals ("ab" "cd") are recorded [default: join]
    #[arg(long, value_enum)]
    pub concat: Option<ConcatArg>,

    /// Per-file parse timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Treat lambdas as functions of their own
    #[arg(long)]
    pub lambdas: bool,

    /// Fail files that contain syntax errors instead of recovering
    #[arg(long)]
    pub strict: bool,

    /// Skip literals shorter than this many bytes
    #[arg(long)]
    pub min_length: Option<usize>,

    /// Fingerprint algorithm for a new index
    #[arg(long, value_enum)]
    pub hash: Option<HashArg>,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// String to look up (or a hex fingerprint with --hash)
    pub text: String,

    /// Interpret C escape sequences in TEXT (\n, \x41, \101, ...)
    #[arg(short, long)]
    pub escaped: bool,

    /// TEXT is a fingerprint, not a string
    #[arg(long)]
    pub hash: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    /// Print entries as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Stop after this many entries
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatArg {
    Join,
    Separate,
}

impl From<ConcatArg> for ConcatPolicy {
    fn from(arg: ConcatArg) -> Self {
        match arg {
            ConcatArg::Join => ConcatPolicy::Join,
            ConcatArg::Separate => ConcatPolicy::Separate,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Sqlite,
    Json,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sqlite => StoreBackend::Sqlite,
            BackendArg::Json => StoreBackend::Json,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashArg {
    Xxh64,
    Xxh3,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Xxh64 => HashAlgorithm::Xxh64,
            HashArg::Xxh3 => HashAlgorithm::Xxh3,
        }
    }
}

impl Cli {
    /// Command-line flags win over every configuration layer.
    pub fn apply_to(&self, config: &mut IndexerConfig) {
        if let Some(db) = &self.db {
            config.database = db.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
    }
}

impl BuildArgs {
    pub fn apply_to(&self, config: &mut IndexerConfig) {
        if !self.extensions.is_empty() {
            config.extensions = self.extensions.clone();
        }
        config.exclude.extend(self.exclude.iter().cloned());
        if let Some(concat) = self.concat {
            config.concatenation = concat.into();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.parse_timeout_ms = timeout_ms;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(min_length) = self.min_length {
            config.min_length = min_length;
        }
        if let Some(hash) = self.hash {
            config.hash = hash.into();
        }
        config.include_lambdas |= self.lambdas;
        config.strict_syntax |= self.strict;
        config.force |= self.force;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_flags_override_config() {
        let cli = Cli::parse_from([
            "strdb", "--db", "out/idx.db", "build", "src", "--ext", "c,h", "--exclude", "vendor/**",
            "--concat", "separate", "-j", "3", "--strict", "--min-length", "4",
        ]);
        let mut config = IndexerConfig::default();
        cli.apply_to(&mut config);
        let Commands::Build(args) = &cli.command else {
            panic!("expected build");
        };
        args.apply_to(&mut config);

        assert_eq!(config.database, PathBuf::from("out/idx.db"));
        assert_eq!(config.extensions, vec!["c".to_string(), "h".to_string()]);
        assert_eq!(config.exclude, vec!["vendor/**".to_string()]);
        assert_eq!(config.concatenation, ConcatPolicy::Separate);
        assert_eq!(config.workers, 3);
        assert!(config.strict_syntax);
        assert!(!config.force);
        assert_eq!(config.min_length, 4);
    }

    #[test]
    fn test_query_flags() {
        let cli = Cli::parse_from(["strdb", "query", "--escaped", "--json", "a\\nb", "--log-json"]);
        assert!(cli.log_json && !cli.no_color);
        match cli.command {
            Commands::Query(args) => {
                assert!(args.escaped && args.json && !args.hash);
                assert_eq!(args.text, "a\\nb");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
