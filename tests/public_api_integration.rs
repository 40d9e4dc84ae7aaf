// Integration test for the public API
use std::sync::Arc;
use strdb::{
    open_store, ConcatPolicy, ExtractOptions, Fingerprint, Fingerprinter, HashAlgorithm, IndexError, IndexStore, Indexer,
    IndexerConfig, MemoryStore, OpenMode, QueryEngine, Result, SourceParser, SqliteStore, StoreBackend,
    TreeSitterParser, FILE_SCOPE, VERSION,
};

#[test]
fn test_public_api_exports() {
    let _version: &str = VERSION;

    let config = IndexerConfig::default();
    let _indexer: Indexer = Indexer::new(config.clone());
    let _parser: Arc<dyn SourceParser> = Arc::new(TreeSitterParser::from_config(&config));
    let _options: ExtractOptions = ExtractOptions::from_config(&config);
    let _store: Box<dyn IndexStore> = Box::new(MemoryStore::new(HashAlgorithm::Xxh64));
    let _error: IndexError = IndexError::Config("example".to_string());
    let _result: Result<()> = Ok(());
    assert_eq!(FILE_SCOPE, "<file scope>");
}

#[test]
fn test_config_builder_style() {
    let config = IndexerConfig {
        extensions: vec!["C".to_string(), ".hpp".to_string()],
        concatenation: ConcatPolicy::Separate,
        workers: 2,
        ..IndexerConfig::default()
    }
    .normalized()
    .unwrap();

    assert_eq!(config.extensions, vec!["c".to_string(), "hpp".to_string()]);
    assert_eq!(config.worker_count(), 2);
}

#[test]
fn test_fingerprints_are_stable() {
    let xxh64 = HashAlgorithm::Xxh64.fingerprinter();
    let fp = xxh64.fingerprint(b"");
    assert_eq!(fp, Fingerprint(0xef46db3751d8e999));
    assert_eq!(fp.to_string(), "ef46db3751d8e999");
    assert_eq!("ef46db3751d8e999".parse::<Fingerprint>().unwrap(), fp);
}

#[test]
fn test_store_lifecycle_through_trait_objects() {
    let dir = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::Sqlite, StoreBackend::Json] {
        let config = IndexerConfig {
            database: dir.path().join(format!("{:?}.idx", backend)),
            backend,
            ..IndexerConfig::default()
        };

        let mut store = open_store(&config, OpenMode::ReadWrite).unwrap();
        let occurrence = strdb::Occurrence::new("/src/a.c", "main", 2);
        let fp = HashAlgorithm::Xxh64.fingerprinter().fingerprint(b"usage: %s\n");
        store.merge(fp, b"usage: %s\n", &occurrence).unwrap();
        store.flush().unwrap();
        store.close().unwrap();

        let reader = open_store(&config, OpenMode::ReadOnly).unwrap();
        let engine = QueryEngine::for_store(reader.as_ref()).unwrap();
        let found = engine.lookup(b"usage: %s\n").unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![occurrence]);
    }
}

#[test]
fn test_sqlite_in_memory_store() {
    let store = SqliteStore::open_in_memory(HashAlgorithm::Xxh3).unwrap();
    assert_eq!(store.algorithm(), "xxh3");
    assert_eq!(store.stats().unwrap().entries, 0);
}
