//! SQLite schema definition

/// SQL schema for the documentation database.
///
/// `chunks_fts` is an external-content FTS5 table over `chunks(id, content)`;
/// the three triggers keep it in lockstep with every chunk insert, update,
/// and delete so `chunks_fts` rowids always equal `chunks.id`.
pub const SCHEMA_SQL: &str = r#"
-- Sources: registered documentation sources
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    base_url TEXT NOT NULL,
    group_name TEXT,
    description TEXT,
    options TEXT,
    last_ingested_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Documents: individual pages belonging to a source
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    path TEXT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source_id, url)
);

-- Chunks: embedded slices of a document's content
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    document_id INTEGER NOT NULL REFERENCES documents(id),
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(document_id, chunk_index)
);

-- Ingestion progress: one row per run, resumable while in_progress
CREATE TABLE IF NOT EXISTS ingestion_progress (
    id INTEGER PRIMARY KEY,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    started_at TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'in_progress',
    last_processed_url TEXT,
    error_message TEXT,
    UNIQUE(source_id, started_at)
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_sources_group ON sources(group_name);
CREATE INDEX IF NOT EXISTS idx_progress_source ON ingestion_progress(source_id, status);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='chunks',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;

/// Additive migrations applied after the base schema. Each statement may fail
/// with "duplicate column name" on databases that already have the column;
/// the caller swallows exactly that error.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE sources ADD COLUMN group_name TEXT",
    "ALTER TABLE sources ADD COLUMN description TEXT",
    "ALTER TABLE sources ADD COLUMN last_ingested_at TEXT",
    "ALTER TABLE documents ADD COLUMN path TEXT",
    "ALTER TABLE documents ADD COLUMN metadata TEXT",
    "ALTER TABLE chunks ADD COLUMN token_count INTEGER NOT NULL DEFAULT 0",
];
