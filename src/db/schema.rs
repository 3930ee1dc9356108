/// Schema for the versioned response caches.
pub const CACHE_SCHEMA: &str = r#"
-- One row per named cache (e.g. nickberg-api-v2)
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_cached_at
    ON cache_entries(cache_name, cached_at);
"#;

/// Schema for writes made while offline.
pub const PENDING_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    body TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
"#;
