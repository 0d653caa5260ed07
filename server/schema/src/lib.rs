#![deny(warnings)]

pub static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
       id                INTEGER PRIMARY KEY AUTOINCREMENT,
       path              TEXT UNIQUE NOT NULL,
       filename          TEXT NOT NULL,
       extension         TEXT,
       size_bytes        INTEGER,
       last_modified     REAL,
       category_year     INTEGER,
       category_type     TEXT,
       category_event    TEXT DEFAULT 'Unknown',
       category_meeting  TEXT DEFAULT 'Unknown',
       summary           TEXT,
       keywords          TEXT,
       processing_status TEXT DEFAULT 'Pending',
       processing_error  TEXT
     )",
    "CREATE INDEX IF NOT EXISTS idx_path ON files (path)",
    "CREATE INDEX IF NOT EXISTS idx_filename ON files (filename)",
    "CREATE INDEX IF NOT EXISTS idx_type ON files (category_type)",
    "CREATE INDEX IF NOT EXISTS idx_year ON files (category_year)",
    "CREATE INDEX IF NOT EXISTS idx_status ON files (processing_status)",
];
