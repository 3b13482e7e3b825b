//! SQL migration definitions for the judgeloop database.
//!
//! Migrations are applied in order on database open. Each migration is a
//! batch of statements that records its own version when it completes.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: users, chat_history, courses",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered learners. `embedding` is the preference vector as a JSON array.
CREATE TABLE IF NOT EXISTS users (
    email         TEXT PRIMARY KEY,
    password_salt TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    embedding     TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

-- One stored conversation per user; `messages` is a JSON array.
CREATE TABLE IF NOT EXISTS chat_history (
    email      TEXT PRIMARY KEY REFERENCES users(email) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    messages   TEXT NOT NULL
);

-- Course catalogue with its embedding vector (JSON array).
CREATE TABLE IF NOT EXISTS courses (
    id         INTEGER PRIMARY KEY,
    payload    TEXT NOT NULL,
    vector     TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Enrollments",
            sql: r#"
CREATE TABLE IF NOT EXISTS enrollments (
    email       TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
    course_id   INTEGER NOT NULL,
    enrolled_at TEXT NOT NULL,
    PRIMARY KEY (email, course_id)
);

CREATE INDEX IF NOT EXISTS idx_enrollments_email ON enrollments(email);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
