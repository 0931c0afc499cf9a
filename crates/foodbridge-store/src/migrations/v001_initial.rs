//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `surplus`, `chats` and `messages`.
//! Enumerated columns hold the exact lowercase spellings used on the wire.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (directory mirror of the identity provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    role         TEXT NOT NULL CHECK (role IN ('canteen', 'ngo', 'driver')),
    created_at   TEXT NOT NULL                -- RFC-3339, UTC, micros
);

-- ----------------------------------------------------------------
-- Surplus listings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS surplus (
    id                             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    canteen_id                     TEXT NOT NULL,
    canteen_name                   TEXT NOT NULL,
    food_name                      TEXT NOT NULL,
    category                       TEXT NOT NULL,
    quantity                       REAL NOT NULL CHECK (quantity > 0),
    unit                           TEXT NOT NULL,
    created_at                     TEXT NOT NULL,
    updated_at                     TEXT NOT NULL,
    expiry_time                    TEXT NOT NULL,
    pickup_location                TEXT NOT NULL,
    image_url                      TEXT,
    additional_info                TEXT,
    status                         TEXT NOT NULL
        CHECK (status IN ('available', 'claimed', 'collected', 'expired')),
    claimed_by                     TEXT,
    claimer_name                   TEXT,
    claimed_at                     TEXT,
    assigned_driver_id             TEXT,
    delivery_code                  TEXT,
    driver_pickup_verified_at      TEXT,
    recipient_delivery_verified_at TEXT,
    revision                       INTEGER NOT NULL DEFAULT 0,

    CHECK ((claimed_by IS NULL) = (claimer_name IS NULL)),
    CHECK ((claimed_by IS NULL) = (claimed_at IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_surplus_canteen ON surplus(canteen_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_surplus_claimed_by ON surplus(claimed_by, claimed_at DESC);
CREATE INDEX IF NOT EXISTS idx_surplus_driver ON surplus(assigned_driver_id);
CREATE INDEX IF NOT EXISTS idx_surplus_status_expiry ON surplus(status, expiry_time);

-- ----------------------------------------------------------------
-- Chats (exactly two participants, one row per unordered pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                  TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    pair_key            TEXT NOT NULL UNIQUE,
    a_id                TEXT NOT NULL,
    a_name              TEXT NOT NULL,
    a_role              TEXT NOT NULL,
    b_id                TEXT NOT NULL,
    b_name              TEXT NOT NULL,
    b_role              TEXT NOT NULL,
    delivery_surplus_id TEXT,                       -- not a FK: listings may be deleted
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_a ON chats(a_id);
CREATE INDEX IF NOT EXISTS idx_chats_b ON chats(b_id);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    id          TEXT NOT NULL UNIQUE,               -- UUID v4
    chat_id     TEXT NOT NULL,
    sender_id   TEXT NOT NULL,
    sender_role TEXT NOT NULL,
    text        TEXT NOT NULL,
    sent_at     TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, sent_at, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
