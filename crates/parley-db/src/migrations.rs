use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            login       TEXT NOT NULL UNIQUE,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS courses (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            messaging_enabled   INTEGER NOT NULL DEFAULT 1,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS course_members (
            course_id   TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            role        TEXT NOT NULL,
            PRIMARY KEY (course_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            course_id           TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            kind                TEXT NOT NULL,
            creator_id          TEXT REFERENCES users(id),
            created_at          TEXT NOT NULL,
            last_message_at     TEXT,
            group_name          TEXT,
            name                TEXT,
            description         TEXT,
            topic               TEXT,
            is_public           INTEGER NOT NULL DEFAULT 0,
            is_course_wide      INTEGER NOT NULL DEFAULT 0,
            is_announcement     INTEGER NOT NULL DEFAULT 0,
            is_archived         INTEGER NOT NULL DEFAULT 0,
            link_target         TEXT,
            link_id             TEXT,
            link_visible_from   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_course_name
            ON conversations(course_id, name);

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL REFERENCES users(id),
            is_moderator    INTEGER NOT NULL DEFAULT 0,
            is_favorite     INTEGER NOT NULL DEFAULT 0,
            is_hidden       INTEGER NOT NULL DEFAULT 0,
            is_muted        INTEGER NOT NULL DEFAULT 0,
            last_read       TEXT,
            unread_count    INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id                  TEXT PRIMARY KEY,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            author_id           TEXT NOT NULL REFERENCES users(id),
            title               TEXT,
            content             TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            updated_at          TEXT,
            display_priority    TEXT NOT NULL DEFAULT 'NONE'
        );

        CREATE INDEX IF NOT EXISTS idx_posts_conversation
            ON posts(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS answer_posts (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_answer_posts_post
            ON answer_posts(post_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            post_id         TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            conversation_id TEXT NOT NULL,
            course_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL,
            title           TEXT NOT NULL,
            text            TEXT NOT NULL,
            author_name     TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(post_id, recipient_id, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, created_at);

        CREATE TABLE IF NOT EXISTS group_notifications (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            course_id   TEXT NOT NULL,
            grp         TEXT NOT NULL,
            title       TEXT NOT NULL,
            text        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(post_id, course_id, grp)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
