use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

use crate::domain::entity::{
    normalize_title, Category, Forum, LastPost, NewForum, NewReply, NewThread, PostFilter,
    PostStamp, Reply, Thread,
};
use crate::domain::error::DomainError;
use crate::domain::pagination::Window;
use crate::domain::repository::{
    CategoryRepository, ForumRepository, ReplyRepository, Store, ThreadRepository,
};

const MIGRATION_V1: &str = include_str!("migrations/v001.sql");

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        let conn = Connection::open(path)
            .map_err(|e| DomainError::Database(format!("failed to open database: {}", e)))?;

        Self::configure(&conn)?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DomainError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DomainError::Database(format!("failed to open in-memory database: {}", e)))?;

        Self::configure(&conn)?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn configure(conn: &Connection) -> Result<(), DomainError> {
        // foreign_keys = OFF: parent rows are checked by the use cases inside the
        // same write transaction that inserts the child.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = OFF;"
        ).map_err(|e| DomainError::Database(format!("failed to configure database: {}", e)))
    }

    fn current_version(&self) -> Result<i64, DomainError> {
        let has_table: bool = self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| DomainError::Database(format!("failed to check schema_version table: {}", e)))?;

        if !has_table {
            return Ok(0);
        }

        let version: i64 = self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(|e| DomainError::Database(format!("failed to read schema version: {}", e)))?;

        Ok(version)
    }

    fn migrate(&mut self) -> Result<(), DomainError> {
        let version = self.current_version()?;

        if version < 1 {
            self.conn
                .execute_batch(MIGRATION_V1)
                .map_err(|e| DomainError::Database(format!("migration v1 failed: {}", e)))?;
        }

        if version < 2 {
            self.rekey_titles()
                .map_err(|e| DomainError::Database(format!("migration v2 failed: {}", e)))?;
        }

        Ok(())
    }

    /// Recomputes every stored `title_key` with the current normalization.
    fn rekey_titles(&mut self) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        let titles = {
            let mut stmt = tx.prepare("SELECT id, title FROM threads")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for (id, title) in &titles {
            tx.execute(
                "UPDATE threads SET title_key = ?1 WHERE id = ?2",
                params![normalize_title(title), id],
            )?;
        }
        tx.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (2)", [])?;
        tx.commit()?;
        debug!(threads = titles.len(), "title keys rebuilt");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|ndt| ndt.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

// Fixed width, so text order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn window_params(window: Window) -> (i64, i64) {
    let limit = window.limit.map(|l| l as i64).unwrap_or(-1);
    (limit, window.offset as i64)
}

fn limit_param(limit: usize) -> i64 {
    if limit == 0 { -1 } else { limit as i64 }
}

fn like_pattern(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Reads an (actor_id, actor_name, at) triple starting at `idx`.
fn stamp_at(row: &Row, idx: usize) -> rusqlite::Result<PostStamp> {
    Ok(PostStamp {
        actor_id: row.get(idx)?,
        actor_name: row.get(idx + 1)?,
        at: parse_datetime(&row.get::<_, String>(idx + 2)?)?,
    })
}

/// Like `stamp_at`, but the triple may be NULL.
fn optional_stamp_at(row: &Row, idx: usize) -> rusqlite::Result<Option<PostStamp>> {
    match row.get::<_, Option<String>>(idx + 2)? {
        Some(at) if !at.is_empty() => Ok(Some(PostStamp {
            actor_id: row.get::<_, Option<i64>>(idx)?.unwrap_or(0),
            actor_name: row.get::<_, Option<String>>(idx + 1)?.unwrap_or_default(),
            at: parse_datetime(&at)?,
        })),
        _ => Ok(None),
    }
}

/// Builds the shared WHERE fragment of the recent-posts queries.
/// Expects `threads t` and `forums f` in scope.
fn filter_clause(filter: &PostFilter, actor_column: &str) -> (String, Vec<Value>) {
    let mut sql = String::new();
    let mut values = Vec::new();

    if !filter.category_ids.is_empty() {
        let marks = vec!["?"; filter.category_ids.len()].join(", ");
        sql.push_str(&format!(" AND f.category_id IN ({})", marks));
        values.extend(filter.category_ids.iter().map(|id| Value::Integer(*id)));
    }
    if !filter.forum_ids.is_empty() {
        let marks = vec!["?"; filter.forum_ids.len()].join(", ");
        sql.push_str(&format!(" AND t.forum_id IN ({})", marks));
        values.extend(filter.forum_ids.iter().map(|id| Value::Integer(*id)));
    }
    if let Some(actor) = filter.actor_id {
        sql.push_str(&format!(" AND {} = ?", actor_column));
        values.push(Value::Integer(actor));
    }

    (sql, values)
}

// --- Category Repository ---

pub struct SqliteCategoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCategoryRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            sort_key: row.get(2)?,
        })
    }
}

impl<'a> CategoryRepository for SqliteCategoryRepository<'a> {
    fn create(&self, name: &str, sort_key: i64) -> Result<i64, DomainError> {
        self.conn
            .execute(
                "INSERT INTO categories (name, sort_key) VALUES (?1, ?2)",
                params![name, sort_key],
            )
            .map_err(|e| DomainError::Database(format!("failed to create category: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Category>, DomainError> {
        Ok(self.conn
            .query_row(
                "SELECT id, name, sort_key FROM categories WHERE id = ?1",
                params![id],
                Self::row_to_category,
            )
            .optional()?)
    }

    fn find_by_names(&self, names: &[String]) -> Result<Vec<Category>, DomainError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let marks = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT id, name, sort_key FROM categories WHERE name IN ({}) ORDER BY sort_key ASC, id ASC",
            marks
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let categories = stmt
            .query_map(params_from_iter(names.iter()), Self::row_to_category)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn list(&self) -> Result<Vec<Category>, DomainError> {
        let mut stmt = self.conn
            .prepare("SELECT id, name, sort_key FROM categories ORDER BY sort_key ASC, id ASC")?;
        let categories = stmt
            .query_map([], Self::row_to_category)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }
}

// --- Forum Repository ---

pub struct SqliteForumRepository<'a> {
    conn: &'a Connection,
}

const FORUM_COLUMNS: &str = "id, category_id, name, description, sort_key, announcement, thread_count, reply_count,
     last_post_actor_id, last_post_actor_name, last_post_at, last_thread_name";

impl<'a> SqliteForumRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_forum(row: &Row) -> rusqlite::Result<Forum> {
        let last_post = optional_stamp_at(row, 8)?.map(|stamp| LastPost {
            stamp,
            thread_title: row.get::<_, Option<String>>(11).ok().flatten().unwrap_or_default(),
        });

        Ok(Forum {
            id: row.get(0)?,
            category_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            sort_key: row.get(4)?,
            announcement: row.get(5)?,
            thread_count: row.get(6)?,
            reply_count: row.get(7)?,
            last_post,
        })
    }
}

impl<'a> ForumRepository for SqliteForumRepository<'a> {
    fn create(&self, forum: &NewForum) -> Result<i64, DomainError> {
        self.conn
            .execute(
                "INSERT INTO forums (category_id, name, description, sort_key, announcement) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    forum.category_id,
                    forum.name,
                    forum.description,
                    forum.sort_key,
                    forum.announcement,
                ],
            )
            .map_err(|e| DomainError::Database(format!("failed to create forum: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Forum>, DomainError> {
        let sql = format!("SELECT {} FROM forums WHERE id = ?1", FORUM_COLUMNS);
        Ok(self.conn
            .query_row(&sql, params![id], Self::row_to_forum)
            .optional()?)
    }

    fn list_by_category(&self, category_id: i64) -> Result<Vec<Forum>, DomainError> {
        let sql = format!(
            "SELECT {} FROM forums WHERE category_id = ?1 ORDER BY sort_key ASC, id ASC",
            FORUM_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let forums = stmt
            .query_map(params![category_id], Self::row_to_forum)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(forums)
    }

    fn adjust_counts(&self, id: i64, threads: i64, replies: i64) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE forums SET thread_count = thread_count + ?1, reply_count = reply_count + ?2 WHERE id = ?3",
            params![threads, replies, id],
        )?;
        if affected == 0 {
            return Err(DomainError::ForumNotFound(id));
        }
        Ok(())
    }

    fn set_counts(&self, id: i64, threads: i64, replies: i64) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE forums SET thread_count = ?1, reply_count = ?2 WHERE id = ?3",
            params![threads, replies, id],
        )?;
        if affected == 0 {
            return Err(DomainError::ForumNotFound(id));
        }
        Ok(())
    }

    fn set_last_post(&self, id: i64, last: Option<&LastPost>) -> Result<(), DomainError> {
        let affected = match last {
            Some(last) => self.conn.execute(
                "UPDATE forums SET last_post_actor_id = ?1, last_post_actor_name = ?2, last_post_at = ?3, last_thread_name = ?4
                 WHERE id = ?5",
                params![
                    last.stamp.actor_id,
                    last.stamp.actor_name,
                    format_datetime(&last.stamp.at),
                    last.thread_title,
                    id,
                ],
            )?,
            None => self.conn.execute(
                "UPDATE forums SET last_post_actor_id = NULL, last_post_actor_name = NULL, last_post_at = NULL, last_thread_name = NULL
                 WHERE id = ?1",
                params![id],
            )?,
        };
        if affected == 0 {
            return Err(DomainError::ForumNotFound(id));
        }
        Ok(())
    }

    fn latest_post(&self, id: i64) -> Result<Option<LastPost>, DomainError> {
        // kind: replies (1) sort after their thread (0) on equal timestamps.
        let latest = self.conn
            .query_row(
                "SELECT actor_id, actor_name, at, title FROM (
                    SELECT t.posted_actor_id AS actor_id, t.posted_actor_name AS actor_name,
                           t.posted_at AS at, t.title AS title, 0 AS kind, t.id AS post_id
                    FROM threads t WHERE t.forum_id = ?1
                    UNION ALL
                    SELECT r.posted_actor_id, r.posted_actor_name, r.posted_at, t.title, 1, r.id
                    FROM replies r JOIN threads t ON r.thread_id = t.id WHERE t.forum_id = ?1
                 ) ORDER BY at DESC, kind DESC, post_id DESC LIMIT 1",
                params![id],
                |row| {
                    Ok(LastPost {
                        stamp: stamp_at(row, 0)?,
                        thread_title: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(latest)
    }
}

// --- Thread Repository ---

pub struct SqliteThreadRepository<'a> {
    conn: &'a Connection,
}

const THREAD_COLUMNS: &str = "t.id, t.forum_id, t.title, t.body,
     t.posted_actor_id, t.posted_actor_name, t.posted_at,
     t.edited_actor_id, t.edited_actor_name, t.edited_at,
     t.closed_actor_id, t.closed_actor_name, t.closed_at,
     t.sticky, t.reply_count, t.view_count,
     t.last_post_actor_id, t.last_post_actor_name, t.last_post_at";

impl<'a> SqliteThreadRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_thread(row: &Row) -> rusqlite::Result<Thread> {
        Ok(Thread {
            id: row.get(0)?,
            forum_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            posted: stamp_at(row, 4)?,
            edited: optional_stamp_at(row, 7)?,
            closed: optional_stamp_at(row, 10)?,
            sticky: row.get(13)?,
            reply_count: row.get(14)?,
            view_count: row.get(15)?,
            last_post: stamp_at(row, 16)?,
        })
    }

    fn expect_one(&self, affected: usize, id: i64) -> Result<(), DomainError> {
        if affected == 0 {
            return Err(DomainError::ThreadNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl<'a> ThreadRepository for SqliteThreadRepository<'a> {
    fn create(&self, thread: &NewThread) -> Result<i64, DomainError> {
        let posted_at = format_datetime(&thread.posted.at);
        self.conn
            .execute(
                "INSERT INTO threads (forum_id, title, title_key, body,
                                      posted_actor_id, posted_actor_name, posted_at,
                                      last_post_actor_id, last_post_actor_name, last_post_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?5, ?6, ?7)",
                params![
                    thread.forum_id,
                    thread.title,
                    normalize_title(&thread.title),
                    thread.body,
                    thread.posted.actor_id,
                    thread.posted.actor_name,
                    posted_at,
                ],
            )
            .map_err(|e| DomainError::Database(format!("failed to create thread: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Thread>, DomainError> {
        let sql = format!("SELECT {} FROM threads t WHERE t.id = ?1", THREAD_COLUMNS);
        Ok(self.conn
            .query_row(&sql, params![id], Self::row_to_thread)
            .optional()?)
    }

    fn find_by_title(&self, title: &str) -> Result<Option<Thread>, DomainError> {
        let sql = format!(
            "SELECT {} FROM threads t WHERE t.title_key = ?1 ORDER BY t.id ASC LIMIT 1",
            THREAD_COLUMNS
        );
        Ok(self.conn
            .query_row(&sql, params![normalize_title(title)], Self::row_to_thread)
            .optional()?)
    }

    fn list_by_forum(&self, forum_id: i64, window: Window) -> Result<Vec<Thread>, DomainError> {
        let sql = format!(
            "SELECT {} FROM threads t WHERE t.forum_id = ?1
             ORDER BY t.sticky DESC, t.last_post_at DESC, t.id DESC LIMIT ?2 OFFSET ?3",
            THREAD_COLUMNS
        );
        let (limit, offset) = window_params(window);
        let mut stmt = self.conn.prepare(&sql)?;
        let threads = stmt
            .query_map(params![forum_id, limit, offset], Self::row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    fn count_by_forum(&self, forum_id: i64) -> Result<i64, DomainError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM threads WHERE forum_id = ?1",
            params![forum_id],
            |row| row.get(0),
        )?)
    }

    fn update_content(
        &self,
        id: i64,
        title: &str,
        body: &str,
        edited: &PostStamp,
    ) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE threads SET title = ?1, title_key = ?2, body = ?3,
                    edited_actor_id = ?4, edited_actor_name = ?5, edited_at = ?6
             WHERE id = ?7",
            params![
                title,
                normalize_title(title),
                body,
                edited.actor_id,
                edited.actor_name,
                format_datetime(&edited.at),
                id,
            ],
        )?;
        self.expect_one(affected, id)
    }

    fn set_closed(&self, id: i64, closed: Option<&PostStamp>) -> Result<(), DomainError> {
        let affected = match closed {
            Some(stamp) => self.conn.execute(
                "UPDATE threads SET closed_actor_id = ?1, closed_actor_name = ?2, closed_at = ?3 WHERE id = ?4",
                params![stamp.actor_id, stamp.actor_name, format_datetime(&stamp.at), id],
            )?,
            None => self.conn.execute(
                "UPDATE threads SET closed_actor_id = NULL, closed_actor_name = NULL, closed_at = NULL WHERE id = ?1",
                params![id],
            )?,
        };
        self.expect_one(affected, id)
    }

    fn set_sticky(&self, id: i64, sticky: bool) -> Result<(), DomainError> {
        let affected = self.conn
            .execute("UPDATE threads SET sticky = ?1 WHERE id = ?2", params![sticky, id])?;
        self.expect_one(affected, id)
    }

    fn set_forum(&self, id: i64, forum_id: i64) -> Result<(), DomainError> {
        let affected = self.conn
            .execute("UPDATE threads SET forum_id = ?1 WHERE id = ?2", params![forum_id, id])?;
        self.expect_one(affected, id)
    }

    fn adjust_reply_count(&self, id: i64, delta: i64) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE threads SET reply_count = reply_count + ?1 WHERE id = ?2",
            params![delta, id],
        )?;
        self.expect_one(affected, id)
    }

    fn set_reply_count(&self, id: i64, count: i64) -> Result<(), DomainError> {
        let affected = self.conn
            .execute("UPDATE threads SET reply_count = ?1 WHERE id = ?2", params![count, id])?;
        self.expect_one(affected, id)
    }

    fn set_last_post(&self, id: i64, last: &PostStamp) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE threads SET last_post_actor_id = ?1, last_post_actor_name = ?2, last_post_at = ?3 WHERE id = ?4",
            params![last.actor_id, last.actor_name, format_datetime(&last.at), id],
        )?;
        self.expect_one(affected, id)
    }

    fn increment_view_count(&self, id: i64) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE threads SET view_count = view_count + 1 WHERE id = ?1",
            params![id],
        )?;
        self.expect_one(affected, id)
    }

    fn delete(&self, id: i64) -> Result<(), DomainError> {
        let affected = self.conn
            .execute("DELETE FROM threads WHERE id = ?1", params![id])?;
        self.expect_one(affected, id)
    }

    fn recent(&self, filter: &PostFilter, limit: usize) -> Result<Vec<Thread>, DomainError> {
        let (clause, mut values) = filter_clause(filter, "t.posted_actor_id");
        let sql = format!(
            "SELECT {} FROM threads t JOIN forums f ON t.forum_id = f.id
             WHERE 1 = 1{} ORDER BY t.posted_at DESC, t.id DESC LIMIT ?",
            THREAD_COLUMNS, clause
        );
        values.push(Value::Integer(limit_param(limit)));
        let mut stmt = self.conn.prepare(&sql)?;
        let threads = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, DomainError> {
        let sql = format!(
            "SELECT {} FROM threads t
             WHERE t.title LIKE ?1 ESCAPE '\\' OR t.body LIKE ?1 ESCAPE '\\'
             ORDER BY t.posted_at DESC, t.id DESC LIMIT ?2",
            THREAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let threads = stmt
            .query_map(params![like_pattern(query), limit_param(limit)], Self::row_to_thread)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    fn ids_by_forum(&self, forum_id: i64) -> Result<Vec<i64>, DomainError> {
        let mut stmt = self.conn
            .prepare("SELECT id FROM threads WHERE forum_id = ?1 ORDER BY id ASC")?;
        let ids = stmt
            .query_map(params![forum_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

// --- Reply Repository ---

pub struct SqliteReplyRepository<'a> {
    conn: &'a Connection,
}

const REPLY_COLUMNS: &str = "r.id, r.thread_id, r.body,
     r.posted_actor_id, r.posted_actor_name, r.posted_at,
     r.edited_actor_id, r.edited_actor_name, r.edited_at";

impl<'a> SqliteReplyRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_reply(row: &Row) -> rusqlite::Result<Reply> {
        Ok(Reply {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            body: row.get(2)?,
            posted: stamp_at(row, 3)?,
            edited: optional_stamp_at(row, 6)?,
        })
    }
}

impl<'a> ReplyRepository for SqliteReplyRepository<'a> {
    fn create(&self, reply: &NewReply) -> Result<i64, DomainError> {
        self.conn
            .execute(
                "INSERT INTO replies (thread_id, body, posted_actor_id, posted_actor_name, posted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reply.thread_id,
                    reply.body,
                    reply.posted.actor_id,
                    reply.posted.actor_name,
                    format_datetime(&reply.posted.at),
                ],
            )
            .map_err(|e| DomainError::Database(format!("failed to create reply: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Reply>, DomainError> {
        let sql = format!("SELECT {} FROM replies r WHERE r.id = ?1", REPLY_COLUMNS);
        Ok(self.conn
            .query_row(&sql, params![id], Self::row_to_reply)
            .optional()?)
    }

    fn list_by_thread(&self, thread_id: i64, window: Window) -> Result<Vec<Reply>, DomainError> {
        let sql = format!(
            "SELECT {} FROM replies r WHERE r.thread_id = ?1
             ORDER BY r.posted_at ASC, r.id ASC LIMIT ?2 OFFSET ?3",
            REPLY_COLUMNS
        );
        let (limit, offset) = window_params(window);
        let mut stmt = self.conn.prepare(&sql)?;
        let replies = stmt
            .query_map(params![thread_id, limit, offset], Self::row_to_reply)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(replies)
    }

    fn count_by_thread(&self, thread_id: i64) -> Result<i64, DomainError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM replies WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?)
    }

    #[cfg(test)]
    fn count_by_forum(&self, forum_id: i64) -> Result<i64, DomainError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM replies r JOIN threads t ON r.thread_id = t.id WHERE t.forum_id = ?1",
            params![forum_id],
            |row| row.get(0),
        )?)
    }

    fn latest_by_thread(&self, thread_id: i64) -> Result<Option<Reply>, DomainError> {
        let sql = format!(
            "SELECT {} FROM replies r WHERE r.thread_id = ?1
             ORDER BY r.posted_at DESC, r.id DESC LIMIT 1",
            REPLY_COLUMNS
        );
        Ok(self.conn
            .query_row(&sql, params![thread_id], Self::row_to_reply)
            .optional()?)
    }

    fn update_body(&self, id: i64, body: &str, edited: &PostStamp) -> Result<(), DomainError> {
        let affected = self.conn.execute(
            "UPDATE replies SET body = ?1, edited_actor_id = ?2, edited_actor_name = ?3, edited_at = ?4
             WHERE id = ?5",
            params![body, edited.actor_id, edited.actor_name, format_datetime(&edited.at), id],
        )?;
        if affected == 0 {
            return Err(DomainError::ReplyNotFound(id));
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), DomainError> {
        let affected = self.conn
            .execute("DELETE FROM replies WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(DomainError::ReplyNotFound(id));
        }
        Ok(())
    }

    fn delete_by_thread(&self, thread_id: i64) -> Result<usize, DomainError> {
        Ok(self.conn
            .execute("DELETE FROM replies WHERE thread_id = ?1", params![thread_id])?)
    }

    fn recent(&self, filter: &PostFilter, limit: usize) -> Result<Vec<Reply>, DomainError> {
        let (clause, mut values) = filter_clause(filter, "r.posted_actor_id");
        let sql = format!(
            "SELECT {} FROM replies r
             JOIN threads t ON r.thread_id = t.id
             JOIN forums f ON t.forum_id = f.id
             WHERE 1 = 1{} ORDER BY r.posted_at DESC, r.id DESC LIMIT ?",
            REPLY_COLUMNS, clause
        );
        values.push(Value::Integer(limit_param(limit)));
        let mut stmt = self.conn.prepare(&sql)?;
        let replies = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_reply)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(replies)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Reply>, DomainError> {
        let sql = format!(
            "SELECT {} FROM replies r WHERE r.body LIKE ?1 ESCAPE '\\'
             ORDER BY r.posted_at DESC, r.id DESC LIMIT ?2",
            REPLY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let replies = stmt
            .query_map(params![like_pattern(query), limit_param(limit)], Self::row_to_reply)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(replies)
    }
}

// --- Store ---

/// The four repositories over one connection.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
    categories: SqliteCategoryRepository<'a>,
    forums: SqliteForumRepository<'a>,
    threads: SqliteThreadRepository<'a>,
    replies: SqliteReplyRepository<'a>,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            categories: SqliteCategoryRepository::new(conn),
            forums: SqliteForumRepository::new(conn),
            threads: SqliteThreadRepository::new(conn),
            replies: SqliteReplyRepository::new(conn),
        }
    }
}

impl<'a> Store for SqliteStore<'a> {
    type Categories = SqliteCategoryRepository<'a>;
    type Forums = SqliteForumRepository<'a>;
    type Threads = SqliteThreadRepository<'a>;
    type Replies = SqliteReplyRepository<'a>;

    fn categories(&self) -> &Self::Categories {
        &self.categories
    }

    fn forums(&self) -> &Self::Forums {
        &self.forums
    }

    fn threads(&self) -> &Self::Threads {
        &self.threads
    }

    fn replies(&self) -> &Self::Replies {
        &self.replies
    }

    fn atomically<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Result<T, DomainError>,
    {
        // Already inside a transaction: join it.
        if !self.conn.is_autocommit() {
            return f();
        }

        // IMMEDIATE takes the write lock up front so read-modify-write on the
        // counters cannot interleave with another writer.
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| DomainError::Database(format!("failed to begin transaction: {}", e)))?;

        match f() {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| DomainError::Database(format!("failed to commit transaction: {}", e)))?;
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "rolling back transaction");
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn stamp(actor_id: i64, secs: i64) -> PostStamp {
        PostStamp {
            actor_id,
            actor_name: format!("user-{}", actor_id),
            at: at(secs),
        }
    }

    fn seed_forum(store: &SqliteStore) -> i64 {
        let cat = store.categories().create("General", 0).unwrap();
        store
            .forums()
            .create(&NewForum {
                category_id: cat,
                name: "Lobby".into(),
                description: String::new(),
                sort_key: 0,
                announcement: false,
            })
            .unwrap()
    }

    fn new_thread(forum_id: i64, title: &str, secs: i64) -> NewThread {
        NewThread {
            forum_id,
            title: title.into(),
            body: "body".into(),
            posted: stamp(1, secs),
        }
    }

    #[test]
    fn datetime_round_trip_keeps_micros() {
        let dt = at(5) + Duration::microseconds(123_456);
        assert_eq!(parse_datetime(&format_datetime(&dt)).unwrap(), dt);
        assert!(format_datetime(&at(9)) < format_datetime(&at(10)));
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        assert_eq!(db.current_version().unwrap(), 2);
    }

    #[test]
    fn migrate_rebuilds_stale_title_keys() {
        let mut db = Database::open_in_memory().unwrap();
        let (foo, bar) = {
            let store = SqliteStore::new(db.connection());
            let forum = seed_forum(&store);
            (
                store.threads().create(&new_thread(forum, "Foo_", 1)).unwrap(),
                store.threads().create(&new_thread(forum, "_Bar", 2)).unwrap(),
            )
        };
        // Keys as an older build stored them: trimmed before underscores were replaced.
        db.connection()
            .execute_batch(&format!(
                "UPDATE threads SET title_key = 'Foo ' WHERE id = {foo};
                 UPDATE threads SET title_key = ' Bar' WHERE id = {bar};
                 DELETE FROM schema_version WHERE version = 2;"
            ))
            .unwrap();

        db.migrate().unwrap();

        assert_eq!(db.current_version().unwrap(), 2);
        let store = SqliteStore::new(db.connection());
        assert_eq!(store.threads().find_by_title("Foo").unwrap().unwrap().id, foo);
        assert_eq!(store.threads().find_by_title(" Bar").unwrap().unwrap().id, bar);
    }

    #[test]
    fn thread_create_sets_last_post_to_itself() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);

        let id = store.threads().create(&new_thread(forum, "Hello", 1)).unwrap();
        let thread = store.threads().find_by_id(id).unwrap().unwrap();

        assert_eq!(thread.last_post, thread.posted);
        assert_eq!(thread.reply_count, 0);
        assert!(!thread.is_closed());
        assert!(thread.edited.is_none());
    }

    #[test]
    fn find_by_title_normalizes_underscores() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);

        store.threads().create(&new_thread(forum, "Foo", 1)).unwrap();
        store.threads().create(&new_thread(forum, "Foo Bar", 2)).unwrap();

        let found = store.threads().find_by_title("Foo_Bar").unwrap().unwrap();
        assert_eq!(found.title, "Foo Bar");
        assert_eq!(store.threads().find_by_title("Foo").unwrap().unwrap().title, "Foo");
        assert!(store.threads().find_by_title("Bar").unwrap().is_none());
    }

    #[test]
    fn list_by_forum_puts_sticky_first() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);

        let old = store.threads().create(&new_thread(forum, "Old", 1)).unwrap();
        let new = store.threads().create(&new_thread(forum, "New", 2)).unwrap();
        store.threads().set_sticky(old, true).unwrap();

        let ids: Vec<i64> = store
            .threads()
            .list_by_forum(forum, Window::ALL)
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![old, new]);

        let page = store
            .threads()
            .list_by_forum(forum, Window { offset: 1, limit: Some(1) })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, new);
    }

    #[test]
    fn replies_are_listed_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);
        let thread = store.threads().create(&new_thread(forum, "T", 1)).unwrap();

        for secs in [5, 3, 4] {
            store
                .replies()
                .create(&NewReply { thread_id: thread, body: secs.to_string(), posted: stamp(2, secs) })
                .unwrap();
        }

        let bodies: Vec<String> = store
            .replies()
            .list_by_thread(thread, Window::ALL)
            .unwrap()
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec!["3", "4", "5"]);
        assert_eq!(store.replies().latest_by_thread(thread).unwrap().unwrap().body, "5");
        assert_eq!(store.replies().count_by_forum(forum).unwrap(), 3);
    }

    #[test]
    fn latest_post_spans_threads_and_replies() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);
        assert!(store.forums().latest_post(forum).unwrap().is_none());

        let a = store.threads().create(&new_thread(forum, "A", 1)).unwrap();
        store.threads().create(&new_thread(forum, "B", 5)).unwrap();
        store
            .replies()
            .create(&NewReply { thread_id: a, body: "r".into(), posted: stamp(3, 9) })
            .unwrap();

        let latest = store.forums().latest_post(forum).unwrap().unwrap();
        assert_eq!(latest.thread_title, "A");
        assert_eq!(latest.stamp, stamp(3, 9));
    }

    #[test]
    fn forum_last_post_can_be_cleared() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);
        let last = LastPost { stamp: stamp(1, 1), thread_title: "X".into() };

        store.forums().set_last_post(forum, Some(&last)).unwrap();
        assert_eq!(store.forums().find_by_id(forum).unwrap().unwrap().last_post, Some(last));

        store.forums().set_last_post(forum, None).unwrap();
        assert!(store.forums().find_by_id(forum).unwrap().unwrap().last_post.is_none());
    }

    #[test]
    fn recent_filters_by_category() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);
        let other_cat = store.categories().create("Other", 1).unwrap();
        let other_forum = store
            .forums()
            .create(&NewForum {
                category_id: other_cat,
                name: "Elsewhere".into(),
                description: String::new(),
                sort_key: 0,
                announcement: false,
            })
            .unwrap();

        store.threads().create(&new_thread(forum, "In", 1)).unwrap();
        store.threads().create(&new_thread(other_forum, "Out", 2)).unwrap();

        let filter = PostFilter { category_ids: vec![other_cat], ..Default::default() };
        let threads = store.threads().recent(&filter, 10).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "Out");

        let all = store.threads().recent(&PostFilter::default(), 10).unwrap();
        assert_eq!(all[0].title, "Out");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);
        store.threads().create(&new_thread(forum, "100% sure", 1)).unwrap();
        store.threads().create(&new_thread(forum, "100 things", 2)).unwrap();

        let hits = store.threads().search("100%", 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "100% sure");
    }

    #[test]
    fn atomically_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());
        let forum = seed_forum(&store);

        let result: Result<(), DomainError> = store.atomically(|| {
            store.threads().create(&new_thread(forum, "Doomed", 1))?;
            store.forums().adjust_counts(forum, 1, 0)?;
            Err(DomainError::Database("boom".into()))
        });

        assert!(result.is_err());
        assert!(store.threads().find_by_title("Doomed").unwrap().is_none());
        assert_eq!(store.forums().find_by_id(forum).unwrap().unwrap().thread_count, 0);
        assert!(db.connection().is_autocommit());
    }

    #[test]
    fn update_on_missing_rows_reports_not_found() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteStore::new(db.connection());

        assert!(matches!(store.threads().delete(42), Err(DomainError::ThreadNotFound(_))));
        assert!(matches!(store.replies().delete(42), Err(DomainError::ReplyNotFound(42))));
        assert!(matches!(store.forums().adjust_counts(42, 1, 0), Err(DomainError::ForumNotFound(42))));
    }
}
