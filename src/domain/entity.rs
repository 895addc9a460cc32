use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote something. Anonymous authors carry id 0 and their IP as name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

impl Author {
    pub fn is_anonymous(&self) -> bool {
        self.id == 0
    }
}

/// Actor plus timestamp, used for posted/edited/closed and last-post fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStamp {
    pub actor_id: i64,
    pub actor_name: String,
    pub at: DateTime<Utc>,
}

impl PostStamp {
    pub fn new(author: &Author, at: DateTime<Utc>) -> Self {
        Self {
            actor_id: author.id,
            actor_name: author.name.clone(),
            at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub sort_key: i64,
}

/// Most recent post anywhere beneath a forum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPost {
    pub stamp: PostStamp,
    pub thread_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forum {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    /// Only moderators may start threads here.
    pub announcement: bool,
    pub thread_count: i64,
    pub reply_count: i64,
    pub last_post: Option<LastPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub forum_id: i64,
    pub title: String,
    pub body: String,
    pub posted: PostStamp,
    pub edited: Option<PostStamp>,
    pub closed: Option<PostStamp>,
    pub sticky: bool,
    pub reply_count: i64,
    pub view_count: i64,
    /// Latest reply, or the thread's own posted stamp when it has none.
    pub last_post: PostStamp,
}

impl Thread {
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn is_posted_by(&self, author: &Author) -> bool {
        !author.is_anonymous() && self.posted.actor_id == author.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    pub thread_id: i64,
    pub body: String,
    pub posted: PostStamp,
    pub edited: Option<PostStamp>,
}

impl Reply {
    pub fn is_posted_by(&self, author: &Author) -> bool {
        !author.is_anonymous() && self.posted.actor_id == author.id
    }
}

/// A thread or a reply, as returned by the recent-posts feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Post {
    Thread(Thread),
    Reply(Reply),
}

impl Post {
    pub fn posted_at(&self) -> DateTime<Utc> {
        match self {
            Post::Thread(t) => t.posted.at,
            Post::Reply(r) => r.posted.at,
        }
    }

    /// Threads and replies have separate id spaces, so the key includes the kind.
    #[cfg(test)]
    pub fn key(&self) -> (&'static str, i64) {
        match self {
            Post::Thread(t) => ("thread", t.id),
            Post::Reply(r) => ("reply", r.id),
        }
    }
}

/// Insert payload for a thread; counters start at zero.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub forum_id: i64,
    pub title: String,
    pub body: String,
    pub posted: PostStamp,
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub thread_id: i64,
    pub body: String,
    pub posted: PostStamp,
}

#[derive(Debug, Clone)]
pub struct NewForum {
    pub category_id: i64,
    pub name: String,
    pub description: String,
    pub sort_key: i64,
    pub announcement: bool,
}

/// Filters for the recent-posts feed. Empty lists mean "no restriction".
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub category_ids: Vec<i64>,
    pub forum_ids: Vec<i64>,
    pub actor_id: Option<i64>,
}

/// Storage form of a title. Underscores read as spaces, then surrounding
/// whitespace is dropped and inner runs collapse to one space.
pub fn normalize_title(title: &str) -> String {
    title
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Characters a thread title may not contain.
pub fn is_illegal_title_char(c: char) -> bool {
    matches!(c, '#' | '<' | '>' | '[' | ']' | '|' | '{' | '}') || c.is_control()
}
