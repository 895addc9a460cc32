//! Shared fixtures for the use case tests.

use std::cell::{Cell, RefCell};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::domain::audit::{AuditEvent, AuditSink};
use crate::domain::clock::Clock;
use crate::domain::config::ForumConfig;
use crate::domain::entity::{NewForum, PostStamp};
use crate::domain::identity::{AntiAbuseGate, Caller, GatedAction, Identity, OpenGate, Role};
use crate::domain::pagination::Window;
use crate::domain::repository::{
    CategoryRepository, ForumRepository, ReplyRepository, Store, ThreadRepository,
};
use crate::infra::sqlite::{Database, SqliteStore};
use crate::usecase::ForumContext;

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

pub(crate) fn stamp(actor_id: i64, secs: i64) -> PostStamp {
    PostStamp {
        actor_id,
        actor_name: format!("user-{}", actor_id),
        at: at(secs),
    }
}

/// Advances one second per reading, so every post gets a distinct timestamp.
pub(crate) struct StepClock {
    next: Cell<i64>,
}

impl StepClock {
    pub(crate) fn new() -> Self {
        Self { next: Cell::new(1) }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.next.get();
        self.next.set(secs + 1);
        at(secs)
    }
}

#[derive(Default)]
pub(crate) struct RecordingAudit {
    pub(crate) events: RefCell<Vec<AuditEvent>>,
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: &AuditEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

pub(crate) struct ClosedGate;

impl AntiAbuseGate for ClosedGate {
    fn permits(&self, _who: &dyn Identity, _action: GatedAction) -> bool {
        false
    }
}

pub(crate) struct Harness {
    pub(crate) db: Database,
    pub(crate) config: ForumConfig,
    pub(crate) clock: StepClock,
    pub(crate) audit: RecordingAudit,
    pub(crate) gate: OpenGate,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(ForumConfig::default())
    }

    pub(crate) fn with_config(config: ForumConfig) -> Self {
        Self {
            db: Database::open_in_memory().unwrap(),
            config,
            clock: StepClock::new(),
            audit: RecordingAudit::default(),
            gate: OpenGate,
        }
    }

    pub(crate) fn store(&self) -> SqliteStore<'_> {
        SqliteStore::new(self.db.connection())
    }

    pub(crate) fn ctx(&self) -> ForumContext<'_> {
        ForumContext {
            config: &self.config,
            clock: &self.clock,
            audit: &self.audit,
            gate: &self.gate,
        }
    }

    pub(crate) fn actions(&self) -> Vec<String> {
        self.audit
            .events
            .borrow()
            .iter()
            .map(|e| e.action.to_string())
            .collect()
    }
}

pub(crate) fn member(id: i64) -> Caller {
    Caller::user(id, &format!("user-{}", id))
}

pub(crate) fn moderator() -> Caller {
    Caller::user(900, "mod").with_role(Role::Moderator)
}

pub(crate) fn admin() -> Caller {
    Caller::user(999, "admin").with_role(Role::Admin)
}

/// Creates a category and one forum in it, bypassing permission checks.
pub(crate) fn seed_forum<S: Store>(store: &S, name: &str) -> i64 {
    let category = store.categories().create(&format!("{} category", name), 0).unwrap();
    store
        .forums()
        .create(&NewForum {
            category_id: category,
            name: name.to_string(),
            description: String::new(),
            sort_key: 0,
            announcement: false,
        })
        .unwrap()
}

/// Checks every cached counter and last-post pointer beneath a forum against the rows.
pub(crate) fn assert_consistent<S: Store>(store: &S, forum_id: i64) {
    let forum = store.forums().find_by_id(forum_id).unwrap().unwrap();
    assert_eq!(
        forum.thread_count,
        store.threads().count_by_forum(forum_id).unwrap(),
        "thread_count of forum {}",
        forum_id
    );
    assert_eq!(
        forum.reply_count,
        store.replies().count_by_forum(forum_id).unwrap(),
        "reply_count of forum {}",
        forum_id
    );
    assert_eq!(
        forum.last_post,
        store.forums().latest_post(forum_id).unwrap(),
        "last_post of forum {}",
        forum_id
    );

    for thread in store.threads().list_by_forum(forum_id, Window::ALL).unwrap() {
        assert_eq!(
            thread.reply_count,
            store.replies().count_by_thread(thread.id).unwrap(),
            "reply_count of thread {}",
            thread.id
        );
        let expected = store
            .replies()
            .latest_by_thread(thread.id)
            .unwrap()
            .map(|r| r.posted)
            .unwrap_or_else(|| thread.posted.clone());
        assert_eq!(thread.last_post, expected, "last_post of thread {}", thread.id);
    }
}
