//! Denormalized counter maintenance.
//!
//! Every structural change to the hierarchy goes through one of the `on_*`
//! methods below, called by the use cases inside the same transaction as the
//! row change. Counters move by deltas; last-post pointers that might have lost
//! their target are recomputed from the rows rather than un-applied.

use tracing::debug;

use crate::domain::entity::{LastPost, PostStamp, Reply, Thread};
use crate::domain::error::DomainError;
use crate::domain::repository::{ForumRepository, ReplyRepository, Store, ThreadRepository};

pub struct AggregateUpdater<'s, S: Store> {
    store: &'s S,
}

impl<'s, S: Store> AggregateUpdater<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn on_thread_added(&self, thread: &Thread) -> Result<(), DomainError> {
        debug!(thread = thread.id, forum = thread.forum_id, "thread added");
        self.store.forums().adjust_counts(thread.forum_id, 1, 0)?;
        self.advance_forum_last_post(thread.forum_id, &thread.posted, &thread.title)
    }

    pub fn on_reply_added(&self, thread: &Thread, reply: &Reply) -> Result<(), DomainError> {
        debug!(thread = thread.id, reply = reply.id, "reply added");
        let threads = self.store.threads();
        threads.adjust_reply_count(thread.id, 1)?;
        if reply.posted.at >= thread.last_post.at {
            threads.set_last_post(thread.id, &reply.posted)?;
        }

        self.store.forums().adjust_counts(thread.forum_id, 0, 1)?;
        self.advance_forum_last_post(thread.forum_id, &reply.posted, &thread.title)
    }

    /// `thread` is the parent as it was before the reply row was removed.
    pub fn on_reply_deleted(&self, thread: &Thread) -> Result<(), DomainError> {
        debug!(thread = thread.id, "reply deleted");
        self.store.threads().adjust_reply_count(thread.id, -1)?;
        self.refresh_thread_last_post(thread)?;

        self.store.forums().adjust_counts(thread.forum_id, 0, -1)?;
        self.refresh_forum_last_post(thread.forum_id)?;
        Ok(())
    }

    /// One thread and `replies_removed` replies left `forum_id`.
    pub fn on_thread_deleted(&self, forum_id: i64, replies_removed: i64) -> Result<(), DomainError> {
        debug!(forum = forum_id, replies_removed, "thread deleted");
        self.store.forums().adjust_counts(forum_id, -1, -replies_removed)?;
        self.refresh_forum_last_post(forum_id)?;
        Ok(())
    }

    pub fn on_thread_moved(
        &self,
        old_forum_id: i64,
        new_forum_id: i64,
        reply_count: i64,
    ) -> Result<(), DomainError> {
        debug!(from = old_forum_id, to = new_forum_id, reply_count, "thread moved");
        let forums = self.store.forums();
        forums.adjust_counts(old_forum_id, -1, -reply_count)?;
        forums.adjust_counts(new_forum_id, 1, reply_count)?;

        // The moved thread may be older than what the new forum already shows.
        self.refresh_forum_last_post(old_forum_id)?;
        self.refresh_forum_last_post(new_forum_id)?;
        Ok(())
    }

    /// The forum's last-post pointer carries the thread title.
    pub fn on_thread_retitled(&self, thread: &Thread) -> Result<(), DomainError> {
        self.refresh_forum_last_post(thread.forum_id)?;
        Ok(())
    }

    /// Newest remaining reply, or the thread's own posted stamp.
    pub fn refresh_thread_last_post(&self, thread: &Thread) -> Result<PostStamp, DomainError> {
        let last = self
            .store
            .replies()
            .latest_by_thread(thread.id)?
            .map(|reply| reply.posted)
            .unwrap_or_else(|| thread.posted.clone());
        self.store.threads().set_last_post(thread.id, &last)?;
        Ok(last)
    }

    pub fn refresh_forum_last_post(&self, forum_id: i64) -> Result<Option<LastPost>, DomainError> {
        let forums = self.store.forums();
        let latest = forums.latest_post(forum_id)?;
        forums.set_last_post(forum_id, latest.as_ref())?;
        Ok(latest)
    }

    /// Rebuilds every counter of a forum and its threads from the rows.
    pub fn recount_forum(&self, forum_id: i64) -> Result<(), DomainError> {
        let threads = self.store.threads();
        let replies = self.store.replies();

        let ids = threads.ids_by_forum(forum_id)?;
        let mut reply_total = 0;
        for id in &ids {
            let Some(thread) = threads.find_by_id(*id)? else {
                continue;
            };
            let count = replies.count_by_thread(thread.id)?;
            threads.set_reply_count(thread.id, count)?;
            self.refresh_thread_last_post(&thread)?;
            reply_total += count;
        }

        self.store
            .forums()
            .set_counts(forum_id, ids.len() as i64, reply_total)?;
        self.refresh_forum_last_post(forum_id)?;
        debug!(forum = forum_id, threads = ids.len(), replies = reply_total, "forum recounted");
        Ok(())
    }

    fn advance_forum_last_post(
        &self,
        forum_id: i64,
        stamp: &PostStamp,
        thread_title: &str,
    ) -> Result<(), DomainError> {
        let forums = self.store.forums();
        let forum = forums
            .find_by_id(forum_id)?
            .ok_or(DomainError::ForumNotFound(forum_id))?;

        let previous = forum.last_post.as_ref().map(|last| last.stamp.at);
        match previous {
            Some(at) if stamp.at < at => {}
            // Same instant: let the row ordering pick, so the pointer always
            // matches what a recount would produce.
            Some(at) if stamp.at == at => {
                self.refresh_forum_last_post(forum_id)?;
            }
            _ => {
                let last = LastPost {
                    stamp: stamp.clone(),
                    thread_title: thread_title.to_string(),
                };
                forums.set_last_post(forum_id, Some(&last))?;
            }
        }
        Ok(())
    }
}
