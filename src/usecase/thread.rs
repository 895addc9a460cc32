use serde::Serialize;
use tracing::warn;

use crate::domain::audit::AuditAction;
use crate::domain::entity::{normalize_title, NewThread, PostStamp, Reply, Thread};
use crate::domain::error::{DomainError, ValidationError};
use crate::domain::identity::{GatedAction, Identity, Role};
use crate::domain::pagination::{compute_window, page_count, PageRequest};
use crate::domain::repository::{ForumRepository, ReplyRepository, Store, ThreadRepository};
use crate::usecase::aggregate::AggregateUpdater;
use crate::usecase::navigator::{Breadcrumb, HierarchyNavigator};
use crate::usecase::{non_empty, require_role, require_signed_in, validate_title, ForumContext};

/// A thread addressed by id or by title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadRef {
    Id(i64),
    Title(String),
}

/// One page of a thread as shown to a reader.
#[derive(Debug, Serialize)]
pub struct ThreadPage {
    pub thread: Thread,
    pub breadcrumb: Breadcrumb,
    pub replies: Vec<Reply>,
    /// Zero-based.
    pub page_index: usize,
    pub page_count: usize,
}

pub struct ThreadUseCase<'a, S: Store> {
    pub(crate) store: &'a S,
    pub(crate) ctx: ForumContext<'a>,
}

impl<'a, S: Store> ThreadUseCase<'a, S> {
    pub fn new(store: &'a S, ctx: ForumContext<'a>) -> Self {
        Self { store, ctx }
    }

    fn aggregates(&self) -> AggregateUpdater<'a, S> {
        AggregateUpdater::new(self.store)
    }

    fn load(&self, id: i64) -> Result<Thread, DomainError> {
        self.store
            .threads()
            .find_by_id(id)?
            .ok_or_else(|| DomainError::ThreadNotFound(id.to_string()))
    }

    pub fn find(&self, thread: &ThreadRef) -> Result<Thread, DomainError> {
        match thread {
            ThreadRef::Id(id) => self.load(*id),
            ThreadRef::Title(title) => self
                .store
                .threads()
                .find_by_title(title)?
                .ok_or_else(|| DomainError::ThreadNotFound(title.clone())),
        }
    }

    fn ensure_title_free(&self, title: &str, except: Option<i64>) -> Result<(), DomainError> {
        match self.store.threads().find_by_title(title)? {
            Some(existing) if Some(existing.id) != except => {
                Err(ValidationError::DuplicateTitle(title.to_string()).into())
            }
            _ => Ok(()),
        }
    }

    fn ensure_author_or_moderator(&self, who: &dyn Identity, thread: &Thread) -> Result<(), DomainError> {
        if thread.is_posted_by(&who.author()) || who.has_role(Role::Moderator) {
            Ok(())
        } else {
            Err(DomainError::permission("他のユーザーの thread は変更できません"))
        }
    }

    pub fn create(
        &self,
        who: &dyn Identity,
        forum_id: i64,
        title: &str,
        body: &str,
    ) -> Result<Thread, DomainError> {
        self.ctx.check_can_post(who, GatedAction::NewThread)?;
        let title = validate_title(title)?;
        let body = non_empty(body, "body")?;

        let posted = PostStamp::new(&who.author(), self.ctx.clock.now());
        let thread = self.store.atomically(|| {
            let forum = self
                .store
                .forums()
                .find_by_id(forum_id)?
                .ok_or(DomainError::ForumNotFound(forum_id))?;
            if forum.announcement {
                require_role(who, Role::Moderator)?;
            }
            self.ensure_title_free(title, None)?;

            let id = self.store.threads().create(&NewThread {
                forum_id,
                title: title.to_string(),
                body: body.to_string(),
                posted: posted.clone(),
            })?;
            let thread = self.load(id)?;
            self.aggregates().on_thread_added(&thread)?;
            Ok(thread)
        })?;

        self.ctx.audit(AuditAction::AddThread, who, thread.id, &thread.body);
        Ok(thread)
    }

    /// Changes title and/or body. Unchanged input is a no-op.
    pub fn edit(
        &self,
        who: &dyn Identity,
        id: i64,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<Thread, DomainError> {
        require_signed_in(who)?;
        let title = title.map(validate_title).transpose()?;
        let body = body.map(|b| non_empty(b, "body")).transpose()?;
        let now = self.ctx.clock.now();

        let (thread, changed) = self.store.atomically(|| {
            let thread = self.load(id)?;
            self.ensure_author_or_moderator(who, &thread)?;
            self.rewrite(who, thread, title, body, now)
        })?;

        if changed {
            self.ctx.audit(AuditAction::EditThread, who, thread.id, &thread.body);
        }
        Ok(thread)
    }

    // Shared by edit and move. Runs inside the caller's transaction.
    fn rewrite(
        &self,
        who: &dyn Identity,
        thread: Thread,
        title: Option<&str>,
        body: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(Thread, bool), DomainError> {
        let new_title = title.unwrap_or(&thread.title);
        let new_body = body.unwrap_or(&thread.body);
        if new_title == thread.title && new_body == thread.body {
            return Ok((thread, false));
        }

        let retitled = normalize_title(new_title) != normalize_title(&thread.title);
        if retitled {
            self.ensure_title_free(new_title, Some(thread.id))?;
        }

        let edited = PostStamp::new(&who.author(), now);
        self.store
            .threads()
            .update_content(thread.id, new_title, new_body, &edited)?;
        let updated = self.load(thread.id)?;
        if new_title != thread.title {
            self.aggregates().on_thread_retitled(&updated)?;
        }
        Ok((updated, true))
    }

    /// Removes the thread and its replies. Returns the deleted thread and the
    /// number of reply rows actually removed.
    pub fn delete(&self, who: &dyn Identity, id: i64) -> Result<(Thread, usize), DomainError> {
        require_signed_in(who)?;

        let (thread, removed) = self.store.atomically(|| {
            let thread = self.load(id)?;
            self.ensure_author_or_moderator(who, &thread)?;

            let removed = self.store.replies().delete_by_thread(thread.id)?;
            self.store.threads().delete(thread.id)?;
            self.aggregates()
                .on_thread_deleted(thread.forum_id, removed as i64)?;
            Ok((thread, removed))
        })?;

        self.ctx.audit(AuditAction::DeleteThread, who, thread.id, &thread.title);
        Ok((thread, removed))
    }

    pub fn close(&self, who: &dyn Identity, id: i64) -> Result<Thread, DomainError> {
        require_role(who, Role::Moderator)?;
        let stamp = PostStamp::new(&who.author(), self.ctx.clock.now());

        let thread = self.store.atomically(|| {
            let thread = self.load(id)?;
            if thread.is_closed() {
                return Ok(thread);
            }
            self.store.threads().set_closed(id, Some(&stamp))?;
            self.load(id)
        })?;

        self.ctx.audit(AuditAction::CloseThread, who, thread.id, &thread.title);
        Ok(thread)
    }

    pub fn reopen(&self, who: &dyn Identity, id: i64) -> Result<Thread, DomainError> {
        require_role(who, Role::Moderator)?;

        let thread = self.store.atomically(|| {
            let thread = self.load(id)?;
            if !thread.is_closed() {
                return Ok(thread);
            }
            self.store.threads().set_closed(id, None)?;
            self.load(id)
        })?;

        self.ctx.audit(AuditAction::ReopenThread, who, thread.id, &thread.title);
        Ok(thread)
    }

    pub fn set_sticky(&self, who: &dyn Identity, id: i64, sticky: bool) -> Result<Thread, DomainError> {
        require_role(who, Role::Admin)?;

        let thread = self.store.atomically(|| {
            self.load(id)?;
            self.store.threads().set_sticky(id, sticky)?;
            self.load(id)
        })?;

        let action = if sticky { AuditAction::StickThread } else { AuditAction::UnstickThread };
        self.ctx.audit(action, who, thread.id, &thread.title);
        Ok(thread)
    }

    /// Moves the thread to another forum, optionally renaming it.
    pub fn move_to(
        &self,
        who: &dyn Identity,
        id: i64,
        forum_id: i64,
        new_title: Option<&str>,
    ) -> Result<Thread, DomainError> {
        require_role(who, Role::Moderator)?;
        let new_title = new_title.map(validate_title).transpose()?;
        let now = self.ctx.clock.now();

        let thread = self.store.atomically(|| {
            let mut thread = self.load(id)?;

            if thread.forum_id != forum_id {
                self.store
                    .forums()
                    .find_by_id(forum_id)?
                    .ok_or(DomainError::ForumNotFound(forum_id))?;

                // Counted inside the transaction, so it matches the rows being moved.
                let replies = self.store.replies().count_by_thread(thread.id)?;
                self.store.threads().set_forum(thread.id, forum_id)?;
                self.aggregates()
                    .on_thread_moved(thread.forum_id, forum_id, replies)?;
                thread = self.load(id)?;
            }

            let (thread, _) = self.rewrite(who, thread, new_title, None, now)?;
            Ok(thread)
        })?;

        self.ctx.audit(AuditAction::MoveThread, who, thread.id, &thread.title);
        Ok(thread)
    }

    /// Reads one page of the thread and counts the view. The returned
    /// `view_count` includes this view when the increment succeeded.
    pub fn view(&self, thread: &ThreadRef, page: Option<PageRequest>) -> Result<ThreadPage, DomainError> {
        let mut thread = self.find(thread)?;
        let navigator = HierarchyNavigator::new(self.store);
        let breadcrumb = navigator.thread_breadcrumb(&thread)?;

        let page_size = self.ctx.config.max_replies_per_page;
        let total = self.store.replies().count_by_thread(thread.id)? as usize;
        let window = compute_window(total, page_size, page);
        let replies = self.store.replies().list_by_thread(thread.id, window)?;

        // Display metric only: lost or failed increments are tolerated.
        match self.store.threads().increment_view_count(thread.id) {
            Ok(()) => thread.view_count += 1,
            Err(e) => warn!(thread = thread.id, error = %e, "failed to count thread view"),
        }

        let page_index = match window.limit {
            Some(size) if size > 0 => window.offset / size,
            _ => 0,
        };
        Ok(ThreadPage {
            page_index,
            page_count: page_count(total, page_size),
            thread,
            breadcrumb,
            replies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ForumConfig;
    use crate::domain::entity::NewForum;
    use crate::domain::error::ErrorKind;
    use crate::domain::identity::Caller;
    use crate::usecase::reply::ReplyUseCase;
    use crate::usecase::testing::{
        admin, assert_consistent, member, moderator, seed_forum, ClosedGate, Harness,
    };
    use crate::usecase::ForumContext;

    #[test]
    fn create_updates_forum_and_audits() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());

        let thread = uc.create(&member(1), forum, "  Hello world ", "first!").unwrap();

        assert_eq!(thread.title, "Hello world");
        assert_eq!(thread.last_post, thread.posted);
        let f = store.forums().find_by_id(forum).unwrap().unwrap();
        assert_eq!(f.thread_count, 1);
        assert_eq!(f.last_post.unwrap().thread_title, "Hello world");
        assert_eq!(h.actions(), vec!["add-thread"]);
        assert_consistent(&store, forum);
    }

    #[test]
    fn duplicate_titles_are_rejected_after_normalization() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());

        uc.create(&member(1), forum, "Foo", "a").unwrap();
        let bar = uc.create(&member(1), forum, "Foo_Bar", "b").unwrap();

        let found = uc.find(&ThreadRef::Title("Foo Bar".into())).unwrap();
        assert_eq!(found.id, bar.id);

        let err = uc.create(&member(2), forum, "Foo", "c").unwrap_err();
        assert!(matches!(
            err,
            DomainError::Validation(ValidationError::DuplicateTitle(ref t)) if t == "Foo"
        ));
        let err = uc.create(&member(2), forum, "Foo Bar", "c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.forums().find_by_id(forum).unwrap().unwrap().thread_count, 2);
    }

    #[test]
    fn edge_underscores_normalize_like_spaces() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());

        uc.create(&member(1), forum, "Foo", "a").unwrap();
        let err = uc.create(&member(2), forum, "Foo_", "b").unwrap_err();
        assert!(matches!(
            err,
            DomainError::Validation(ValidationError::DuplicateTitle(ref t)) if t == "Foo_"
        ));

        let bar = uc.create(&member(1), forum, "_Bar", "c").unwrap();
        assert_eq!(uc.find(&ThreadRef::Title(" Bar".into())).unwrap().id, bar.id);
        assert_eq!(uc.find(&ThreadRef::Title("Bar".into())).unwrap().id, bar.id);

        let err = uc.create(&member(1), forum, "__", "d").unwrap_err();
        assert!(matches!(err, DomainError::Validation(ValidationError::EmptyField("title"))));
        assert_eq!(store.forums().find_by_id(forum).unwrap().unwrap().thread_count, 2);
    }

    #[test]
    fn create_validates_input_before_touching_storage() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());

        let err = uc.create(&member(1), forum, "   ", "body").unwrap_err();
        assert!(matches!(err, DomainError::Validation(ValidationError::EmptyField("title"))));
        let err = uc.create(&member(1), forum, "Title", "").unwrap_err();
        assert!(matches!(err, DomainError::Validation(ValidationError::EmptyField("body"))));
        let err = uc.create(&member(1), forum, "a [link]", "body").unwrap_err();
        assert!(matches!(err, DomainError::Validation(ValidationError::InvalidTitleChars(_))));
        let err = uc.create(&member(1), 4242, "Title", "body").unwrap_err();
        assert!(matches!(err, DomainError::ForumNotFound(4242)));
        assert!(h.audit.events.borrow().is_empty());
    }

    #[test]
    fn anonymous_posting_follows_config() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let anon = Caller::anonymous("192.0.2.1");

        let err = ThreadUseCase::new(&store, h.ctx())
            .create(&anon, forum, "Hi", "there")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let open = Harness::with_config(ForumConfig { allow_anonymous: true, ..Default::default() });
        let store = open.store();
        let forum = seed_forum(&store, "Lobby");
        let thread = ThreadUseCase::new(&store, open.ctx())
            .create(&anon, forum, "Hi", "there")
            .unwrap();
        assert_eq!(thread.posted.actor_id, 0);
        assert_eq!(thread.posted.actor_name, "192.0.2.1");
    }

    #[test]
    fn anti_abuse_gate_blocks_creation() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let ctx = ForumContext { gate: &ClosedGate, ..h.ctx() };

        let err = ThreadUseCase::new(&store, ctx)
            .create(&member(1), forum, "Hi", "there")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(store.threads().count_by_forum(forum).unwrap(), 0);
    }

    #[test]
    fn announcement_forums_need_a_moderator() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let news = store
            .forums()
            .create(&NewForum {
                category_id: store.forums().find_by_id(forum).unwrap().unwrap().category_id,
                name: "News".into(),
                description: String::new(),
                sort_key: 1,
                announcement: true,
            })
            .unwrap();
        let uc = ThreadUseCase::new(&store, h.ctx());

        let err = uc.create(&member(1), news, "Launch", "soon").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        uc.create(&moderator(), news, "Launch", "soon").unwrap();
    }

    #[test]
    fn only_author_or_moderator_may_edit() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let thread = uc.create(&member(1), forum, "Mine", "text").unwrap();

        let err = uc.edit(&member(2), thread.id, Some("Stolen"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let edited = uc.edit(&member(1), thread.id, None, Some("better text")).unwrap();
        assert_eq!(edited.body, "better text");
        assert_eq!(edited.edited.as_ref().unwrap().actor_id, 1);

        let edited = uc.edit(&moderator(), thread.id, Some("Renamed"), None).unwrap();
        assert_eq!(edited.title, "Renamed");
        let f = store.forums().find_by_id(forum).unwrap().unwrap();
        assert_eq!(f.last_post.unwrap().thread_title, "Renamed");
        assert_consistent(&store, forum);
    }

    #[test]
    fn edit_without_changes_is_a_no_op() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let thread = uc.create(&member(1), forum, "Same", "text").unwrap();

        let unchanged = uc.edit(&member(1), thread.id, Some("Same"), Some("text")).unwrap();
        assert!(unchanged.edited.is_none());
        assert_eq!(h.actions(), vec!["add-thread"]);
    }

    #[test]
    fn retitle_cannot_take_another_threads_title() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        uc.create(&member(1), forum, "Taken", "a").unwrap();
        let other = uc.create(&member(1), forum, "Other", "b").unwrap();

        let err = uc.edit(&member(1), other.id, Some("Taken"), None).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ValidationError::DuplicateTitle(_))));
    }

    #[test]
    fn delete_cascades_counters() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let threads = ThreadUseCase::new(&store, h.ctx());
        let replies = ReplyUseCase::new(&store, h.ctx());

        let keep = threads.create(&member(1), forum, "Keep", "a").unwrap();
        let doomed = threads.create(&member(2), forum, "Doomed", "b").unwrap();
        replies.create(&member(3), keep.id, "r1").unwrap();
        replies.create(&member(3), doomed.id, "r2").unwrap();
        replies.create(&member(3), doomed.id, "r3").unwrap();

        let err = threads.delete(&member(3), doomed.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let (deleted, removed) = threads.delete(&member(2), doomed.id).unwrap();
        assert_eq!(deleted.id, doomed.id);
        assert_eq!(removed, 2);

        let f = store.forums().find_by_id(forum).unwrap().unwrap();
        assert_eq!((f.thread_count, f.reply_count), (1, 1));
        assert_eq!(f.last_post.unwrap().thread_title, "Keep");
        assert_eq!(store.replies().count_by_thread(doomed.id).unwrap(), 0);
        assert_consistent(&store, forum);
    }

    #[test]
    fn deleting_last_thread_empties_forum_pointer() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let thread = uc.create(&member(1), forum, "Only", "a").unwrap();

        uc.delete(&moderator(), thread.id).unwrap();

        let f = store.forums().find_by_id(forum).unwrap().unwrap();
        assert_eq!(f.thread_count, 0);
        assert!(f.last_post.is_none());
    }

    #[test]
    fn close_and_reopen_need_moderator() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let thread = uc.create(&member(1), forum, "Heated", "a").unwrap();

        assert_eq!(uc.close(&member(1), thread.id).unwrap_err().kind(), ErrorKind::Permission);

        let closed = uc.close(&moderator(), thread.id).unwrap();
        assert!(closed.is_closed());
        assert_eq!(closed.closed.as_ref().unwrap().actor_id, 900);

        let reopened = uc.reopen(&moderator(), thread.id).unwrap();
        assert!(!reopened.is_closed());
    }

    #[test]
    fn sticky_needs_admin_and_sorts_first() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let old = uc.create(&member(1), forum, "Rules", "a").unwrap();
        uc.create(&member(1), forum, "Chatter", "b").unwrap();

        assert_eq!(uc.set_sticky(&moderator(), old.id, true).unwrap_err().kind(), ErrorKind::Permission);
        assert!(uc.set_sticky(&admin(), old.id, true).unwrap().sticky);

        let listed = store
            .threads()
            .list_by_forum(forum, crate::domain::pagination::Window::ALL)
            .unwrap();
        assert_eq!(listed[0].id, old.id);
    }

    #[test]
    fn move_preserves_reply_totals() {
        let h = Harness::new();
        let store = h.store();
        let a = seed_forum(&store, "A");
        let b = seed_forum(&store, "B");
        let threads = ThreadUseCase::new(&store, h.ctx());
        let replies = ReplyUseCase::new(&store, h.ctx());

        let mover = threads.create(&member(1), a, "Mover", "m").unwrap();
        let stay = threads.create(&member(1), a, "Stay", "s").unwrap();
        replies.create(&member(2), mover.id, "x").unwrap();
        replies.create(&member(2), mover.id, "y").unwrap();
        replies.create(&member(2), stay.id, "z").unwrap();
        threads.create(&member(1), b, "Newer in B", "n").unwrap();

        let before_a = store.forums().find_by_id(a).unwrap().unwrap();
        let before_b = store.forums().find_by_id(b).unwrap().unwrap();

        let err = threads.move_to(&member(1), mover.id, b, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        let moved = threads.move_to(&moderator(), mover.id, b, Some("Moved")).unwrap();
        assert_eq!(moved.forum_id, b);
        assert_eq!(moved.title, "Moved");

        let after_a = store.forums().find_by_id(a).unwrap().unwrap();
        let after_b = store.forums().find_by_id(b).unwrap().unwrap();
        assert_eq!(
            before_a.reply_count + before_b.reply_count,
            after_a.reply_count + after_b.reply_count
        );
        assert_eq!((after_a.thread_count, after_a.reply_count), (1, 1));
        assert_eq!((after_b.thread_count, after_b.reply_count), (2, 2));
        // "Newer in B" was posted after every reply in the moved thread.
        assert_eq!(after_b.last_post.unwrap().thread_title, "Newer in B");
        assert_eq!(after_a.last_post.unwrap().thread_title, "Stay");
        assert_consistent(&store, a);
        assert_consistent(&store, b);
    }

    #[test]
    fn move_to_unknown_forum_changes_nothing() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let uc = ThreadUseCase::new(&store, h.ctx());
        let thread = uc.create(&member(1), forum, "Stuck", "a").unwrap();

        let err = uc.move_to(&moderator(), thread.id, 777, None).unwrap_err();
        assert!(matches!(err, DomainError::ForumNotFound(777)));
        assert_eq!(uc.find(&ThreadRef::Id(thread.id)).unwrap().forum_id, forum);
        assert_consistent(&store, forum);
    }

    #[test]
    fn view_pages_replies_and_counts_views() {
        let h = Harness::new();
        let store = h.store();
        let forum = seed_forum(&store, "Lobby");
        let threads = ThreadUseCase::new(&store, h.ctx());
        let replies = ReplyUseCase::new(&store, h.ctx());
        let thread = threads.create(&member(1), forum, "Long one", "a").unwrap();
        for i in 0..23 {
            replies.create(&member(2), thread.id, &format!("reply {}", i)).unwrap();
        }

        let page = threads.view(&ThreadRef::Title("Long_one".into()), Some(PageRequest::Latest)).unwrap();
        assert_eq!(page.thread.view_count, 1);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.page_index, 2);
        assert_eq!(page.replies.len(), 3);
        assert_eq!(page.replies[0].body, "reply 20");
        assert_eq!(page.breadcrumb.forum.id, forum);

        let first = threads.view(&ThreadRef::Id(thread.id), None).unwrap();
        assert_eq!(first.replies.len(), 10);
        assert_eq!(first.replies[0].body, "reply 0");
        assert_eq!(first.thread.view_count, 2);
        assert_eq!(threads.find(&ThreadRef::Id(thread.id)).unwrap().view_count, 2);
    }

    #[test]
    fn concurrent_reply_and_delete_stay_consistent() {
        use crate::domain::clock::SystemClock;
        use crate::domain::identity::OpenGate;
        use crate::infra::sqlite::{Database, SqliteStore};
        use crate::usecase::testing::RecordingAudit;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forum.db");
        let (forum, thread_id) = {
            let db = Database::open(&path).unwrap();
            let store = SqliteStore::new(db.connection());
            let forum = seed_forum(&store, "Lobby");
            let config = ForumConfig::default();
            let audit = RecordingAudit::default();
            let ctx = ForumContext { config: &config, clock: &SystemClock, audit: &audit, gate: &OpenGate };
            let thread = ThreadUseCase::new(&store, ctx).create(&member(1), forum, "Race", "go").unwrap();
            ThreadUseCase::new(&store, ctx).create(&member(1), forum, "Bystander", "b").unwrap();
            (forum, thread.id)
        };

        let replier = {
            let path = path.clone();
            std::thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                let store = SqliteStore::new(db.connection());
                let config = ForumConfig::default();
                let audit = RecordingAudit::default();
                let ctx = ForumContext { config: &config, clock: &SystemClock, audit: &audit, gate: &OpenGate };
                let uc = ReplyUseCase::new(&store, ctx);
                for i in 0..50 {
                    match uc.create(&member(2), thread_id, &format!("r{}", i)) {
                        Ok(_) => {}
                        Err(DomainError::ThreadNotFound(_)) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        };

        let deleter = {
            let path = path.clone();
            std::thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                let store = SqliteStore::new(db.connection());
                let config = ForumConfig::default();
                let audit = RecordingAudit::default();
                let ctx = ForumContext { config: &config, clock: &SystemClock, audit: &audit, gate: &OpenGate };
                std::thread::sleep(std::time::Duration::from_millis(5));
                ThreadUseCase::new(&store, ctx).delete(&moderator(), thread_id).unwrap();
            })
        };

        replier.join().unwrap();
        deleter.join().unwrap();

        let db = Database::open(&path).unwrap();
        let store = SqliteStore::new(db.connection());
        let f = store.forums().find_by_id(forum).unwrap().unwrap();
        assert_eq!(f.thread_count, 1);
        assert!(f.reply_count >= 0);
        assert_eq!(store.replies().count_by_thread(thread_id).unwrap(), 0);
        assert_consistent(&store, forum);
    }
}
