use crate::domain::audit::AuditAction;
use crate::domain::entity::{NewReply, PostStamp, Reply, Thread};
use crate::domain::error::DomainError;
use crate::domain::identity::{GatedAction, Identity, Role};
use crate::domain::pagination::{compute_window, PageRequest};
use crate::domain::repository::{ReplyRepository, Store, ThreadRepository};
use crate::usecase::aggregate::AggregateUpdater;
use crate::usecase::{non_empty, require_signed_in, ForumContext};

pub struct ReplyUseCase<'a, S: Store> {
    pub(crate) store: &'a S,
    pub(crate) ctx: ForumContext<'a>,
}

impl<'a, S: Store> ReplyUseCase<'a, S> {
    pub fn new(store: &'a S, ctx: ForumContext<'a>) -> Self {
        Self { store, ctx }
    }

    fn thread(&self, id: i64) -> Result<Thread, DomainError> {
        self.store
            .threads()
            .find_by_id(id)?
            .ok_or_else(|| DomainError::ThreadNotFound(id.to_string()))
    }

    fn reply(&self, id: i64) -> Result<Reply, DomainError> {
        self.store
            .replies()
            .find_by_id(id)?
            .ok_or(DomainError::ReplyNotFound(id))
    }

    fn ensure_author_or_moderator(&self, who: &dyn Identity, reply: &Reply) -> Result<(), DomainError> {
        if reply.is_posted_by(&who.author()) || who.has_role(Role::Moderator) {
            Ok(())
        } else {
            Err(DomainError::permission("他のユーザーの reply は変更できません"))
        }
    }

    pub fn create(&self, who: &dyn Identity, thread_id: i64, body: &str) -> Result<Reply, DomainError> {
        self.ctx.check_can_post(who, GatedAction::NewReply)?;
        let body = non_empty(body, "body")?;
        let posted = PostStamp::new(&who.author(), self.ctx.clock.now());

        let reply = self.store.atomically(|| {
            let thread = self.thread(thread_id)?;
            if thread.is_closed() {
                return Err(DomainError::ThreadClosed(thread.id));
            }

            let id = self.store.replies().create(&NewReply {
                thread_id,
                body: body.to_string(),
                posted: posted.clone(),
            })?;
            let reply = self.reply(id)?;
            AggregateUpdater::new(self.store).on_reply_added(&thread, &reply)?;
            Ok(reply)
        })?;

        self.ctx.audit(AuditAction::AddReply, who, reply.id, &reply.body);
        Ok(reply)
    }

    /// Non-moderators cannot edit inside a closed thread.
    pub fn edit(&self, who: &dyn Identity, id: i64, body: &str) -> Result<Reply, DomainError> {
        require_signed_in(who)?;
        let body = non_empty(body, "body")?;
        let edited = PostStamp::new(&who.author(), self.ctx.clock.now());

        let reply = self.store.atomically(|| {
            let reply = self.reply(id)?;
            self.ensure_author_or_moderator(who, &reply)?;
            let thread = self.thread(reply.thread_id)?;
            if thread.is_closed() && !who.has_role(Role::Moderator) {
                return Err(DomainError::ThreadClosed(thread.id));
            }
            if reply.body == body {
                return Ok(reply);
            }

            self.store.replies().update_body(id, body, &edited)?;
            self.reply(id)
        })?;

        self.ctx.audit(AuditAction::EditReply, who, reply.id, &reply.body);
        Ok(reply)
    }

    pub fn delete(&self, who: &dyn Identity, id: i64) -> Result<Reply, DomainError> {
        require_signed_in(who)?;

        let reply = self.store.atomically(|| {
            let reply = self.reply(id)?;
            self.ensure_author_or_moderator(who, &reply)?;
            let thread = self.thread(reply.thread_id)?;

            self.store.replies().delete(id)?;
            AggregateUpdater::new(self.store).on_reply_deleted(&thread)?;
            Ok(reply)
        })?;

        self.ctx.audit(AuditAction::DeleteReply, who, reply.id, &reply.body);
        Ok(reply)
    }

    /// Replies oldest first, windowed by `max_replies_per_page`.
    pub fn list_for_thread(
        &self,
        thread_id: i64,
        page: Option<PageRequest>,
    ) -> Result<Vec<Reply>, DomainError> {
        self.thread(thread_id)?;
        let total = self.store.replies().count_by_thread(thread_id)? as usize;
        let window = compute_window(total, self.ctx.config.max_replies_per_page, page);
        self.store.replies().list_by_thread(thread_id, window)
    }
}
