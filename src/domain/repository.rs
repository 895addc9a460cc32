use super::entity::{
    Category, Forum, LastPost, NewForum, NewReply, NewThread, PostFilter, PostStamp, Reply, Thread,
};
use super::error::DomainError;
use super::pagination::Window;

pub trait CategoryRepository {
    fn create(&self, name: &str, sort_key: i64) -> Result<i64, DomainError>;
    fn find_by_id(&self, id: i64) -> Result<Option<Category>, DomainError>;
    fn find_by_names(&self, names: &[String]) -> Result<Vec<Category>, DomainError>;
    fn list(&self) -> Result<Vec<Category>, DomainError>;
}

pub trait ForumRepository {
    fn create(&self, forum: &NewForum) -> Result<i64, DomainError>;
    fn find_by_id(&self, id: i64) -> Result<Option<Forum>, DomainError>;
    fn list_by_category(&self, category_id: i64) -> Result<Vec<Forum>, DomainError>;
    /// Adds the deltas to `thread_count` and `reply_count`.
    fn adjust_counts(&self, id: i64, threads: i64, replies: i64) -> Result<(), DomainError>;
    fn set_counts(&self, id: i64, threads: i64, replies: i64) -> Result<(), DomainError>;
    fn set_last_post(&self, id: i64, last: Option<&LastPost>) -> Result<(), DomainError>;
    /// Newest thread or reply beneath the forum, computed from the rows.
    fn latest_post(&self, id: i64) -> Result<Option<LastPost>, DomainError>;
}

pub trait ThreadRepository {
    fn create(&self, thread: &NewThread) -> Result<i64, DomainError>;
    fn find_by_id(&self, id: i64) -> Result<Option<Thread>, DomainError>;
    /// Lookup by normalized title (underscores and spaces are equivalent).
    fn find_by_title(&self, title: &str) -> Result<Option<Thread>, DomainError>;
    /// Sticky threads first, then by last post, newest first.
    fn list_by_forum(&self, forum_id: i64, window: Window) -> Result<Vec<Thread>, DomainError>;
    fn count_by_forum(&self, forum_id: i64) -> Result<i64, DomainError>;
    fn update_content(
        &self,
        id: i64,
        title: &str,
        body: &str,
        edited: &PostStamp,
    ) -> Result<(), DomainError>;
    fn set_closed(&self, id: i64, closed: Option<&PostStamp>) -> Result<(), DomainError>;
    fn set_sticky(&self, id: i64, sticky: bool) -> Result<(), DomainError>;
    fn set_forum(&self, id: i64, forum_id: i64) -> Result<(), DomainError>;
    fn adjust_reply_count(&self, id: i64, delta: i64) -> Result<(), DomainError>;
    fn set_reply_count(&self, id: i64, count: i64) -> Result<(), DomainError>;
    fn set_last_post(&self, id: i64, last: &PostStamp) -> Result<(), DomainError>;
    fn increment_view_count(&self, id: i64) -> Result<(), DomainError>;
    fn delete(&self, id: i64) -> Result<(), DomainError>;
    /// Newest first, at most `limit` rows.
    fn recent(&self, filter: &PostFilter, limit: usize) -> Result<Vec<Thread>, DomainError>;
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, DomainError>;
    fn ids_by_forum(&self, forum_id: i64) -> Result<Vec<i64>, DomainError>;
}

pub trait ReplyRepository {
    fn create(&self, reply: &NewReply) -> Result<i64, DomainError>;
    fn find_by_id(&self, id: i64) -> Result<Option<Reply>, DomainError>;
    /// Oldest first.
    fn list_by_thread(&self, thread_id: i64, window: Window) -> Result<Vec<Reply>, DomainError>;
    fn count_by_thread(&self, thread_id: i64) -> Result<i64, DomainError>;
    #[cfg(test)]
    fn count_by_forum(&self, forum_id: i64) -> Result<i64, DomainError>;
    fn latest_by_thread(&self, thread_id: i64) -> Result<Option<Reply>, DomainError>;
    fn update_body(&self, id: i64, body: &str, edited: &PostStamp) -> Result<(), DomainError>;
    fn delete(&self, id: i64) -> Result<(), DomainError>;
    fn delete_by_thread(&self, thread_id: i64) -> Result<usize, DomainError>;
    /// Newest first, at most `limit` rows.
    fn recent(&self, filter: &PostFilter, limit: usize) -> Result<Vec<Reply>, DomainError>;
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Reply>, DomainError>;
}

/// All repositories over one backend, plus its transaction boundary.
pub trait Store {
    type Categories: CategoryRepository;
    type Forums: ForumRepository;
    type Threads: ThreadRepository;
    type Replies: ReplyRepository;

    fn categories(&self) -> &Self::Categories;
    fn forums(&self) -> &Self::Forums;
    fn threads(&self) -> &Self::Threads;
    fn replies(&self) -> &Self::Replies;

    /// Runs `f` in a single write transaction. Any error rolls everything back.
    fn atomically<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Result<T, DomainError>;
}
