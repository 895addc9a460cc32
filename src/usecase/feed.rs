use serde::Serialize;

use crate::domain::entity::{Post, PostFilter, Reply, Thread};
use crate::domain::error::{DomainError, ValidationError};
use crate::domain::repository::{CategoryRepository, ReplyRepository, Store, ThreadRepository};
use crate::usecase::ForumContext;

/// Recent-posts request. Category names are resolved to ids before querying.
#[derive(Debug, Clone, Default)]
pub struct RecentPostsQuery {
    pub filter: PostFilter,
    pub category_names: Vec<String>,
    /// Defaults to `recent_posts_limit`.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub threads: Vec<Thread>,
    pub replies: Vec<Reply>,
}

/// Read-only views across the whole board.
pub struct FeedUseCase<'a, S: Store> {
    pub(crate) store: &'a S,
    pub(crate) ctx: ForumContext<'a>,
}

impl<'a, S: Store> FeedUseCase<'a, S> {
    pub fn new(store: &'a S, ctx: ForumContext<'a>) -> Self {
        Self { store, ctx }
    }

    /// Newest threads and replies, mixed, newest first.
    ///
    /// Each source is cut to `limit` before merging, so a reply can be missed
    /// when more than `limit` newer threads exist. That trade is intentional.
    pub fn recent_posts(&self, query: &RecentPostsQuery) -> Result<Vec<Post>, DomainError> {
        let limit = query.limit.unwrap_or(self.ctx.config.recent_posts_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut filter = query.filter.clone();
        if !query.category_names.is_empty() {
            let found = self.store.categories().find_by_names(&query.category_names)?;
            if found.is_empty() && filter.category_ids.is_empty() {
                // Named categories that do not exist match nothing.
                return Ok(Vec::new());
            }
            filter.category_ids.extend(found.into_iter().map(|c| c.id));
        }

        let replies = self.store.replies().recent(&filter, limit)?;
        let threads = self.store.threads().recent(&filter, limit)?;
        Ok(merge_recent(replies, threads, limit))
    }

    /// Threads matching title or body, and replies matching body, each newest first.
    pub fn search(&self, query: &str) -> Result<SearchResults, DomainError> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Err(ValidationError::QueryTooShort.into());
        }

        let limit = self.ctx.config.max_threads_per_page;
        Ok(SearchResults {
            threads: self.store.threads().search(query, limit)?,
            replies: self.store.replies().search(query, limit)?,
        })
    }
}

/// Concatenates both result sets, sorts newest first and keeps `limit`.
/// The sort is stable: equal timestamps keep fetch order, replies before threads.
pub fn merge_recent(replies: Vec<Reply>, threads: Vec<Thread>, limit: usize) -> Vec<Post> {
    let mut posts: Vec<Post> = replies
        .into_iter()
        .map(Post::Reply)
        .chain(threads.into_iter().map(Post::Thread))
        .collect();
    posts.sort_by(|a, b| b.posted_at().cmp(&a.posted_at()));
    posts.truncate(limit);
    posts
}
