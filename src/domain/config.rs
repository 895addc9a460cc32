use serde::Deserialize;

/// Forum-wide settings, handed to the use cases at construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForumConfig {
    /// Let callers without an account start threads and reply.
    pub allow_anonymous: bool,
    /// Replies per thread page; 0 shows all replies on one page.
    pub max_replies_per_page: usize,
    /// Threads per forum page and hits per search section; 0 disables the cap.
    pub max_threads_per_page: usize,
    pub recent_posts_limit: usize,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            max_replies_per_page: 10,
            max_threads_per_page: 20,
            recent_posts_limit: 10,
        }
    }
}
