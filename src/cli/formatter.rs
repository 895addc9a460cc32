use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entity::{Category, Forum, LastPost, Post, PostStamp, Reply, Thread};
use crate::usecase::board::{CategoryOverview, ForumPage};
use crate::usecase::feed::SearchResults;
use crate::usecase::navigator::Breadcrumb;
use crate::usecase::thread::ThreadPage;

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn stamp_text(stamp: &PostStamp) -> String {
    format!("{} {}", timestamp(&stamp.at), stamp.actor_name)
}

fn last_post_text(last: Option<&LastPost>) -> String {
    match last {
        Some(last) => format!("{} ({})", stamp_text(&last.stamp), last.thread_title),
        None => "-".to_string(),
    }
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

pub fn format_categories_text(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| format!("{}\t{}", c.id, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_forum_line(forum: &Forum) -> String {
    let flag = if forum.announcement { " [告知]" } else { "" };
    format!(
        "  {}\t{}{}\tthreads={}\treplies={}\t{}",
        forum.id,
        forum.name,
        flag,
        forum.thread_count,
        forum.reply_count,
        last_post_text(forum.last_post.as_ref()),
    )
}

pub fn format_overview_text(overview: &[CategoryOverview]) -> String {
    let mut lines = Vec::new();
    for entry in overview {
        lines.push(format!("{}\t{}", entry.category.id, entry.category.name));
        lines.extend(entry.forums.iter().map(format_forum_line));
    }
    lines.join("\n")
}

fn format_breadcrumb(crumb: &Breadcrumb) -> String {
    let mut parts = vec![crumb.category.name.clone(), crumb.forum.name.clone()];
    if let Some((_, title)) = &crumb.thread {
        parts.push(title.clone());
    }
    parts.join(" > ")
}

fn format_thread_line(thread: &Thread) -> String {
    let mut marks = String::new();
    if thread.sticky {
        marks.push_str("[固定]");
    }
    if thread.is_closed() {
        marks.push_str("[クローズ]");
    }
    format!(
        "{}\t{}{}\treplies={}\tviews={}\t{}",
        thread.id,
        marks,
        thread.title,
        thread.reply_count,
        thread.view_count,
        stamp_text(&thread.last_post),
    )
}

pub fn format_forum_page_text(page: &ForumPage) -> String {
    let mut lines = vec![format!(
        "{}\t(page {}/{})",
        format_breadcrumb(&page.breadcrumb),
        page.page_index + 1,
        page.page_count
    )];
    lines.extend(page.threads.iter().map(format_thread_line));
    lines.join("\n")
}

fn format_reply_text(reply: &Reply) -> String {
    let edited = reply
        .edited
        .as_ref()
        .map(|e| format!(" (編集: {})", stamp_text(e)))
        .unwrap_or_default();
    format!("#{} [{}]{}\n{}", reply.id, stamp_text(&reply.posted), edited, reply.body)
}

pub fn format_replies_text(replies: &[Reply]) -> String {
    replies
        .iter()
        .map(format_reply_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_thread_page_text(page: &ThreadPage) -> String {
    let thread = &page.thread;
    let mut blocks = vec![
        format_breadcrumb(&page.breadcrumb),
        format!(
            "{}\t{}\t[{}]\t(page {}/{})",
            thread.id,
            thread.title,
            stamp_text(&thread.posted),
            page.page_index + 1,
            page.page_count
        ),
        thread.body.clone(),
    ];
    if let Some(closed) = &thread.closed {
        blocks.push(format!("クローズ: {}", stamp_text(closed)));
    }
    blocks.extend(page.replies.iter().map(format_reply_text));
    blocks.join("\n\n")
}

pub fn format_post_text(post: &Post) -> String {
    match post {
        Post::Thread(t) => format!(
            "[{}] thread {}\t{}\t{}",
            timestamp(&t.posted.at),
            t.id,
            t.posted.actor_name,
            t.title
        ),
        Post::Reply(r) => format!(
            "[{}] reply {}\t{}\tthread {}",
            timestamp(&r.posted.at),
            r.id,
            r.posted.actor_name,
            r.thread_id
        ),
    }
}

pub fn format_posts_text(posts: &[Post]) -> String {
    posts
        .iter()
        .map(format_post_text)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_search_text(results: &SearchResults) -> String {
    let mut lines = vec![format!("threads ({})", results.threads.len())];
    lines.extend(results.threads.iter().map(format_thread_line));
    lines.push(format!("replies ({})", results.replies.len()));
    lines.extend(
        results
            .replies
            .iter()
            .map(|r| format!("{}\tthread {}\t{}", r.id, r.thread_id, first_line(&r.body))),
    );
    lines.join("\n")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
