use std::io::Read;

use anyhow::{bail, Context};

use crate::cli::args::*;
use crate::cli::formatter;
use crate::domain::entity::{NewForum, PostFilter};
use crate::domain::identity::Caller;
use crate::domain::repository::Store;
use crate::usecase::board::BoardUseCase;
use crate::usecase::feed::{FeedUseCase, RecentPostsQuery};
use crate::usecase::reply::ReplyUseCase;
use crate::usecase::thread::{ThreadRef, ThreadUseCase};

const MAX_BODY_SIZE: usize = 1_048_576; // 1MB

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = Vec::new();
    let bytes_read = std::io::stdin()
        .take(MAX_BODY_SIZE as u64 + 1)
        .read_to_end(&mut buf)
        .context("stdin からの読み取りに失敗しました")?;

    if bytes_read > MAX_BODY_SIZE {
        bail!("入力が 1MB の上限を超えています（{} バイト）", bytes_read);
    }

    if buf.iter().any(|&b| b == 0) {
        bail!("入力に NUL バイトが含まれています");
    }

    String::from_utf8(buf).context("入力が有効な UTF-8 ではありません")
}

fn validate_body(body: &str) -> anyhow::Result<()> {
    if body.len() > MAX_BODY_SIZE {
        bail!("本文が 1MB の上限を超えています（{} バイト）", body.len());
    }
    if body.bytes().any(|b| b == 0) {
        bail!("本文に NUL バイトが含まれています");
    }
    Ok(())
}

fn body_or_stdin(body: Option<String>) -> anyhow::Result<String> {
    let body = match body {
        Some(b) => b,
        None => read_stdin()?,
    };
    validate_body(&body)?;
    Ok(body)
}

pub fn handle_category<S: Store>(
    action: CategoryAction,
    board_uc: &BoardUseCase<S>,
    caller: &Caller,
) -> anyhow::Result<()> {
    match action {
        CategoryAction::Add { name, sort } => {
            let category = board_uc.create_category(caller, &name, sort)?;
            println!("{}", category.id);
        }
        CategoryAction::List { format } => {
            let categories = board_uc.list_categories()?;
            match format.as_str() {
                "json" => println!("{}", formatter::to_json(&categories)),
                _ => println!("{}", formatter::format_categories_text(&categories)),
            }
        }
    }
    Ok(())
}

pub fn handle_forum<S: Store>(
    action: ForumAction,
    board_uc: &BoardUseCase<S>,
    caller: &Caller,
) -> anyhow::Result<()> {
    match action {
        ForumAction::Add {
            name,
            category,
            description,
            sort,
            announcement,
        } => {
            let forum = board_uc.create_forum(
                caller,
                NewForum {
                    category_id: category,
                    name,
                    description,
                    sort_key: sort,
                    announcement,
                },
            )?;
            println!("{}", forum.id);
        }
        ForumAction::List { format } => {
            let overview = board_uc.overview()?;
            match format.as_str() {
                "json" => println!("{}", formatter::to_json(&overview)),
                _ => println!("{}", formatter::format_overview_text(&overview)),
            }
        }
        ForumAction::Show { id, page, format } => {
            let forum_page = board_uc.forum_page(id, page)?;
            match format.as_str() {
                "json" => println!("{}", formatter::to_json(&forum_page)),
                _ => println!("{}", formatter::format_forum_page_text(&forum_page)),
            }
        }
        ForumAction::Repair { id } => {
            let forum = board_uc.repair_forum(caller, id)?;
            eprintln!(
                "forum {} を再計算しました（thread {} 件、reply {} 件）",
                forum.id, forum.thread_count, forum.reply_count
            );
        }
    }
    Ok(())
}

pub fn handle_thread<S: Store>(
    action: ThreadAction,
    thread_uc: &ThreadUseCase<S>,
    caller: &Caller,
) -> anyhow::Result<()> {
    match action {
        ThreadAction::Create { title, forum, body } => {
            let body = body_or_stdin(body)?;
            let thread = thread_uc.create(caller, forum, &title, &body)?;
            println!("{}", thread.id);
        }
        ThreadAction::Show {
            thread,
            by_title,
            page,
            format,
        } => {
            let target = match thread.parse::<i64>() {
                Ok(id) if !by_title => ThreadRef::Id(id),
                _ => ThreadRef::Title(thread),
            };
            let thread_page = thread_uc.view(&target, page)?;
            match format.as_str() {
                "json" => println!("{}", formatter::to_json(&thread_page)),
                _ => println!("{}", formatter::format_thread_page_text(&thread_page)),
            }
        }
        ThreadAction::Edit { id, title, body } => {
            if title.is_none() && body.is_none() {
                bail!("--title か --body のいずれかを指定してください");
            }
            if let Some(b) = &body {
                validate_body(b)?;
            }
            let thread = thread_uc.edit(caller, id, title.as_deref(), body.as_deref())?;
            println!("{}", thread.id);
        }
        ThreadAction::Delete { id } => {
            let (thread, removed) = thread_uc.delete(caller, id)?;
            eprintln!("thread {} と reply {} 件を削除しました", thread.id, removed);
        }
        ThreadAction::Close { id } => {
            thread_uc.close(caller, id)?;
            eprintln!("thread {} をクローズしました", id);
        }
        ThreadAction::Reopen { id } => {
            thread_uc.reopen(caller, id)?;
            eprintln!("thread {} を再開しました", id);
        }
        ThreadAction::Sticky { id, off } => {
            thread_uc.set_sticky(caller, id, !off)?;
            if off {
                eprintln!("thread {} の固定を解除しました", id);
            } else {
                eprintln!("thread {} を固定しました", id);
            }
        }
        ThreadAction::Move { id, forum, title } => {
            let thread = thread_uc.move_to(caller, id, forum, title.as_deref())?;
            eprintln!("thread {} を forum {} に移動しました", thread.id, thread.forum_id);
        }
    }
    Ok(())
}

pub fn handle_reply<S: Store>(
    action: ReplyAction,
    reply_uc: &ReplyUseCase<S>,
    caller: &Caller,
) -> anyhow::Result<()> {
    match action {
        ReplyAction::Post { thread, body } => {
            let body = body_or_stdin(body)?;
            let reply = reply_uc.create(caller, thread, &body)?;
            println!("{}", reply.id);
        }
        ReplyAction::List {
            thread,
            page,
            format,
        } => {
            let replies = reply_uc.list_for_thread(thread, page)?;
            match format.as_str() {
                "json" => println!("{}", formatter::to_json(&replies)),
                _ => println!("{}", formatter::format_replies_text(&replies)),
            }
        }
        ReplyAction::Edit { id, body } => {
            validate_body(&body)?;
            let reply = reply_uc.edit(caller, id, &body)?;
            println!("{}", reply.id);
        }
        ReplyAction::Delete { id } => {
            reply_uc.delete(caller, id)?;
            eprintln!("reply {} を削除しました", id);
        }
    }
    Ok(())
}

pub fn handle_recent<S: Store>(
    query: RecentPostsQuery,
    format: &str,
    feed_uc: &FeedUseCase<S>,
) -> anyhow::Result<()> {
    let posts = feed_uc.recent_posts(&query)?;
    match format {
        "json" => println!("{}", formatter::to_json(&posts)),
        _ => println!("{}", formatter::format_posts_text(&posts)),
    }
    Ok(())
}

pub fn handle_search<S: Store>(
    query: &str,
    format: &str,
    feed_uc: &FeedUseCase<S>,
) -> anyhow::Result<()> {
    let results = feed_uc.search(query)?;
    match format {
        "json" => println!("{}", formatter::to_json(&results)),
        _ => println!("{}", formatter::format_search_text(&results)),
    }
    Ok(())
}

/// Builds the recent-posts query from the `recent` flags.
pub fn recent_query(
    category_ids: Vec<i64>,
    category_names: Vec<String>,
    forum_ids: Vec<i64>,
    author: Option<i64>,
    limit: Option<usize>,
) -> RecentPostsQuery {
    RecentPostsQuery {
        filter: PostFilter {
            category_ids,
            forum_ids,
            actor_id: author,
        },
        category_names,
        limit,
    }
}
