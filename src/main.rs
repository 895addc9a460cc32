mod cli;
mod domain;
mod infra;
mod usecase;

use clap::Parser;
use cli::args::{Cli, Commands};
use cli::handler;
use domain::clock::SystemClock;
use domain::error::DomainError;
use domain::identity::OpenGate;
use infra::audit::JsonlAuditSink;
use infra::sqlite::{Database, SqliteStore};
use infra::{config, logger};
use usecase::board::BoardUseCase;
use usecase::feed::FeedUseCase;
use usecase::reply::ReplyUseCase;
use usecase::thread::ThreadUseCase;
use usecase::ForumContext;

fn main() {
    logger::init_tracing();
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let (exit_code, user_msg) = classify_error(&e);
            logger::log_error(&format!("{:#}", e));
            eprintln!("エラー: {}", user_msg);
            std::process::exit(exit_code);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = logger::data_dir()?;
    let forum_config = config::load(&data_dir)?;
    let db = Database::open(&data_dir.join("wikiforum.db"))?;
    let store = SqliteStore::new(db.connection());

    let clock = SystemClock;
    let audit = JsonlAuditSink::new(&data_dir);
    let gate = OpenGate;
    let ctx = ForumContext {
        config: &forum_config,
        clock: &clock,
        audit: &audit,
        gate: &gate,
    };
    let caller = cli.caller.caller();

    match cli.command {
        Commands::Category { action } => {
            handler::handle_category(action, &BoardUseCase::new(&store, ctx), &caller)?;
        }
        Commands::Forum { action } => {
            handler::handle_forum(action, &BoardUseCase::new(&store, ctx), &caller)?;
        }
        Commands::Thread { action } => {
            handler::handle_thread(action, &ThreadUseCase::new(&store, ctx), &caller)?;
        }
        Commands::Reply { action } => {
            handler::handle_reply(action, &ReplyUseCase::new(&store, ctx), &caller)?;
        }
        Commands::Recent {
            category_ids,
            categories,
            forums,
            author,
            limit,
            format,
        } => {
            let query = handler::recent_query(category_ids, categories, forums, author, limit);
            handler::handle_recent(query, &format, &FeedUseCase::new(&store, ctx))?;
        }
        Commands::Search { query, format } => {
            handler::handle_search(&query, &format, &FeedUseCase::new(&store, ctx))?;
        }
    }

    Ok(())
}

fn classify_error(e: &anyhow::Error) -> (i32, String) {
    if let Some(domain_err) = e.downcast_ref::<DomainError>() {
        (domain_err.exit_code(), domain_err.to_string())
    } else {
        (1, e.to_string())
    }
}
