use clap::{Args, Parser, Subcommand};

use crate::domain::identity::{Caller, Role};
use crate::domain::pagination::PageRequest;

#[derive(Parser)]
#[command(name = "wikiforum", about = "category・forum・thread・reply からなる掲示板")]
pub struct Cli {
    #[command(flatten)]
    pub caller: CallerArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Who is running the command. Without `--user-id` the caller is anonymous.
#[derive(Args)]
pub struct CallerArgs {
    /// 操作するユーザーの ID（省略時は匿名）
    #[arg(long, global = true)]
    pub user_id: Option<i64>,
    /// 表示名
    #[arg(long, global = true)]
    pub user: Option<String>,
    /// 匿名投稿時に記録される IP アドレス
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub ip: String,
    /// 付与する権限（moderator, admin）。複数指定可
    #[arg(long = "role", global = true)]
    pub roles: Vec<Role>,
}

impl CallerArgs {
    pub fn caller(&self) -> Caller {
        match self.user_id.filter(|id| *id > 0) {
            Some(id) => {
                let name = self.user.clone().unwrap_or_else(|| format!("user-{}", id));
                let mut caller = Caller::user(id, &name);
                caller.ip = self.ip.clone();
                self.roles
                    .iter()
                    .fold(caller, |caller, role| caller.with_role(*role))
            }
            None => Caller::anonymous(&self.ip),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// category の管理
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// forum の管理と閲覧
    Forum {
        #[command(subcommand)]
        action: ForumAction,
    },
    /// thread の投稿・閲覧・管理
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// reply の投稿・一覧・編集・削除
    Reply {
        #[command(subcommand)]
        action: ReplyAction,
    },
    /// 最近の投稿を表示する
    Recent {
        /// category ID で絞り込む（複数指定可）
        #[arg(long = "category-id")]
        category_ids: Vec<i64>,
        /// category 名で絞り込む（複数指定可）
        #[arg(long = "category")]
        categories: Vec<String>,
        /// forum ID で絞り込む（複数指定可）
        #[arg(long = "forum")]
        forums: Vec<i64>,
        /// 投稿者のユーザー ID で絞り込む
        #[arg(long)]
        author: Option<i64>,
        /// 最大件数（省略時は設定値）
        #[arg(long)]
        limit: Option<usize>,
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// thread と reply を全文検索する
    Search {
        /// 検索クエリ（2 文字以上）
        query: String,
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum CategoryAction {
    /// category を作成する（admin）
    Add {
        /// category 名
        name: String,
        /// 並び順
        #[arg(long, default_value_t = 0)]
        sort: i64,
    },
    /// category を一覧表示する
    List {
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ForumAction {
    /// forum を作成する（admin）
    Add {
        /// forum 名
        name: String,
        /// 所属する category の ID
        #[arg(long)]
        category: i64,
        /// 説明文
        #[arg(long, default_value = "")]
        description: String,
        /// 並び順
        #[arg(long, default_value_t = 0)]
        sort: i64,
        /// moderator のみ thread を作成できる告知用 forum にする
        #[arg(long)]
        announcement: bool,
    },
    /// 全 category と forum を一覧表示する
    List {
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// forum の thread 一覧を表示する
    Show {
        /// forum ID
        id: i64,
        /// ページ番号（1 始まり）または latest
        #[arg(long)]
        page: Option<PageRequest>,
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// forum の件数と最終投稿を再計算する（admin）
    Repair {
        /// forum ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ThreadAction {
    /// 新しい thread を作成する
    Create {
        /// thread のタイトル
        title: String,
        /// 投稿先 forum の ID
        #[arg(long)]
        forum: i64,
        /// 本文（省略時は stdin から読み取り）
        #[arg(long)]
        body: Option<String>,
    },
    /// thread と reply を表示する
    Show {
        /// thread ID またはタイトル
        thread: String,
        /// 引数を ID ではなくタイトルとして扱う
        #[arg(long)]
        by_title: bool,
        /// ページ番号（1 始まり）または latest
        #[arg(long)]
        page: Option<PageRequest>,
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// thread のタイトルまたは本文を編集する
    Edit {
        /// thread ID
        id: i64,
        /// 新しいタイトル
        #[arg(long)]
        title: Option<String>,
        /// 新しい本文
        #[arg(long)]
        body: Option<String>,
    },
    /// thread とその reply を削除する
    Delete {
        /// thread ID
        id: i64,
    },
    /// thread をクローズする（moderator）
    Close {
        /// thread ID
        id: i64,
    },
    /// クローズした thread を再開する（moderator）
    Reopen {
        /// thread ID
        id: i64,
    },
    /// thread を上部に固定する（admin）
    Sticky {
        /// thread ID
        id: i64,
        /// 固定を解除する
        #[arg(long)]
        off: bool,
    },
    /// thread を別の forum に移動する（moderator）
    Move {
        /// thread ID
        id: i64,
        /// 移動先 forum の ID
        #[arg(long)]
        forum: i64,
        /// 移動と同時にタイトルを変更する
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReplyAction {
    /// thread に reply を投稿する
    Post {
        /// thread ID
        #[arg(long)]
        thread: i64,
        /// 本文（省略時は stdin から読み取り）
        #[arg(long)]
        body: Option<String>,
    },
    /// thread の reply を古い順に表示する
    List {
        /// thread ID
        #[arg(long)]
        thread: i64,
        /// ページ番号（1 始まり）または latest
        #[arg(long)]
        page: Option<PageRequest>,
        /// 出力形式（text, json）
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// reply の本文を編集する
    Edit {
        /// reply ID
        id: i64,
        /// 新しい本文
        #[arg(long)]
        body: String,
    },
    /// reply を削除する
    Delete {
        /// reply ID
        id: i64,
    },
}
