use thiserror::Error;

/// Input problems detected before any mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} が空です")]
    EmptyField(&'static str),

    #[error("タイトル '{0}' の thread は既に存在します")]
    DuplicateTitle(String),

    #[error("タイトル '{0}' に使用できない文字が含まれています")]
    InvalidTitleChars(String),

    #[error("検索クエリは 2 文字以上必要です")]
    QueryTooShort,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("入力が不正です: {0}")]
    Validation(#[from] ValidationError),

    #[error("権限がありません: {0}")]
    Permission(String),

    #[error("category が見つかりません: {0}")]
    CategoryNotFound(String),

    #[error("forum が見つかりません: {0}")]
    ForumNotFound(i64),

    #[error("thread が見つかりません: {0}")]
    ThreadNotFound(String),

    #[error("reply が見つかりません: {0}")]
    ReplyNotFound(i64),

    #[error("thread {0} はクローズされています")]
    ThreadClosed(i64),

    #[error("データベースエラー: {0}")]
    Database(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("I/O エラー: {0}")]
    Io(String),
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    State,
    Storage,
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) | DomainError::Config(_) => ErrorKind::Validation,
            DomainError::Permission(_) => ErrorKind::Permission,
            DomainError::CategoryNotFound(_)
            | DomainError::ForumNotFound(_)
            | DomainError::ThreadNotFound(_)
            | DomainError::ReplyNotFound(_) => ErrorKind::NotFound,
            DomainError::ThreadClosed(_) => ErrorKind::State,
            DomainError::Database(_) | DomainError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Returns the appropriate exit code for this error.
    /// 0 = success, 1 = general error, 2 = input error, 3 = permission error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::Permission => 3,
            _ => 1,
        }
    }

    pub(crate) fn permission(msg: impl Into<String>) -> Self {
        DomainError::Permission(msg.into())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(e: std::io::Error) -> Self {
        DomainError::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(e: rusqlite::Error) -> Self {
        DomainError::Database(e.to_string())
    }
}
