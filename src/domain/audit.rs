use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    AddCategory,
    AddForum,
    AddThread,
    EditThread,
    DeleteThread,
    CloseThread,
    ReopenThread,
    StickThread,
    UnstickThread,
    MoveThread,
    AddReply,
    EditReply,
    DeleteReply,
    RepairForum,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::AddCategory => "add-category",
            AuditAction::AddForum => "add-forum",
            AuditAction::AddThread => "add-thread",
            AuditAction::EditThread => "edit-thread",
            AuditAction::DeleteThread => "delete-thread",
            AuditAction::CloseThread => "close-thread",
            AuditAction::ReopenThread => "reopen-thread",
            AuditAction::StickThread => "stick-thread",
            AuditAction::UnstickThread => "unstick-thread",
            AuditAction::MoveThread => "move-thread",
            AuditAction::AddReply => "add-reply",
            AuditAction::EditReply => "edit-reply",
            AuditAction::DeleteReply => "delete-reply",
            AuditAction::RepairForum => "repair-forum",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor_id: i64,
    pub target_id: i64,
    pub summary: String,
}

const SUMMARY_CHARS: usize = 50;

impl AuditEvent {
    pub fn new(action: AuditAction, actor_id: i64, target_id: i64, text: &str) -> Self {
        Self {
            action,
            actor_id,
            target_id,
            summary: summarize(text),
        }
    }
}

/// First 50 characters of `text`, with an ellipsis when cut.
pub fn summarize(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let mut s: String = text.chars().take(SUMMARY_CHARS).collect();
    s.push('…');
    s
}

/// Receives events for mutations that have committed. Persisting them is the sink's job.
pub trait AuditSink {
    fn record(&self, event: &AuditEvent);
}
