pub mod aggregate;
pub mod board;
pub mod feed;
pub mod navigator;
pub mod reply;
pub mod thread;

#[cfg(test)]
pub(crate) mod testing;

use crate::domain::audit::{AuditAction, AuditEvent, AuditSink};
use crate::domain::clock::Clock;
use crate::domain::config::ForumConfig;
use crate::domain::entity::{is_illegal_title_char, normalize_title};
use crate::domain::error::{DomainError, ValidationError};
use crate::domain::identity::{AntiAbuseGate, GatedAction, Identity, Role};

/// Host-provided collaborators shared by every use case.
#[derive(Clone, Copy)]
pub struct ForumContext<'a> {
    pub config: &'a ForumConfig,
    pub clock: &'a dyn Clock,
    pub audit: &'a dyn AuditSink,
    pub gate: &'a dyn AntiAbuseGate,
}

impl<'a> ForumContext<'a> {
    pub(crate) fn audit(&self, action: AuditAction, who: &dyn Identity, target_id: i64, text: &str) {
        self.audit
            .record(&AuditEvent::new(action, who.author().id, target_id, text));
    }

    /// Anonymous posting and the anti-abuse gate, checked before any new post.
    pub(crate) fn check_can_post(
        &self,
        who: &dyn Identity,
        action: GatedAction,
    ) -> Result<(), DomainError> {
        if who.is_anonymous() && !self.config.allow_anonymous {
            return Err(DomainError::permission("匿名での投稿は許可されていません"));
        }
        if !self.gate.permits(who, action) {
            return Err(DomainError::permission("スパム対策の確認に失敗しました"));
        }
        Ok(())
    }
}

pub(crate) fn require_role(who: &dyn Identity, role: Role) -> Result<(), DomainError> {
    if who.has_role(role) {
        Ok(())
    } else {
        Err(DomainError::permission(format!("{} 権限が必要です", role)))
    }
}

pub(crate) fn require_signed_in(who: &dyn Identity) -> Result<(), DomainError> {
    if who.is_anonymous() {
        return Err(DomainError::permission("ログインが必要です"));
    }
    Ok(())
}

/// Trimmed, non-empty text.
pub(crate) fn non_empty<'t>(text: &'t str, field: &'static str) -> Result<&'t str, DomainError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field).into());
    }
    Ok(trimmed)
}

pub(crate) fn validate_title(title: &str) -> Result<&str, DomainError> {
    let title = non_empty(title, "title")?;
    if normalize_title(title).is_empty() {
        return Err(ValidationError::EmptyField("title").into());
    }
    if title.chars().any(is_illegal_title_char) {
        return Err(ValidationError::InvalidTitleChars(title.to_string()).into());
    }
    Ok(title)
}
