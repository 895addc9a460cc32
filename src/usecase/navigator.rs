use std::cell::RefCell;
use std::collections::HashMap;

use serde::Serialize;

use crate::domain::entity::{Category, Forum, Thread};
use crate::domain::error::DomainError;
use crate::domain::repository::{CategoryRepository, ForumRepository, Store};

/// Overview > category > forum > thread.
#[derive(Debug, Clone, Serialize)]
pub struct Breadcrumb {
    pub category: Category,
    pub forum: Forum,
    pub thread: Option<(i64, String)>,
}

/// Parent lookups memoized for the lifetime of one request.
/// Build a new navigator per request; nothing is shared across requests.
pub struct HierarchyNavigator<'s, S: Store> {
    store: &'s S,
    forums: RefCell<HashMap<i64, Forum>>,
    categories: RefCell<HashMap<i64, Category>>,
}

impl<'s, S: Store> HierarchyNavigator<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            forums: RefCell::new(HashMap::new()),
            categories: RefCell::new(HashMap::new()),
        }
    }

    pub fn forum(&self, forum_id: i64) -> Result<Forum, DomainError> {
        if let Some(forum) = self.forums.borrow().get(&forum_id) {
            return Ok(forum.clone());
        }
        let forum = self
            .store
            .forums()
            .find_by_id(forum_id)?
            .ok_or(DomainError::ForumNotFound(forum_id))?;
        self.forums.borrow_mut().insert(forum_id, forum.clone());
        Ok(forum)
    }

    pub fn parent_forum(&self, thread: &Thread) -> Result<Forum, DomainError> {
        self.forum(thread.forum_id)
    }

    pub fn parent_category(&self, forum: &Forum) -> Result<Category, DomainError> {
        if let Some(category) = self.categories.borrow().get(&forum.category_id) {
            return Ok(category.clone());
        }
        let category = self
            .store
            .categories()
            .find_by_id(forum.category_id)?
            .ok_or_else(|| DomainError::CategoryNotFound(forum.category_id.to_string()))?;
        self.categories
            .borrow_mut()
            .insert(category.id, category.clone());
        Ok(category)
    }

    pub fn forum_breadcrumb(&self, forum: &Forum) -> Result<Breadcrumb, DomainError> {
        Ok(Breadcrumb {
            category: self.parent_category(forum)?,
            forum: forum.clone(),
            thread: None,
        })
    }

    pub fn thread_breadcrumb(&self, thread: &Thread) -> Result<Breadcrumb, DomainError> {
        let forum = self.parent_forum(thread)?;
        Ok(Breadcrumb {
            category: self.parent_category(&forum)?,
            forum,
            thread: Some((thread.id, thread.title.clone())),
        })
    }
}
