use serde::Serialize;

use crate::domain::audit::AuditAction;
use crate::domain::entity::{Category, Forum, NewForum, Thread};
use crate::domain::error::DomainError;
use crate::domain::identity::{Identity, Role};
use crate::domain::pagination::{compute_window, page_count, PageRequest};
use crate::domain::repository::{CategoryRepository, ForumRepository, Store, ThreadRepository};
use crate::usecase::aggregate::AggregateUpdater;
use crate::usecase::navigator::{Breadcrumb, HierarchyNavigator};
use crate::usecase::{non_empty, require_role, ForumContext};

#[derive(Debug, Serialize)]
pub struct CategoryOverview {
    pub category: Category,
    pub forums: Vec<Forum>,
}

#[derive(Debug, Serialize)]
pub struct ForumPage {
    pub breadcrumb: Breadcrumb,
    pub threads: Vec<Thread>,
    pub page_index: usize,
    pub page_count: usize,
}

/// Categories and forums: the levels above threads.
pub struct BoardUseCase<'a, S: Store> {
    pub(crate) store: &'a S,
    pub(crate) ctx: ForumContext<'a>,
}

impl<'a, S: Store> BoardUseCase<'a, S> {
    pub fn new(store: &'a S, ctx: ForumContext<'a>) -> Self {
        Self { store, ctx }
    }

    pub fn create_category(
        &self,
        who: &dyn Identity,
        name: &str,
        sort_key: i64,
    ) -> Result<Category, DomainError> {
        require_role(who, Role::Admin)?;
        let name = non_empty(name, "name")?;

        let category = self.store.atomically(|| {
            let id = self.store.categories().create(name, sort_key)?;
            self.store
                .categories()
                .find_by_id(id)?
                .ok_or_else(|| DomainError::CategoryNotFound(id.to_string()))
        })?;

        self.ctx.audit(AuditAction::AddCategory, who, category.id, &category.name);
        Ok(category)
    }

    pub fn create_forum(&self, who: &dyn Identity, forum: NewForum) -> Result<Forum, DomainError> {
        require_role(who, Role::Admin)?;
        let name = non_empty(&forum.name, "name")?.to_string();
        let forum = NewForum { name, ..forum };

        let created = self.store.atomically(|| {
            self.store
                .categories()
                .find_by_id(forum.category_id)?
                .ok_or_else(|| DomainError::CategoryNotFound(forum.category_id.to_string()))?;
            let id = self.store.forums().create(&forum)?;
            self.store
                .forums()
                .find_by_id(id)?
                .ok_or(DomainError::ForumNotFound(id))
        })?;

        self.ctx.audit(AuditAction::AddForum, who, created.id, &created.name);
        Ok(created)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>, DomainError> {
        self.store.categories().list()
    }

    /// Every category with its forums, both ordered by sort key then id.
    pub fn overview(&self) -> Result<Vec<CategoryOverview>, DomainError> {
        self.store
            .categories()
            .list()?
            .into_iter()
            .map(|category| {
                let forums = self.store.forums().list_by_category(category.id)?;
                Ok(CategoryOverview { category, forums })
            })
            .collect()
    }

    pub fn forum_page(&self, forum_id: i64, page: Option<PageRequest>) -> Result<ForumPage, DomainError> {
        let navigator = HierarchyNavigator::new(self.store);
        let forum = navigator.forum(forum_id)?;
        let breadcrumb = navigator.forum_breadcrumb(&forum)?;

        let page_size = self.ctx.config.max_threads_per_page;
        let total = self.store.threads().count_by_forum(forum_id)? as usize;
        let window = compute_window(total, page_size, page);
        let threads = self.store.threads().list_by_forum(forum_id, window)?;

        Ok(ForumPage {
            breadcrumb,
            threads,
            page_index: window.limit.map_or(0, |size| window.offset / size),
            page_count: page_count(total, page_size),
        })
    }

    /// Recomputes the forum's counters from its rows.
    pub fn repair_forum(&self, who: &dyn Identity, forum_id: i64) -> Result<Forum, DomainError> {
        require_role(who, Role::Admin)?;

        let forum = self.store.atomically(|| {
            self.store
                .forums()
                .find_by_id(forum_id)?
                .ok_or(DomainError::ForumNotFound(forum_id))?;
            AggregateUpdater::new(self.store).recount_forum(forum_id)?;
            self.store
                .forums()
                .find_by_id(forum_id)?
                .ok_or(DomainError::ForumNotFound(forum_id))
        })?;

        self.ctx.audit(AuditAction::RepairForum, who, forum.id, &forum.name);
        Ok(forum)
    }
}
