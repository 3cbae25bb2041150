use chrono::{Days, NaiveDate};
use tracing::info;
use ulid::Ulid;

use super::accounts::check_text;
use super::{Engine, EngineError, Tables, Txn};
use crate::limits::{MAX_NAME_LEN, MAX_TEXT_LEN};
use crate::model::*;

/// Author shown for notices whose author is unknown or gone.
const BOARD_ADMIN_NAME: &str = "administrator";

impl Tables {
    pub fn announcement_view(&self, a: &Announcement) -> AnnouncementView {
        let author = a.author_account.as_deref().and_then(|account| self.user(account));
        AnnouncementView {
            id: a.id,
            title: a.title.clone(),
            content: a.content.clone(),
            start_date: a.start_date,
            end_date: a.end_date,
            created_at: a.created_at,
            author_name: author.map_or_else(|| BOARD_ADMIN_NAME.to_string(), |u| u.name.clone()),
            author_role: author.map_or(Role::Admin, |u| u.role),
            author_account: a.author_account.clone(),
        }
    }
}

impl Txn<'_> {
    fn post_announcement(
        &mut self,
        author: Option<&str>,
        title: &str,
        content: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Announcement, EngineError> {
        check_text("title", title, MAX_NAME_LEN)?;
        check_text("content", content, MAX_TEXT_LEN)?;
        if end_date < start_date {
            return Err(EngineError::Invalid("end date must not be before start date".into()));
        }
        let author = author.map(str::trim).filter(|a| !a.is_empty());
        if let Some(account) = author {
            self.user(account)?;
        }
        let announcement = Announcement {
            id: Ulid::new(),
            title: title.trim().to_string(),
            content: content.trim().to_string(),
            start_date,
            end_date,
            created_at: self.now(),
            author_account: author.map(str::to_string),
        };
        self.apply(Event::AnnouncementPosted {
            announcement: announcement.clone(),
        });
        Ok(announcement)
    }
}

impl Engine {
    /// Publish a dated notice. `author` is optional; without one the notice
    /// reads as coming from the administration.
    pub async fn add_announcement(
        &self,
        author: Option<&str>,
        title: &str,
        content: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Announcement, EngineError> {
        let posted = self
            .transact("add_announcement", |txn| {
                txn.post_announcement(author, title, content, start_date, end_date)
            })
            .await?;
        info!(announcement = %posted.id, author = ?posted.author_account, end = %posted.end_date, "announcement posted");
        Ok(posted)
    }

    /// A user's post: visible from today for `post_lifetime_days`.
    pub async fn add_post(&self, account: &str, title: &str, content: &str) -> Result<Announcement, EngineError> {
        if account.trim().is_empty() {
            return Err(EngineError::Invalid("account must not be empty".into()));
        }
        let lifetime = Days::new(self.config().post_lifetime_days);
        let posted = self
            .transact("add_post", |txn| {
                let today = txn.today();
                let end = today
                    .checked_add_days(lifetime)
                    .ok_or_else(|| EngineError::Invalid("post lifetime out of range".into()))?;
                txn.post_announcement(Some(account), title, content, today, end)
            })
            .await?;
        info!(announcement = %posted.id, %account, "post added");
        Ok(posted)
    }

    /// Notices that have not yet ended, newest first.
    pub async fn list_announcements(&self) -> Vec<AnnouncementView> {
        self.view(|tables, now| {
            let today = now.date();
            let mut current: Vec<&Announcement> = tables.announcements().filter(|a| a.is_current(today)).collect();
            current.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            current.into_iter().map(|a| tables.announcement_view(a)).collect()
        })
        .await
    }

    pub async fn delete_announcement(&self, id: Ulid) -> Result<(), EngineError> {
        self.transact("delete_announcement", |txn| {
            if txn.tables().announcement(&id).is_none() {
                return Err(EngineError::AnnouncementNotFound(id));
            }
            txn.apply(Event::AnnouncementDeleted { id });
            Ok(())
        })
        .await?;
        info!(announcement = %id, "announcement deleted");
        Ok(())
    }
}
