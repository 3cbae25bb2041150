use tracing::{info, warn};
use ulid::Ulid;

use super::{Engine, EngineError, Txn};
use crate::limits::{MAX_ACCOUNT_LEN, MAX_NAME_LEN, MAX_PASSWORD_LEN, MAX_PHONE_LEN};
use crate::model::*;
use crate::observability::LOGIN_FAILURES_TOTAL;

/// Reject blank or oversized free-text input.
pub(super) fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Invalid(format!("{field} must not be empty")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

pub(super) fn check_user_fields(user: &User) -> Result<(), EngineError> {
    check_text("account", &user.account, MAX_ACCOUNT_LEN)?;
    check_text("password", &user.password, MAX_PASSWORD_LEN)?;
    check_text("name", &user.name, MAX_NAME_LEN)?;
    if let Some(phone) = &user.phone {
        check_text("phone", phone, MAX_PHONE_LEN)?;
    }
    Ok(())
}

impl Txn<'_> {
    /// Remove a user: unlock their schedules, cancel whatever they still hold
    /// (freeing units for the waitlist), then delete the row. History rows stay.
    pub(super) fn purge_user(&mut self, account: &str) -> Result<(), EngineError> {
        self.user(account)?;

        let schedules: Vec<Ulid> = self
            .tables()
            .schedules()
            .filter(|s| s.teacher_account == account)
            .map(|s| s.id)
            .collect();
        for id in schedules {
            self.remove_schedule(account, id)?;
        }

        let active: Vec<Ulid> = self
            .tables()
            .reservations()
            .filter(|r| r.user_account == account && r.status.is_active())
            .map(|r| r.id)
            .collect();
        for id in active {
            self.cancel_reservation(id)?;
        }

        self.apply(Event::UserDeleted {
            account: account.to_string(),
        });
        Ok(())
    }
}

impl Engine {
    pub async fn register_user(
        &self,
        account: &str,
        password: &str,
        name: &str,
        role: Role,
        phone: Option<&str>,
    ) -> Result<UserInfo, EngineError> {
        let initial_credit = self.config().initial_credit;
        let info = self
            .transact("register_user", |txn| {
                let user = User {
                    account: account.trim().to_string(),
                    password: password.to_string(),
                    name: name.trim().to_string(),
                    phone: phone.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string),
                    role,
                    credit_score: initial_credit,
                    created_at: txn.now(),
                };
                check_user_fields(&user)?;
                if txn.tables().user(&user.account).is_some() {
                    return Err(EngineError::AccountExists(user.account));
                }
                let info = UserInfo::from(&user);
                txn.apply(Event::UserRegistered { user });
                Ok(info)
            })
            .await?;
        info!(account = %info.account, role = %info.role, "user registered");
        Ok(info)
    }

    /// Plain credential check.
    pub async fn login(&self, account: &str, password: &str) -> Result<UserInfo, EngineError> {
        let result = self
            .view(|tables, _| {
                tables
                    .user(account)
                    .filter(|u| u.password == password)
                    .map(UserInfo::from)
                    .ok_or(EngineError::InvalidCredentials)
            })
            .await;
        if result.is_err() {
            metrics::counter!(LOGIN_FAILURES_TOTAL).increment(1);
            warn!(%account, "login failed");
        }
        result
    }

    /// Self-service account removal, confirmed by password.
    pub async fn delete_account(&self, account: &str, password: &str) -> Result<(), EngineError> {
        self.transact("delete_account", |txn| {
            let user = txn.user(account).map_err(|_| EngineError::InvalidCredentials)?;
            if user.password != password {
                return Err(EngineError::InvalidCredentials);
            }
            txn.purge_user(account)
        })
        .await?;
        info!(%account, "account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_checks() {
        assert!(check_text("name", "Ann", 8).is_ok());
        assert!(matches!(check_text("name", "   ", 8), Err(EngineError::Invalid(_))));
        assert!(matches!(
            check_text("name", "much too long", 8),
            Err(EngineError::LimitExceeded("name"))
        ));
    }
}
