//! Login identities, employee records and refresh tokens.

pub mod memory;
pub mod mysql;
pub mod provision;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_more::Display;
use futures::future::BoxFuture;
use moka::future::Cache;
use tracing::debug;

use crate::model::attendance::EmployeeId;
use crate::model::employee::Employee;
use crate::model::user::User;

pub use memory::MemoryDirectory;
pub use mysql::MySqlDirectory;

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DirectoryError {
    #[display(fmt = "Email already registered")]
    EmailTaken,
    #[display(fmt = "directory unavailable: {}", _0)]
    Unavailable(String),
}

impl std::error::Error for DirectoryError {}

pub trait Directory: Send + Sync {
    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> BoxFuture<'a, Result<Option<User>, DirectoryError>>;

    fn employee_for_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<EmployeeId>, DirectoryError>>;

    /// Create the login identity and its employee record together.
    fn create_identity<'a>(
        &'a self,
        user: &'a User,
        employee: &'a Employee,
    ) -> BoxFuture<'a, Result<(), DirectoryError>>;

    fn record_login<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), DirectoryError>>;

    fn store_refresh_token<'a>(
        &'a self,
        user_id: &'a str,
        jti: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), DirectoryError>>;

    /// Revoke a live, unexpired refresh token. `false` if it was unknown,
    /// expired or already revoked.
    fn consume_refresh_token<'a>(
        &'a self,
        jti: &'a str,
    ) -> BoxFuture<'a, Result<bool, DirectoryError>>;
}

/// Directory front with an in-process cache of `user id -> employee id`.
#[derive(Clone)]
pub struct EmployeeDirectory {
    inner: Arc<dyn Directory>,
    employee_ids: Cache<String, EmployeeId>,
}

impl EmployeeDirectory {
    pub fn new(inner: Arc<dyn Directory>, ttl: Duration) -> Self {
        Self {
            inner,
            employee_ids: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn store(&self) -> &dyn Directory {
        self.inner.as_ref()
    }

    /// Employee linked to a session identity, if any.
    pub async fn employee_id_for(&self, user_id: &str) -> Result<Option<EmployeeId>, DirectoryError> {
        if let Some(hit) = self.employee_ids.get(user_id).await {
            return Ok(Some(hit));
        }

        let found = self.inner.employee_for_user(user_id).await?;
        if let Some(employee_id) = &found {
            debug!(user_id, employee_id = %employee_id, "Caching employee lookup");
            self.employee_ids
                .insert(user_id.to_string(), employee_id.clone())
                .await;
        }
        Ok(found)
    }

    /// Prime the lookup cache right after provisioning.
    pub async fn remember(&self, user_id: &str, employee_id: &EmployeeId) {
        self.employee_ids
            .insert(user_id.to_string(), employee_id.clone())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use chrono::NaiveDate;

    fn identity(user_id: &str, email: &str, employee_id: &str) -> (User, Employee) {
        let now = Utc::now();
        let user = User {
            user_id: user_id.into(),
            email: email.into(),
            display_name: "Jane".into(),
            password_hash: "hash".into(),
            role: Role::Employee,
            is_active: true,
        };
        let employee = Employee {
            user_id: user_id.into(),
            employee_id: EmployeeId::new(employee_id),
            name: "Jane".into(),
            email: email.into(),
            department: "Ops".into(),
            role: Role::Employee,
            join_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        (user, employee)
    }

    #[tokio::test]
    async fn lookup_is_served_from_cache_after_first_hit() {
        let backing = Arc::new(MemoryDirectory::new());
        let (user, employee) = identity("u1", "jane@company.com", "EMP-AAAA1111");
        backing.create_identity(&user, &employee).await.unwrap();

        let directory = EmployeeDirectory::new(backing.clone(), Duration::from_secs(60));
        assert_eq!(
            directory.employee_id_for("u1").await.unwrap(),
            Some(EmployeeId::new("EMP-AAAA1111"))
        );
        assert_eq!(backing.lookups(), 1);

        directory.employee_id_for("u1").await.unwrap();
        assert_eq!(backing.lookups(), 1);
    }

    #[tokio::test]
    async fn unknown_users_are_not_cached() {
        let backing = Arc::new(MemoryDirectory::new());
        let directory = EmployeeDirectory::new(backing.clone(), Duration::from_secs(60));

        assert_eq!(directory.employee_id_for("ghost").await.unwrap(), None);
        assert_eq!(directory.employee_id_for("ghost").await.unwrap(), None);
        assert_eq!(backing.lookups(), 2);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let backing = MemoryDirectory::new();
        let (user, employee) = identity("u1", "jane@company.com", "EMP-AAAA1111");
        backing.create_identity(&user, &employee).await.unwrap();

        let (again, again_employee) = identity("u2", "jane@company.com", "EMP-BBBB2222");
        assert_eq!(
            backing.create_identity(&again, &again_employee).await,
            Err(DirectoryError::EmailTaken)
        );
        assert!(backing.employee_for_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let backing = MemoryDirectory::new();
        let later = Utc::now() + chrono::Duration::hours(1);
        backing.store_refresh_token("u1", "jti-1", later).await.unwrap();

        assert!(backing.consume_refresh_token("jti-1").await.unwrap());
        assert!(!backing.consume_refresh_token("jti-1").await.unwrap());
        assert!(!backing.consume_refresh_token("unknown").await.unwrap());

        let earlier = Utc::now() - chrono::Duration::seconds(1);
        backing.store_refresh_token("u1", "jti-2", earlier).await.unwrap();
        assert!(!backing.consume_refresh_token("jti-2").await.unwrap());
    }
}
