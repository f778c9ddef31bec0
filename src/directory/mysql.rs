use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{FromRow, MySqlPool};
use tracing::error;

use super::{Directory, DirectoryError};
use crate::model::attendance::EmployeeId;
use crate::model::employee::Employee;
use crate::model::role::Role;
use crate::model::user::User;

const DUPLICATE_KEY: &str = "23000";

#[derive(FromRow)]
struct UserSql {
    user_id: String,
    email: String,
    display_name: String,
    password_hash: String,
    role: String,
    is_active: bool,
}

impl TryFrom<UserSql> for User {
    type Error = DirectoryError;

    fn try_from(row: UserSql) -> Result<Self, Self::Error> {
        let role = Role::from_str(&row.role)
            .map_err(|_| DirectoryError::Unavailable(format!("unknown role {:?}", row.role)))?;
        Ok(User {
            user_id: row.user_id,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
        })
    }
}

fn unavailable(e: sqlx::Error) -> DirectoryError {
    DirectoryError::Unavailable(e.to_string())
}

pub struct MySqlDirectory {
    pool: MySqlPool,
}

impl MySqlDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let row = sqlx::query_as::<_, UserSql>(
            r#"
            SELECT user_id, email, display_name, password_hash, role, is_active
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Database error while fetching user");
            unavailable(e)
        })?;

        row.map(User::try_from).transpose()
    }

    async fn employee_id(&self, user_id: &str) -> Result<Option<EmployeeId>, DirectoryError> {
        let row = sqlx::query_scalar::<_, String>(
            r#"
            SELECT employee_id
            FROM employees
            WHERE user_id = ?
            AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, user_id, "Failed to look up employee");
            unavailable(e)
        })?;

        Ok(row.map(EmployeeId::new))
    }

    async fn create(&self, user: &User, employee: &Employee) -> Result<(), DirectoryError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (user_id, email, display_name, password_hash, role, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.role.as_ref())
        .bind(user.is_active)
        .bind(employee.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some(DUPLICATE_KEY) {
                    return Err(DirectoryError::EmailTaken);
                }
            }
            error!(error = %e, "Failed to insert user");
            return Err(unavailable(e));
        }

        sqlx::query(
            r#"
            INSERT INTO employees
            (user_id, employee_id, name, email, department, role, join_date, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&employee.user_id)
        .bind(employee.employee_id.as_str())
        .bind(&employee.name)
        .bind(&employee.email)
        .bind(&employee.department)
        .bind(employee.role.as_ref())
        .bind(employee.join_date)
        .bind(employee.is_active)
        .bind(employee.created_at)
        .bind(employee.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %employee.user_id, "Failed to insert employee");
            unavailable(e)
        })?;

        tx.commit().await.map_err(unavailable)
    }

    async fn touch_login(&self, user_id: &str) -> Result<(), DirectoryError> {
        sqlx::query("UPDATE users SET last_login_at = NOW(3) WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }

    async fn insert_refresh_token(
        &self,
        user_id: &str,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (jti, user_id, expires_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!(error = %e, "Failed to store refresh token");
            unavailable(e)
        })
    }

    async fn revoke_refresh_token(&self, jti: &str) -> Result<bool, DirectoryError> {
        // one statement, so two refreshes racing on the same token cannot both win
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE
            WHERE jti = ?
            AND revoked = FALSE
            AND expires_at > UTC_TIMESTAMP(3)
            "#,
        )
        .bind(jti)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected() == 1)
    }
}

impl Directory for MySqlDirectory {
    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> BoxFuture<'a, Result<Option<User>, DirectoryError>> {
        Box::pin(self.find_user(email))
    }

    fn employee_for_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<EmployeeId>, DirectoryError>> {
        Box::pin(self.employee_id(user_id))
    }

    fn create_identity<'a>(
        &'a self,
        user: &'a User,
        employee: &'a Employee,
    ) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(self.create(user, employee))
    }

    fn record_login<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(self.touch_login(user_id))
    }

    fn store_refresh_token<'a>(
        &'a self,
        user_id: &'a str,
        jti: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(self.insert_refresh_token(user_id, jti, expires_at))
    }

    fn consume_refresh_token<'a>(
        &'a self,
        jti: &'a str,
    ) -> BoxFuture<'a, Result<bool, DirectoryError>> {
        Box::pin(self.revoke_refresh_token(jti))
    }
}
