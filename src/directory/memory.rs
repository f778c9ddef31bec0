use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};

use super::{Directory, DirectoryError};
use crate::model::attendance::EmployeeId;
use crate::model::employee::Employee;
use crate::model::user::User;

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    user_by_email: HashMap<String, String>,
    employees: HashMap<String, Employee>,
    /// Live refresh tokens only, by jti, with their expiry.
    refresh_tokens: HashMap<String, DateTime<Utc>>,
}

/// Process-local directory used by the `memory` backend and in tests.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    employee_lookups: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DirectoryError> {
        self.state
            .lock()
            .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".into()))
    }

    /// How many times the employee lookup reached this backend.
    pub fn lookups(&self) -> usize {
        self.employee_lookups.load(Ordering::Relaxed)
    }

    fn create_now(&self, user: &User, employee: &Employee) -> Result<(), DirectoryError> {
        let mut state = self.lock()?;
        if state.user_by_email.contains_key(&user.email) {
            return Err(DirectoryError::EmailTaken);
        }
        state
            .user_by_email
            .insert(user.email.clone(), user.user_id.clone());
        state.users.insert(user.user_id.clone(), user.clone());
        state
            .employees
            .insert(employee.user_id.clone(), employee.clone());
        Ok(())
    }

    fn consume_now(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, DirectoryError> {
        let mut state = self.lock()?;
        // used and expired tokens can never be valid again
        state.refresh_tokens.retain(|_, expires_at| *expires_at > now);
        Ok(state.refresh_tokens.remove(jti).is_some())
    }

    #[cfg(test)]
    pub fn refresh_token_count(&self) -> usize {
        self.lock().map(|s| s.refresh_tokens.len()).unwrap_or(0)
    }
}

impl Directory for MemoryDirectory {
    fn find_user_by_email<'a>(
        &'a self,
        email: &'a str,
    ) -> BoxFuture<'a, Result<Option<User>, DirectoryError>> {
        let found = self.lock().map(|state| {
            state
                .user_by_email
                .get(email)
                .and_then(|id| state.users.get(id))
                .cloned()
        });
        Box::pin(future::ready(found))
    }

    fn employee_for_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<EmployeeId>, DirectoryError>> {
        self.employee_lookups.fetch_add(1, Ordering::Relaxed);
        let found = self.lock().map(|state| {
            state
                .employees
                .get(user_id)
                .filter(|e| e.is_active)
                .map(|e| e.employee_id.clone())
        });
        Box::pin(future::ready(found))
    }

    fn create_identity<'a>(
        &'a self,
        user: &'a User,
        employee: &'a Employee,
    ) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(future::ready(self.create_now(user, employee)))
    }

    fn record_login<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<(), DirectoryError>> {
        Box::pin(future::ready(Ok(())))
    }

    fn store_refresh_token<'a>(
        &'a self,
        _user_id: &'a str,
        jti: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<(), DirectoryError>> {
        let stored = self.lock().map(|mut state| {
            state.refresh_tokens.insert(jti.to_string(), expires_at);
        });
        Box::pin(future::ready(stored))
    }

    fn consume_refresh_token<'a>(
        &'a self,
        jti: &'a str,
    ) -> BoxFuture<'a, Result<bool, DirectoryError>> {
        Box::pin(future::ready(self.consume_now(jti, Utc::now())))
    }
}
