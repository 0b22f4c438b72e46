//! [`IdentityProvider`] kept in process memory, with switchable failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{
    AuthError, ERR_AUTH_INVALID, ERR_AUTH_REJECTED, ERR_AUTH_UNAVAILABLE, IdentityProvider,
    IdentityUser, SessionTokens, SignIn,
};

#[derive(Debug, Clone)]
struct Account {
    id: String,
    email: String,
    password: String,
    full_name: String,
}

#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    fail_delete: AtomicBool,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        match self.accounts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers an account directly and returns its id.
    pub fn add_user(&self, email: &str, password: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.accounts().insert(
            id.clone(),
            Account {
                id: id.clone(),
                email: email.to_ascii_lowercase(),
                password: password.to_string(),
                full_name: String::new(),
            },
        );
        id
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.accounts().contains_key(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.accounts().len()
    }

    pub fn full_name(&self, user_id: &str) -> Option<String> {
        self.accounts().get(user_id).map(|a| a.full_name.clone())
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Every call fails as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError {
                code: ERR_AUTH_UNAVAILABLE,
                message: "identity provider unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignIn, AuthError> {
        self.begin()?;

        let email = email.to_ascii_lowercase();
        let accounts = self.accounts();
        let account = accounts
            .values()
            .find(|a| a.email == email && a.password == password)
            .ok_or_else(|| AuthError {
                code: ERR_AUTH_INVALID,
                message: "Invalid login credentials".to_string(),
            })?;

        Ok(SignIn {
            user: IdentityUser {
                id: account.id.clone(),
                email: Some(account.email.clone()),
            },
            session: SessionTokens {
                access_token: format!("access-{}", account.id),
                refresh_token: format!("refresh-{}", account.id),
                expires_in: Some(3600),
            },
        })
    }

    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<IdentityUser, AuthError> {
        self.begin()?;

        let email = email.to_ascii_lowercase();
        let mut accounts = self.accounts();
        if accounts.values().any(|a| a.email == email) {
            return Err(AuthError {
                code: ERR_AUTH_REJECTED,
                message: "A user with this email address has already been registered"
                    .to_string(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                email: email.clone(),
                password: password.to_string(),
                full_name: full_name.to_string(),
            },
        );

        Ok(IdentityUser {
            id,
            email: Some(email),
        })
    }

    async fn admin_delete_user(&self, user_id: &str) -> Result<(), AuthError> {
        self.begin()?;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AuthError {
                code: ERR_AUTH_REJECTED,
                message: "injected delete failure".to_string(),
            });
        }

        match self.accounts().remove(user_id) {
            Some(_) => Ok(()),
            None => Err(AuthError {
                code: ERR_AUTH_REJECTED,
                message: "User not found".to_string(),
            }),
        }
    }
}
