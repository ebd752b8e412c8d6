//! Phone/OTP session and the current user's profile.
//!
//! The profile is cached like any other query. A 401 is not an error here:
//! it means nobody is signed in, and that answer is cached too. A 401 from
//! any other request resets the cached profile to the same answer.

use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::key::{KeyPredicate, QueryKey};
use crate::mutation::MutationRunner;
use crate::normalize::normalize_item_response;
use crate::remote::{Method, RemoteApi};
use crate::resource::Resource;
use crate::state::QueryState;
use serde_json::{json, Value};
use std::sync::Arc;

pub const PROFILE_PATH: &str = "/auth/profile";
pub const SEND_OTP_PATH: &str = "/auth/send-otp";
pub const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Session operations.
pub struct AuthClient<A> {
    api: Arc<A>,
    executor: QueryExecutor,
    mutations: MutationRunner,
}

impl<A> Clone for AuthClient<A> {
    fn clone(&self) -> Self {
        AuthClient {
            api: self.api.clone(),
            executor: self.executor.clone(),
            mutations: self.mutations.clone(),
        }
    }
}

impl<A> AuthClient<A> {
    pub fn profile_key() -> QueryKey {
        QueryKey::new("auth").push("profile")
    }
}

impl<A: RemoteApi> AuthClient<A> {
    pub fn new(api: Arc<A>, executor: QueryExecutor, mutations: MutationRunner) -> Self {
        AuthClient {
            api,
            executor,
            mutations,
        }
    }

    /// The signed-in user, or `None` when the server answers 401.
    ///
    /// # Errors
    /// Network and server failures propagate; only 401 becomes `None`.
    pub async fn profile(&self) -> Result<Option<Resource>> {
        let api = self.api.clone();
        self.executor
            .run(&Self::profile_key(), move || async move {
                match api.get(PROFILE_PATH, &[]).await {
                    Ok(raw) => normalize_item_response(raw).map(Some),
                    Err(e) if e.is_unauthorized() => {
                        debug!("No active session");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    pub fn profile_state(&self) -> Result<QueryState<Option<Resource>>> {
        self.executor.state(&Self::profile_key())
    }

    /// Ask the server to text a one-time code to `phone`.
    pub async fn request_otp(&self, phone: &str) -> Result<Value> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(Error::Validation {
                status: 400,
                message: "Phone number is required".to_string(),
            });
        }

        self.post(SEND_OTP_PATH, json!({ "phone": phone }), KeyPredicate::None)
            .await
    }

    /// Exchange the code for a session. The cached profile is invalidated
    /// so the next read picks up the new user.
    pub async fn verify_otp(&self, phone: &str, code: &str) -> Result<Value> {
        let body = json!({ "phone": phone.trim(), "otp": code.trim() });
        self.post(
            VERIFY_OTP_PATH,
            body,
            KeyPredicate::Exact(Self::profile_key()),
        )
        .await
    }

    /// `PATCH /auth/profile`.
    pub async fn update_profile(&self, body: Value) -> Result<Value> {
        let api = self.api.clone();
        self.mutations
            .run(
                move |body| async move { api.send(Method::Patch, PROFILE_PATH, Some(body)).await },
                body,
                &KeyPredicate::Exact(Self::profile_key()),
            )
            .await
    }

    /// End the session and drop every cached entry.
    ///
    /// The cache is cleared whatever the server answers, and responses to
    /// requests issued before this call never repopulate it.
    pub async fn logout(&self) -> Result<()> {
        let api = self.api.clone();
        let result = self
            .mutations
            .run(
                move |_| async move { api.send(Method::Post, LOGOUT_PATH, None).await },
                (),
                &KeyPredicate::None,
            )
            .await;

        self.executor.reset();
        self.executor.store().clear();

        match result {
            Ok(_) => {
                info!("✓ Logged out");
                Ok(())
            }
            Err(e) => {
                warn!("✗ Logout request failed, cache cleared anyway: {}", e);
                Err(e)
            }
        }
    }

    async fn post(&self, path: &'static str, body: Value, affected: KeyPredicate) -> Result<Value> {
        let api = self.api.clone();
        self.mutations
            .run(
                move |body| async move { api.send(Method::Post, path, Some(body)).await },
                body,
                &affected,
            )
            .await
    }
}
