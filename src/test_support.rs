// src/test_support.rs
use crate::errors::StudioError;
use crate::services::identity::{IdentityProvider, UserSession};
use crate::services::storage::ObjectStorage;
use actix_web::{App, HttpServer, web};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Runs an in-process HTTP server standing in for a remote collaborator.
pub async fn spawn_fake_api<F>(routes: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let server = HttpServer::new(move || {
        let routes = routes.clone();
        App::new().configure(move |cfg| routes(cfg))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("bind fake api");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

pub struct FakeIdentity {
    session: Mutex<Option<UserSession>>,
    refresh_fails: AtomicBool,
    refresh_calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn anonymous() -> Self {
        Self {
            session: Mutex::new(None),
            refresh_fails: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub fn signed_in(user_id: &str, token: &str) -> Self {
        let identity = Self::anonymous();
        *identity.session.lock().unwrap() = Some(UserSession {
            user_id: user_id.to_string(),
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
        });
        identity
    }

    pub fn fail_refresh(&self) {
        self.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_user(&self) -> Option<UserSession> {
        self.session.lock().unwrap().clone()
    }

    async fn refresh(&self) -> Result<UserSession, StudioError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(StudioError::AuthRequired);
        }
        let mut guard = self.session.lock().unwrap();
        let session = guard.as_mut().ok_or(StudioError::AuthRequired)?;
        session.access_token = "refreshed".to_string();
        session.refresh_token = None;
        Ok(session.clone())
    }

    async fn sign_out(&self) {
        self.session.lock().unwrap().take();
    }
}

const MEMORY_BASE: &str = "https://assets.test";

/// Object storage kept in memory; `fail_uploads` makes every upload error.
#[derive(Default)]
pub struct MemoryStorage {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn fail_uploads(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, data: Bytes, key: &str, _content_type: &str) -> Result<String, StudioError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StudioError::Upload(format!("refused {}", key)));
        }
        self.uploads.lock().unwrap().push((key.to_string(), data.to_vec()));
        Ok(format!("{}/{}", MEMORY_BASE, key))
    }

    fn key_from_url(&self, url: &str) -> String {
        url.trim_start_matches(MEMORY_BASE).trim_start_matches('/').to_string()
    }
}
