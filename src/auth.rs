use crate::access::Session;
use crate::config::Settings;
use crate::persist::SaveFile;
use crate::world::{Event, World};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

// ── Auth request/response types ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub session: Session,
}

// ── JWT ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // account id
    pub username: String,
    pub exp: usize,
    pub iat: usize,
}

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub world: RwLock<World>,
    pub save_file: SaveFile,
    pub live_tx: tokio::sync::broadcast::Sender<Event>,
    pub settings: Settings,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// A panic while holding the lock leaves World consistent (apply
    /// validates before mutating), so poisoning is ignored.
    pub fn world(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn world_mut(&self) -> RwLockWriteGuard<'_, World> {
        self.world.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Helpers ────────────────────────────────────────────────────

pub fn create_token(settings: &Settings, user_id: Uuid, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiry = now + Duration::minutes(settings.jwt_expiration_in_minutes);

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
}

pub fn verify_token(settings: &Settings, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Token → live session. The session is rebuilt from the current account on
/// every request, so role and grant changes apply without a new login.
pub fn session_from_token(state: &AppState, token: &str) -> Result<Session, (StatusCode, String)> {
    let claims = verify_token(&state.settings, token)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".to_string()))?;

    state
        .world()
        .session_for(claims.sub)
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))
}

// ── Handlers ───────────────────────────────────────────────────

pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let account = state
        .world()
        .get_account_by_username(&payload.username)
        .cloned()
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &account.password_hash) {
        tracing::info!(username = %payload.username, "login rejected");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    let token = create_token(&state.settings, account.id, &account.username)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(username = %account.username, "logged in");
    Ok(Json(LoginResponse {
        token,
        user: UserResponse {
            id: account.id,
            username: account.username.clone(),
            session: account.session(),
        },
    }))
}

pub async fn logout() -> impl IntoResponse {
    StatusCode::OK
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, (StatusCode, String)> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or((StatusCode::UNAUTHORIZED, "Missing or invalid token".to_string()))
}

pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let session = session_from_token(&state, bearer_token(request.headers())?)?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// In-process AppState over a throwaway save file, for handler tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::access::{self, OrgRole};
    use crate::world::Account;
    use std::path::PathBuf;

    pub const ORG: Uuid = Uuid::from_bytes([0x0A; 16]);

    pub struct TestState {
        pub state: SharedState,
        path: PathBuf,
    }

    impl Drop for TestState {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub fn account(id: Uuid, username: &str, role: OrgRole, department: Option<&str>) -> Account {
        Account {
            id,
            username: username.into(),
            password_hash: String::new(),
            super_admin: false,
            org_id: Some(ORG),
            role: Some(role),
            department: department.map(str::to_string),
            grants: access::default_grants(role),
        }
    }

    pub fn state(name: &str, accounts: Vec<Account>) -> TestState {
        let path = std::env::temp_dir().join(format!("printflow_state_{name}_{}.redb", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let save_file = SaveFile::open(&path).unwrap();

        let mut world = World::new();
        for account in accounts {
            world.accounts.insert(account.id, account);
        }
        let (live_tx, _) = tokio::sync::broadcast::channel(64);
        let state = Arc::new(AppState {
            world: RwLock::new(world),
            save_file,
            live_tx,
            settings: Settings { jwt_secret: "test-secret".into(), ..Settings::default() },
        });
        TestState { state, path }
    }
}
