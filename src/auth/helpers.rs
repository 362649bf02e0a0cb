use chrono::{DateTime, Duration, Utc};

use super::middleware::{AuthError, Identity};
use super::{IssuedToken, TokenGenerator, parse_token};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Session, User};

const LOOKUP_ATTEMPTS: usize = 3;

/// Pulls the raw token out of an `Authorization` header value.
/// `Ok(None)` means the header was absent.
pub fn extract_bearer_token(auth_header: Option<&str>) -> std::result::Result<Option<&str>, AuthError> {
    match auth_header {
        Some(header) => header
            .strip_prefix("Bearer ")
            .map(|token| Some(token.trim()))
            .ok_or(AuthError::InvalidScheme),
        None => Ok(None),
    }
}

/// Resolves a raw session token to the identity behind it.
pub fn authenticate(
    store: &dyn Store,
    raw_token: &str,
    now: DateTime<Utc>,
) -> std::result::Result<Identity, AuthError> {
    let (lookup, _secret) = parse_token(raw_token).map_err(|_| AuthError::InvalidToken)?;

    let session = store
        .get_session_by_lookup(lookup)
        .map_err(internal)?
        .ok_or(AuthError::InvalidToken)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_token, &session.token_hash)
        .map_err(internal)?
    {
        return Err(AuthError::InvalidToken);
    }

    if session.expires_at <= now {
        return Err(AuthError::TokenExpired);
    }

    let user = store
        .get_user(session.user_id)
        .map_err(internal)?
        .ok_or(AuthError::InvalidToken)?;

    let institution_name = match user.institution_id {
        Some(id) => store.get_institution(id).map_err(internal)?.map(|i| i.name),
        None => None,
    };

    if let Err(e) = store.touch_session(&session.id) {
        tracing::warn!("Failed to update session last_used_at: {e}");
    }

    Ok(Identity::from_user(user, institution_name, Some(session.id)))
}

/// Creates a session for `user` and returns the raw token to hand out.
pub fn issue_session(store: &dyn Store, user: &User, ttl_hours: i64) -> Result<IssuedToken> {
    let generator = TokenGenerator::new();

    for _ in 0..LOOKUP_ATTEMPTS {
        let issued = generator.generate()?;
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            token_hash: issued.hash.clone(),
            token_lookup: issued.lookup.clone(),
            user_id: user.id,
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            last_used_at: None,
        };

        match store.create_session(&session) {
            Ok(()) => return Ok(issued),
            Err(Error::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::Internal("could not allocate a unique session token".into()))
}

fn internal(e: Error) -> AuthError {
    tracing::error!("Session validation failed: {e}");
    AuthError::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{NewUser, Role};
    use tempfile::TempDir;

    fn store_with_user() -> (TempDir, SqliteStore, User) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let user = store
            .create_user(&NewUser {
                username: "ada".to_string(),
                password_hash: "unused".to_string(),
                role: Role::Teacher,
                name: "Ada".to_string(),
                email: None,
                institution_id: None,
            })
            .unwrap();
        (temp, store, user)
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(None).unwrap(), None);
        assert_eq!(extract_bearer_token(Some("Bearer abc")).unwrap(), Some("abc"));
        assert!(matches!(
            extract_bearer_token(Some("Basic abc")),
            Err(AuthError::InvalidScheme)
        ));
    }

    #[test]
    fn test_issued_session_authenticates() {
        let (_temp, store, user) = store_with_user();
        let issued = issue_session(&store, &user, 24).unwrap();

        let identity = authenticate(&store, &issued.raw, Utc::now()).unwrap();
        assert_eq!(identity.user_id, Some(user.id));
        assert_eq!(identity.role, Role::Teacher);
        assert!(identity.session_id.is_some());
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let (_temp, store, user) = store_with_user();
        let issued = issue_session(&store, &user, 1).unwrap();

        let later = Utc::now() + Duration::hours(2);
        assert!(matches!(
            authenticate(&store, &issued.raw, later),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let (_temp, store, user) = store_with_user();
        let issued = issue_session(&store, &user, 24).unwrap();

        let forged = format!("schoolyard_{}_{}", issued.lookup, "0".repeat(24));
        assert!(matches!(
            authenticate(&store, &forged, Utc::now()),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            authenticate(&store, "garbage", Utc::now()),
            Err(AuthError::InvalidToken)
        ));
    }
}
