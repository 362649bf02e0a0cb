mod helpers;
mod middleware;
mod password;
mod token;

pub use helpers::{authenticate, extract_bearer_token, issue_session};
pub use middleware::{AuthError, Caller, Identity};
pub use password::{generate_password, hash_password, verify_password};
pub use token::{IssuedToken, TokenGenerator, parse_token};
