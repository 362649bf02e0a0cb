mod attendance;
mod auth;
mod calendar;
mod classes;
mod community;
pub mod dto;
mod institutions;
mod multipart;
mod people;
pub mod response;
mod router;
pub mod validation;

pub use router::{AppState, create_router};
