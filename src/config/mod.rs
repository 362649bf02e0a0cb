mod server;

pub use server::{AuthMode, FileConfig, ServerConfig};
