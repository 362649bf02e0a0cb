mod models;
mod role;
mod scope;
mod stats;

pub use models::*;
pub use role::{AnnouncementPriority, Audience, EventType, RecordStatus, Role};
pub use scope::TenantScope;
pub use stats::{
    AttendanceStats, InstitutionStats, InstitutionTypeCount, SystemStats, attendance_rate,
};
