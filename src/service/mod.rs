pub mod activity;
pub mod client;
pub mod protocol;

pub use activity::ActivityFeed;
pub use client::{HttpTransport, SessionTransport};
pub use protocol::{
    ActivityLogEntry, ActivityStatus, ClockAction, EnrollmentReply, HealthStatus, Identity,
    RecognitionReply,
};
