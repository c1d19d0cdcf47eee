pub mod chat;
pub mod usage;
pub mod user;

pub use chat::{Attachment, AttachmentUpload, Chat, Message, Role};
pub use usage::{EventMetadata, EventType, NewUsageEvent, PeriodUsage, UsageEvent};
pub use user::{SubscriptionTier, User};
