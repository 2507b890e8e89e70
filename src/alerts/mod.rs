/// Alert dispatch and message truncation
pub mod alert_manager;
pub mod alert_cache;
pub mod notifier;
pub mod send_policy;

pub use alert_cache::{AggregatedAlert, AlertCache, AlertDecision};
pub use alert_manager::AlertDispatcher;
pub use notifier::{DingTalkNotifier, LogNotifier, Notifier, WeChatNotifier};
pub use send_policy::SendPolicy;
