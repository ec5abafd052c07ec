pub mod account;
pub mod payment;
pub mod result;
pub mod window_mode;

pub use account::Account;
pub use payment::{PaymentCard, PaymentInfo};
pub use result::{BusinessStatus, ResultKind, SubscriptionResult, TaskSummary};
pub use window_mode::WindowMode;
