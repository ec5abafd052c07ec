//! 流程层：定义单个账号的处理流程，只依赖 services 和 infrastructure 提供的能力

pub mod chrome_steps;
pub mod steps;
pub mod subscription_flow;

pub use chrome_steps::ChromeSteps;
pub use steps::{EntitlementProbe, LoginOutcome, PaymentOutcome, SubscriptionSteps};
pub use subscription_flow::WorkflowExecutor;
