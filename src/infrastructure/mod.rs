//! 基础设施层：持有稀缺资源（浏览器会话），只暴露能力

pub mod registry;

pub use registry::{LaunchSpec, ResourceFactory, ResourceHandle, ResourceRegistry, Session};
