//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量调度和运行汇报，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `controller` - 批量调度器
//! - 读取账号、筛选重试账号、加载支付数据
//! - 控制并发数量与启动间隔
//! - 硬停止：拒绝新任务并强制关闭所有浏览器
//!
//! ### `events` - 事件总线
//! - 定义所有运行事件（`run_started` / `task_finished` / ...）
//! - 订阅者的错误和 panic 与调度隔离
//!
//! ### `monitor` - 任务表
//! - 消费事件，维护每个任务的状态
//! - 汇总统计，筛选可重试的失败账号
//!
//! ## 层次关系
//!
//! ```text
//! controller (处理 Vec<Account>)
//!     ↓
//! workflow::WorkflowExecutor (处理单个 Account)
//!     ↓
//! services (能力层：输入 / 支付数据 / 结果输出)
//!     ↓
//! infrastructure (基础设施：ResourceRegistry)
//! ```

pub mod controller;
pub mod events;
pub mod monitor;

pub use controller::{Controller, RunOptions};
pub use events::{ControllerEvent, EventBus};
pub use monitor::{TableSummary, TaskRecord, TaskTable, ThreadStatus};
