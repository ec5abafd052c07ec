//! # Gemi Auto
//!
//! 批量账号订阅自动化：为每个账号启动一个隔离的浏览器，登录、检测订阅状态、按需支付，
//! 并把结果逐行写入结果文件
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器会话），只暴露能力
//! - `ResourceRegistry` - 串行创建、登记、关闭浏览器；硬停止时统一强制关闭
//! - `browser/` - 基于 chromiumoxide 的会话工厂与元素探测
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心调度
//! - `InputSource` - 读取账号与支付数据
//! - `PaymentDataProvider` - 轮换分配信用卡，随机搭配姓名和邮编
//! - `OutputSink` - 结果文件追加写入、验证链接导出
//! - `VerifyClient` - 验证链接提交服务
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个账号"的完整处理流程
//! - `SubscriptionSteps` - 登录 / 订阅检测 / 支付 三个页面操作
//! - `WorkflowExecutor` - 状态机（login → check → pay → 结果）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/controller` - 批量调度器，控制并发与硬停止
//! - `orchestrator/events` - 运行事件总线
//! - `orchestrator/monitor` - 任务表，统计与重试筛选
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{ChromeFactory, ChromeSession};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{ResourceFactory, ResourceRegistry, Session};
pub use models::{Account, BusinessStatus, ResultKind, TaskSummary, WindowMode};
pub use orchestrator::{Controller, ControllerEvent, EventBus, RunOptions, TaskTable};
pub use workflow::{ChromeSteps, SubscriptionSteps, WorkflowExecutor};
