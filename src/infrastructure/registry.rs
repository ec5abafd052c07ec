//! 浏览器资源登记表 - 基础设施层
//!
//! ## 职责
//!
//! - 串行创建浏览器会话（同时启动多个浏览器容易互相干扰）
//! - 登记所有存活的会话，供硬停止时统一强制关闭
//! - 保证每个会话只被释放一次：正常关闭与强制关闭通过句柄自身的锁互斥
//!
//! ## 锁
//!
//! ```text
//! create_lock   全局创建锁，只包住 factory.create()
//! active        存活句柄集合，从不跨 await 持有
//! handle.slot   单个句柄的关闭锁，关闭路径在其内部短暂获取 active
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ResourceError};
use crate::models::WindowMode;

/// 一个独占的外部会话（通常是一个浏览器进程）
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// 立即终止会话
    ///
    /// 可能与正在进行的页面操作并发执行，之后这些操作应当返回错误而不是挂起。
    async fn terminate(&self) -> AppResult<()>;
}

/// 创建会话所需的参数
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub profile: String,
    pub mode: WindowMode,
    pub profile_dir: PathBuf,
}

/// 会话工厂
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Session: Session;

    async fn create(&self, spec: &LaunchSpec) -> AppResult<Self::Session>;
}

/// 已登记的会话句柄
#[derive(Debug)]
pub struct ResourceHandle<S> {
    id: u64,
    profile: String,
    mode: WindowMode,
    profile_dir: PathBuf,
    slot: Mutex<Option<Arc<S>>>,
    temp_dir: StdMutex<Option<TempDir>>,
}

impl<S: Session> ResourceHandle<S> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// 取得会话引用；会话已关闭时返回 `SessionGone`
    pub async fn session(&self) -> AppResult<Arc<S>> {
        self.slot
            .lock()
            .await
            .clone()
            .ok_or(AppError::Resource(ResourceError::SessionGone))
    }

    pub async fn is_closed(&self) -> bool {
        self.slot.lock().await.is_none()
    }

    fn take_temp_dir(&self) -> Option<TempDir> {
        match self.temp_dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// 浏览器资源登记表
pub struct ResourceRegistry<F: ResourceFactory> {
    factory: Arc<F>,
    create_lock: Mutex<()>,
    active: StdMutex<HashMap<u64, Arc<ResourceHandle<F::Session>>>>,
    next_id: AtomicU64,
    gate_closed: AtomicBool,
    profile_root: PathBuf,
    close_grace: Duration,
}

impl<F: ResourceFactory> ResourceRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self::with_factory(Arc::new(factory))
    }

    pub fn with_factory(factory: Arc<F>) -> Self {
        Self {
            factory,
            create_lock: Mutex::new(()),
            active: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            gate_closed: AtomicBool::new(false),
            profile_root: std::env::temp_dir(),
            close_grace: Duration::from_secs(2),
        }
    }

    /// 临时配置目录的父目录
    pub fn profile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profile_root = root.into();
        self
    }

    /// 关闭会话后、删除临时目录前的等待时间（避免文件仍被刚退出的进程占用）
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// 创建并登记一个会话
    pub async fn acquire(
        &self,
        profile: &str,
        mode: WindowMode,
    ) -> AppResult<Arc<ResourceHandle<F::Session>>> {
        if self.gate_closed.load(Ordering::SeqCst) {
            return Err(ResourceError::ShuttingDown.into());
        }

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("uc_profile_{}_", profile))
            .tempdir_in(&self.profile_root)
            .map_err(|e| AppError::resource_init(profile, e))?;

        let spec = LaunchSpec {
            profile: profile.to_string(),
            mode,
            profile_dir: temp_dir.path().to_path_buf(),
        };

        let session = {
            let _guard = self.create_lock.lock().await;
            debug!("[{}] 获得浏览器创建锁", profile);
            self.factory.create(&spec).await
        };

        let session = match session {
            Ok(session) => Arc::new(session),
            Err(AppError::Resource(e)) => return Err(AppError::Resource(e)),
            Err(e) => return Err(AppError::resource_init(profile, e)),
        };

        let handle = Arc::new(ResourceHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            profile: spec.profile,
            mode,
            profile_dir: spec.profile_dir,
            slot: Mutex::new(Some(session.clone())),
            temp_dir: StdMutex::new(Some(temp_dir)),
        });

        let registered = {
            let mut active = self.lock_active();
            if self.gate_closed.load(Ordering::SeqCst) {
                false
            } else {
                active.insert(handle.id, handle.clone());
                true
            }
        };

        if !registered {
            warn!("[{}] 登记期间收到停止请求，立即关闭刚创建的浏览器", profile);
            self.force_close(&handle).await;
            return Err(ResourceError::ShuttingDown.into());
        }

        info!("[{}] 浏览器已登记 (模式={}, id={})", profile, mode, handle.id);
        Ok(handle)
    }

    /// 正常关闭：释放会话、注销、等待片刻后删除临时配置目录。可重复调用。
    ///
    /// 返回本次调用是否真正释放了会话。
    pub async fn close(&self, handle: &ResourceHandle<F::Session>) -> bool {
        info!("[{}] 任务结束，正在关闭并清理缓存...", handle.profile);
        let released = self.release(handle, "关闭").await;

        if let Some(dir) = handle.take_temp_dir() {
            tokio::time::sleep(self.close_grace).await;
            let path = dir.path().display().to_string();
            match tokio::task::spawn_blocking(move || dir.close()).await {
                Ok(Ok(())) => info!("[{}] 缓存已彻底清除", handle.profile),
                Ok(Err(e)) => warn!("[{}] 删除临时目录失败 ({}): {}", handle.profile, path, e),
                Err(e) => warn!("[{}] 删除临时目录任务异常: {}", handle.profile, e),
            }
        }

        released
    }

    /// 强制关闭（硬停止使用）。与 `close` 并发安全，只有一方真正释放会话。
    pub async fn force_close(&self, handle: &ResourceHandle<F::Session>) -> bool {
        let released = self.release(handle, "强制关闭").await;
        if released {
            info!("[{}] 已执行强制关闭浏览器窗口", handle.profile);
        }
        released
    }

    /// 强制关闭所有存活会话，返回本次调用实际关闭的数量
    pub async fn force_close_all(&self) -> usize {
        let snapshot: Vec<_> = self.lock_active().values().cloned().collect();

        let mut closed = 0;
        for handle in snapshot {
            if self.force_close(&handle).await {
                closed += 1;
            }
        }

        if closed > 0 {
            warn!("硬结束：已强制关闭 {} 个浏览器窗口", closed);
        } else {
            info!("硬结束：当前没有活动浏览器窗口可关闭");
        }
        closed
    }

    /// 拒绝新的会话登记并强制关闭全部存活会话
    pub async fn shutdown(&self) -> usize {
        self.gate_closed.store(true, Ordering::SeqCst);
        self.force_close_all().await
    }

    /// 重新允许登记（新一轮运行开始时调用）
    pub fn reopen(&self) {
        self.gate_closed.store(false, Ordering::SeqCst);
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    async fn release(&self, handle: &ResourceHandle<F::Session>, action: &str) -> bool {
        let mut slot = handle.slot.lock().await;
        let Some(session) = slot.take() else {
            self.deregister(handle.id);
            return false;
        };

        if let Err(e) = session.terminate().await {
            warn!("[{}] {}浏览器时发生异常: {}", handle.profile, action, e);
        }
        self.deregister(handle.id);
        true
    }

    fn deregister(&self, id: u64) {
        self.lock_active().remove(&id);
    }

    fn lock_active(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<ResourceHandle<F::Session>>>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
