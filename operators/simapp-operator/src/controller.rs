//! 控制器模块
//!
//! 事件分发器：从通道中逐个取出生命周期事件交给协调器处理，一次只处理一个事件。
//! 每个事件处理前都从 `ConfigSource` 读取当前配置，被推迟的事件在间隔之后
//! 重新投递，同一时间最多只有一个待投递的配置变更。

use simapp_common::{ActionError, Error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::CONFIGURE_NETWORK_ACTION;
use crate::event_handler::LifecycleEvent;
use crate::reconcile::{Outcome, Reconciler};
use crate::workload::{ActionReporter, ConfigSource};

/// 控制器结构体
pub struct Controller {
    /// 协调器
    reconciler: Reconciler,
    /// 当前配置来源
    config_source: Arc<dyn ConfigSource>,
    /// 动作结果回报
    actions: Arc<dyn ActionReporter>,
    config: OperatorConfig,
    /// 推迟事件的重新投递通道，不阻止通道关闭
    redeliver_tx: mpsc::WeakSender<LifecycleEvent>,
    /// 是否已有待重新投递的配置变更
    config_redelivery: Arc<AtomicBool>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(
        reconciler: Reconciler,
        config_source: Arc<dyn ConfigSource>,
        actions: Arc<dyn ActionReporter>,
        config: OperatorConfig,
        event_tx: &mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            reconciler,
            config_source,
            actions,
            config,
            redeliver_tx: event_tx.downgrade(),
            config_redelivery: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 运行分发循环，直到所有发送端关闭
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<LifecycleEvent>) {
        info!("SIMAPP 事件分发器已启动");

        while let Some(event) = event_rx.recv().await {
            self.dispatch(event).await;
        }

        info!("事件通道已关闭，分发器退出");
    }

    /// 处理单个事件
    pub async fn dispatch(&mut self, event: LifecycleEvent) {
        debug!("处理事件: {:?}", event);
        self.refresh_profile().await;

        match event {
            LifecycleEvent::ConfigChanged => {
                let result = self.reconciler.on_config_changed().await;
                self.settle(LifecycleEvent::ConfigChanged, result);
            }
            LifecycleEvent::WorkloadReady => {
                let result = self.reconciler.on_workload_ready().await;
                self.settle(LifecycleEvent::WorkloadReady, result);
            }
            LifecycleEvent::Action { id, action } => {
                self.run_action(&id, &action).await;
            }
        }
    }

    /// 按当前配置更新协调策略，读取失败时沿用现有策略
    async fn refresh_profile(&mut self) {
        match self.config_source.use_default_config().await {
            Ok(use_default_config) => self
                .reconciler
                .set_profile(self.config.profile(use_default_config)),
            Err(e) => warn!("读取 SimApp 配置失败，沿用当前策略: {}", e),
        }
    }

    fn settle(&self, event: LifecycleEvent, result: simapp_common::Result<Outcome>) {
        match result {
            Ok(Outcome::Deferred(status)) => {
                warn!("事件 {:?} 被推迟: {}", event, status);
                self.defer(event);
            }
            Ok(Outcome::Settled(Some(status))) => debug!("事件 {:?} 处理完成: {}", event, status),
            Ok(Outcome::Settled(None)) => debug!("事件 {:?} 处理完成", event),
            Err(e) => error!("处理事件 {:?} 失败: {}", event, e),
        }
    }

    /// 间隔之后重新投递事件
    fn defer(&self, event: LifecycleEvent) {
        let pending = if event == LifecycleEvent::ConfigChanged {
            if self.config_redelivery.swap(true, Ordering::SeqCst) {
                debug!("已有待重新投递的配置变更，合并");
                return;
            }
            Some(self.config_redelivery.clone())
        } else {
            None
        };

        let redeliver_tx = self.redeliver_tx.clone();
        let delay = self.config.defer_interval();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(pending) = pending {
                pending.store(false, Ordering::SeqCst);
            }
            match redeliver_tx.upgrade() {
                Some(tx) => {
                    if tx.send(event).await.is_err() {
                        debug!("事件通道已关闭，丢弃推迟的事件");
                    }
                }
                None => debug!("事件通道已关闭，丢弃推迟的事件"),
            }
        });
    }

    async fn run_action(&self, id: &str, action: &str) {
        let result = if action == CONFIGURE_NETWORK_ACTION {
            self.reconciler.on_configure_network_action().await
        } else {
            Err(ActionError::Platform(Error::Unknown(format!(
                "unknown action: {}",
                action
            ))))
        };

        if let Err(e) = self.actions.report(id, &result).await {
            error!("回报动作 {} 结果失败: {}", id, e);
        }
    }
}
