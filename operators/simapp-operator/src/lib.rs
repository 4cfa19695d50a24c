//! SIMAPP Operator - 管理 5G SIMAPP 工作负载生命周期的 Kubernetes Operator
//!
//! 该模块响应配置变更、容器就绪和用户动作三类事件，写入配置文件、声明或执行
//! SIMAPP 服务，并将工作负载状态（Waiting、Blocked、Active）回写到 `SimApp` 资源。

pub mod config;
pub mod controller;
pub mod crd;
pub mod event_handler;
pub mod pod;
pub mod reconcile;
pub mod service;
pub mod status;
pub mod testing;
pub mod workload;

use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::OperatorConfig;

/// 事件通道缓冲区大小
const EVENT_BUFFER: usize = 100;

/// Operator 主结构体
pub struct SimAppOperator {
    /// Kubernetes 客户端
    client: Client,
    config: OperatorConfig,
    /// 事件处理器
    event_handler: Option<event_handler::EventHandler>,
    /// 分发器任务
    dispatcher: Option<JoinHandle<()>>,
}

impl SimAppOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        // 创建 Kubernetes 客户端
        let client = Client::try_default()
            .await
            .context("创建 Kubernetes 客户端失败")?;

        Ok(Self {
            client,
            config,
            event_handler: None,
            dispatcher: None,
        })
    }

    /// 启动 Operator
    pub async fn start(&mut self) -> Result<()> {
        let config = &self.config;

        service::expose_ports(self.client.clone(), &config.namespace, &config.name).await?;

        let workload = Arc::new(pod::PodWorkload::new(
            self.client.clone(),
            &config.namespace,
            &config.pod_name,
            &config.container_name,
        ));
        let identity = Arc::new(pod::PodAddress::new(
            self.client.clone(),
            &config.namespace,
            &config.pod_name,
        ));
        let reporter = Arc::new(status::CrdStatusReporter::new(
            self.client.clone(),
            &config.namespace,
            &config.name,
        ));
        let actions = Arc::new(status::CrdActionReporter::new(
            self.client.clone(),
            &config.namespace,
        ));

        let config_source = Arc::new(crd::SimAppConfig::new(
            self.client.clone(),
            &config.namespace,
            &config.name,
        ));

        // 分发器在处理每个事件前读取 SimApp，覆盖这里的初始策略
        let reconciler =
            reconcile::Reconciler::new(workload, identity, reporter, config.profile(false));

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let dispatcher = controller::Controller::new(
            reconciler,
            config_source,
            actions,
            config.clone(),
            &event_tx,
        );
        self.dispatcher = Some(tokio::spawn(dispatcher.run(event_rx)));

        let mut event_handler = event_handler::EventHandler::new(
            self.client.clone(),
            &config.namespace,
            &config.name,
            &config.pod_name,
            &config.container_name,
            event_tx,
        );
        event_handler.start();
        self.event_handler = Some(event_handler);

        info!("SIMAPP Operator 已启动: {}/{}", config.namespace, config.name);
        Ok(())
    }

    /// 停止 Operator
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut event_handler) = self.event_handler.take() {
            event_handler.stop();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }

        info!("SIMAPP Operator 已停止");
        Ok(())
    }
}
