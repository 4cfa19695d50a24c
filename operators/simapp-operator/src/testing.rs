//! 内存实现
//!
//! 供单元测试和集成测试替换 Kubernetes 实现使用，记录所有副作用以便断言。

use async_trait::async_trait;
use simapp_common::{ActionError, Error, Layer, Plan, Result, Status};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;

use crate::workload::{
    ActionReporter, ConfigSource, ExecOutput, ExecRequest, PodAddressProvider, StatusReporter,
    Workload,
};

/// 声明过的服务层
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredLayer {
    pub label: String,
    pub layer: Layer,
    pub combine: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    connectable: bool,
    files: BTreeMap<String, Vec<u8>>,
    pushes: Vec<String>,
    layers: Vec<DeclaredLayer>,
    plan: Plan,
    replans: usize,
    execs: Vec<ExecRequest>,
    exec_result: Option<std::result::Result<ExecOutput, String>>,
}

/// 内存中的工作负载
#[derive(Debug, Default)]
pub struct FakeWorkload {
    state: Mutex<FakeState>,
}

impl FakeWorkload {
    pub fn new(connectable: bool) -> Self {
        Self {
            state: Mutex::new(FakeState {
                connectable,
                ..Default::default()
            }),
        }
    }

    pub async fn set_connectable(&self, connectable: bool) {
        self.state.lock().await.connectable = connectable;
    }

    /// 模拟人工放置的文件
    pub async fn put_file(&self, path: &str, content: &[u8]) {
        self.state
            .lock()
            .await
            .files
            .insert(path.to_string(), content.to_vec());
    }

    /// 设置下一次及之后 `exec` 的结果，`Err` 表示无法启动
    pub async fn set_exec_result(&self, result: std::result::Result<ExecOutput, String>) {
        self.state.lock().await.exec_result = Some(result);
    }

    pub async fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(path).cloned()
    }

    /// 通过 `push` 写入过的路径
    pub async fn pushes(&self) -> Vec<String> {
        self.state.lock().await.pushes.clone()
    }

    pub async fn layers(&self) -> Vec<DeclaredLayer> {
        self.state.lock().await.layers.clone()
    }

    pub async fn plan(&self) -> Plan {
        self.state.lock().await.plan.clone()
    }

    pub async fn replans(&self) -> usize {
        self.state.lock().await.replans
    }

    pub async fn execs(&self) -> Vec<ExecRequest> {
        self.state.lock().await.execs.clone()
    }
}

#[async_trait]
impl Workload for FakeWorkload {
    async fn can_connect(&self) -> bool {
        self.state.lock().await.connectable
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state.lock().await;
        if !state.connectable {
            return Err(Error::Workload("容器不可达".to_string()));
        }
        Ok(state.files.contains_key(path))
    }

    async fn push(&self, path: &str, content: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.connectable {
            return Err(Error::Workload("容器不可达".to_string()));
        }
        state.files.insert(path.to_string(), content.to_vec());
        state.pushes.push(path.to_string());
        Ok(())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        let mut state = self.state.lock().await;
        state.execs.push(request);
        match state.exec_result.clone() {
            Some(Ok(output)) => Ok(output),
            Some(Err(fault)) => Err(Error::Exec(fault)),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if combine {
            state.plan.combine(layer)?;
        } else {
            let mut plan = Plan::default();
            plan.combine(layer)?;
            state.plan = plan;
        }
        state.layers.push(DeclaredLayer {
            label: label.to_string(),
            layer: layer.clone(),
            combine,
        });
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        self.state.lock().await.replans += 1;
        Ok(())
    }
}

/// 固定地址的网络身份
#[derive(Debug, Clone)]
pub struct StaticAddress(pub Ipv4Addr);

#[async_trait]
impl PodAddressProvider for StaticAddress {
    async fn pod_address(&self) -> Result<Ipv4Addr> {
        Ok(self.0)
    }
}

/// 可随时修改的配置来源
#[derive(Debug, Default)]
pub struct SharedConfig {
    use_default_config: Mutex<bool>,
}

impl SharedConfig {
    pub fn new(use_default_config: bool) -> Self {
        Self {
            use_default_config: Mutex::new(use_default_config),
        }
    }

    pub async fn set_use_default_config(&self, use_default_config: bool) {
        *self.use_default_config.lock().await = use_default_config;
    }
}

#[async_trait]
impl ConfigSource for SharedConfig {
    async fn use_default_config(&self) -> Result<bool> {
        Ok(*self.use_default_config.lock().await)
    }
}

/// 记录所有发布过的状态
#[derive(Debug, Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<Status>>,
}

impl RecordingReporter {
    pub async fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().await.clone()
    }

    pub async fn last(&self) -> Option<Status> {
        self.statuses.lock().await.last().cloned()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn set_status(&self, status: &Status) -> Result<()> {
        self.statuses.lock().await.push(status.clone());
        Ok(())
    }
}

/// 记录动作结果，失败时保存消息
#[derive(Debug, Default)]
pub struct RecordingActions {
    results: Mutex<Vec<(String, std::result::Result<(), String>)>>,
}

impl RecordingActions {
    pub async fn results(&self) -> Vec<(String, std::result::Result<(), String>)> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl ActionReporter for RecordingActions {
    async fn report(
        &self,
        action_id: &str,
        result: &std::result::Result<(), ActionError>,
    ) -> Result<()> {
        let recorded = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        self.results
            .lock()
            .await
            .push((action_id.to_string(), recorded));
        Ok(())
    }
}
