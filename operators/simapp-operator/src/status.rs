//! 状态回写模块
//!
//! 将工作负载状态写入 `SimApp` 的状态子资源，将动作结果写入 `SimAppAction`
//! 的状态子资源。

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use simapp_common::{ActionError, Error, Result, Status};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crd::{SimApp, SimAppAction, SimAppActionStatus, SimAppStatus};
use crate::workload::{ActionReporter, StatusReporter};

/// 由工作负载状态构建资源状态
pub fn simapp_status(status: &Status) -> SimAppStatus {
    SimAppStatus {
        state: status.state().to_string(),
        message: status.message().map(str::to_string),
        last_updated: Some(chrono::Utc::now()),
    }
}

/// 由动作结果构建动作状态
pub fn action_status(result: &std::result::Result<(), ActionError>) -> SimAppActionStatus {
    let (state, message) = match result {
        Ok(()) => ("Completed", None),
        Err(e) => ("Failed", Some(e.to_string())),
    };

    SimAppActionStatus {
        state: state.to_string(),
        message,
        completed_at: Some(chrono::Utc::now()),
    }
}

/// 写入 `SimApp` 状态
pub struct CrdStatusReporter {
    api: Api<SimApp>,
    name: String,
    /// 上一次发布的状态，相同状态不重复写入
    last: Mutex<Option<Status>>,
}

impl CrdStatusReporter {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StatusReporter for CrdStatusReporter {
    async fn set_status(&self, status: &Status) -> Result<()> {
        let mut last = self.last.lock().await;
        if last.as_ref() == Some(status) {
            debug!("状态未变化，跳过写入: {}", status);
            return Ok(());
        }

        let patch = serde_json::json!({
            "status": simapp_status(status)
        });
        self.api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::Kube(format!("更新 SimApp {} 状态失败: {}", self.name, e)))?;

        *last = Some(status.clone());
        Ok(())
    }
}

/// 写入 `SimAppAction` 状态
pub struct CrdActionReporter {
    api: Api<SimAppAction>,
}

impl CrdActionReporter {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ActionReporter for CrdActionReporter {
    async fn report(
        &self,
        action_id: &str,
        result: &std::result::Result<(), ActionError>,
    ) -> Result<()> {
        let status = action_status(result);
        match &status.message {
            Some(message) => warn!("动作 {} 失败: {}", action_id, message),
            None => info!("动作 {} 已完成", action_id),
        }

        let patch = serde_json::json!({ "status": status });
        self.api
            .patch_status(action_id, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::Kube(format!("更新动作 {} 状态失败: {}", action_id, e)))?;
        Ok(())
    }
}
