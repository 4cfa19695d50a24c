//! 工作负载协调模块
//!
//! 该模块根据触发事件和当前可观测条件（容器是否可达、配置文件是否存在）
//! 计算工作负载状态，并在条件满足时写入默认配置、声明服务或执行一次二进制。
//! 协调器不保存跨调用的状态，每次都从外部条件重新推导。

use simapp_common::{ActionError, Layer, Override, Result, ServiceSpec, Startup, Status};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Activation, Profile, Provisioning, DEFAULT_CONFIG, SERVICE_NAME};
use crate::workload::{ExecRequest, PodAddressProvider, StatusReporter, Workload};

pub const WAITING_FOR_CONTAINER: &str = "Waiting for container to be ready";
pub const WAITING_FOR_CONFIG: &str = "Waiting for config file to be written";
pub const BLOCKED_FOR_CONFIG: &str =
    "Use `kubectl cp` to copy the config file to the unit and run the `configure-network` action";

/// 环境变量名：Pod 地址
const POD_IP_ENV: &str = "POD_IP";

/// 环境事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 处理完成，附带发布的状态（没有发布时为 `None`）
    Settled(Option<Status>),
    /// 条件未满足，事件需要稍后重新投递
    Deferred(Status),
}

impl Outcome {
    pub fn status(&self) -> Option<&Status> {
        match self {
            Outcome::Settled(status) => status.as_ref(),
            Outcome::Deferred(status) => Some(status),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }
}

/// 协调器结构体
pub struct Reconciler {
    /// 受管容器
    workload: Arc<dyn Workload>,
    /// Pod 网络身份
    identity: Arc<dyn PodAddressProvider>,
    /// 状态发布
    reporter: Arc<dyn StatusReporter>,
    /// 协调策略
    profile: Profile,
}

impl Reconciler {
    /// 创建新的协调器
    pub fn new(
        workload: Arc<dyn Workload>,
        identity: Arc<dyn PodAddressProvider>,
        reporter: Arc<dyn StatusReporter>,
        profile: Profile,
    ) -> Self {
        Self {
            workload,
            identity,
            reporter,
            profile,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// 替换协调策略，配置变更时调用
    pub fn set_profile(&mut self, profile: Profile) {
        if profile != self.profile {
            debug!("协调策略变更: {:?}", profile);
        }
        self.profile = profile;
    }

    /// 处理配置变更事件
    pub async fn on_config_changed(&self) -> Result<Outcome> {
        if !self.workload.can_connect().await {
            let status = Status::waiting(WAITING_FOR_CONTAINER);
            self.publish(&status).await?;
            warn!("容器尚未就绪，推迟配置变更事件");
            return Ok(Outcome::Deferred(status));
        }

        if self.profile.provisioning == Provisioning::WriteDefault {
            self.write_default_config().await?;
            return self.on_workload_ready().await;
        }

        debug!("配置由人工提供，配置变更无需处理");
        Ok(Outcome::Settled(None))
    }

    /// 处理工作负载就绪事件
    pub async fn on_workload_ready(&self) -> Result<Outcome> {
        if !self.config_file_is_written().await? {
            let status = match self.profile.provisioning {
                Provisioning::WriteDefault => Status::waiting(WAITING_FOR_CONFIG),
                Provisioning::HumanProvided => Status::blocked(BLOCKED_FOR_CONFIG),
            };
            self.publish(&status).await?;
            return Ok(Outcome::Settled(Some(status)));
        }

        self.declare_service().await?;
        self.publish(&Status::Active).await?;
        Ok(Outcome::Settled(Some(Status::Active)))
    }

    /// 处理 `configure-network` 动作
    ///
    /// 前置条件不满足时直接返回失败，不修改工作负载和状态。
    pub async fn on_configure_network_action(&self) -> std::result::Result<(), ActionError> {
        if !self.workload.can_connect().await {
            return Err(ActionError::Unreachable);
        }
        if !self.config_file_is_written().await? {
            return Err(ActionError::MissingConfig);
        }

        match self.profile.activation {
            Activation::DeclareService => self.declare_service().await?,
            Activation::OneShotExec => self.run_once().await?,
        }

        self.publish(&Status::Active).await?;
        Ok(())
    }

    /// 写入默认配置文件
    async fn write_default_config(&self) -> Result<()> {
        self.workload
            .push(&self.profile.config_path, DEFAULT_CONFIG.as_bytes())
            .await?;
        info!("默认配置文件已写入: {}", self.profile.config_path);
        Ok(())
    }

    async fn config_file_is_written(&self) -> Result<bool> {
        let written = self.workload.exists(&self.profile.config_path).await?;
        if written {
            info!("配置文件已写入");
        } else {
            info!("配置文件尚未写入: {}", self.profile.config_path);
        }
        Ok(written)
    }

    /// 声明服务层并重新规划
    async fn declare_service(&self) -> Result<()> {
        let layer = self.service_layer().await?;
        self.workload.add_layer(SERVICE_NAME, &layer, true).await?;
        self.workload.replan().await?;
        info!("服务层 {} 已声明并重新规划", SERVICE_NAME);
        Ok(())
    }

    /// 同步执行一次二进制
    async fn run_once(&self) -> std::result::Result<(), ActionError> {
        let request = ExecRequest {
            command: self.profile.exec_command.clone(),
            environment: self.environment().await?,
            timeout: self.profile.exec_timeout,
        };
        info!("执行 {:?}", request.command);

        let output = match self.workload.exec(request).await {
            Ok(output) => output,
            Err(e) => {
                error!("执行 simapp 失败: {}", e);
                return Err(ActionError::ProcessExecFault {
                    message: format!("Failed to run simapp: {}", e),
                    stderr: String::new(),
                });
            }
        };

        if !output.success() {
            error!(
                "simapp 退出码 {}，错误输出: {}",
                output.exit_code, output.stderr
            );
            return Err(ActionError::ProcessExecFault {
                message: format!("simapp exited with code {}", output.exit_code),
                stderr: output.stderr,
            });
        }

        debug!("simapp 输出: {}", output.stdout);
        Ok(())
    }

    /// 构建服务层
    async fn service_layer(&self) -> Result<Layer> {
        let service = ServiceSpec {
            override_mode: Some(Override::Replace),
            summary: None,
            startup: Some(Startup::Enabled),
            command: Some(self.profile.service_command.clone()),
            environment: self.environment().await?,
        };

        Ok(Layer {
            summary: "simapp layer".to_string(),
            description: "pebble config layer for simapp".to_string(),
            services: BTreeMap::from([(SERVICE_NAME.to_string(), service)]),
        })
    }

    async fn environment(&self) -> Result<BTreeMap<String, String>> {
        let address = self.identity.pod_address().await?;
        Ok(BTreeMap::from([(POD_IP_ENV.to_string(), address.to_string())]))
    }

    async fn publish(&self, status: &Status) -> Result<()> {
        self.reporter.set_status(status).await?;
        info!("工作负载状态: {}", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperatorConfig, PROVIDED_CONFIG_PATH, DEFAULT_CONFIG_PATH};
    use crate::testing::{FakeWorkload, RecordingReporter, StaticAddress};
    use crate::workload::{ExecOutput, MockPodAddressProvider, MockStatusReporter};
    use rstest::rstest;
    use simapp_common::Error;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const POD_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);

    struct Harness {
        workload: Arc<FakeWorkload>,
        reporter: Arc<RecordingReporter>,
        reconciler: Reconciler,
    }

    fn harness(connectable: bool, use_default_config: bool, activation: Activation) -> Harness {
        let workload = Arc::new(FakeWorkload::new(connectable));
        let reporter = Arc::new(RecordingReporter::default());
        let config = OperatorConfig {
            activation,
            ..Default::default()
        };
        let reconciler = Reconciler::new(
            workload.clone(),
            Arc::new(StaticAddress(POD_IP)),
            reporter.clone(),
            config.profile(use_default_config),
        );
        Harness {
            workload,
            reporter,
            reconciler,
        }
    }

    fn expected_service() -> ServiceSpec {
        ServiceSpec {
            override_mode: Some(Override::Replace),
            summary: None,
            startup: Some(Startup::Enabled),
            command: Some("/simapp/bin/simapp".to_string()),
            environment: BTreeMap::from([("POD_IP".to_string(), "1.2.3.4".to_string())]),
        }
    }

    #[rstest]
    #[case(false, Activation::DeclareService)]
    #[case(false, Activation::OneShotExec)]
    #[case(true, Activation::DeclareService)]
    #[tokio::test]
    async fn test_action_fails_when_container_unreachable(
        #[case] use_default_config: bool,
        #[case] activation: Activation,
    ) {
        let h = harness(false, use_default_config, activation);

        let result = h.reconciler.on_configure_network_action().await;

        assert_eq!(result.unwrap_err().to_string(), "Container is not ready");
        assert!(h.reporter.statuses().await.is_empty());
        assert!(h.workload.layers().await.is_empty());
        assert!(h.workload.execs().await.is_empty());
    }

    #[rstest]
    #[case(false, Activation::DeclareService)]
    #[case(false, Activation::OneShotExec)]
    #[case(true, Activation::DeclareService)]
    #[tokio::test]
    async fn test_action_fails_when_config_missing(
        #[case] use_default_config: bool,
        #[case] activation: Activation,
    ) {
        let h = harness(true, use_default_config, activation);

        let result = h.reconciler.on_configure_network_action().await;

        assert_eq!(result.unwrap_err().to_string(), "Config file is not written");
        assert!(h.reporter.statuses().await.is_empty());
        assert!(h.workload.layers().await.is_empty());
        assert!(h.workload.execs().await.is_empty());
    }

    #[rstest]
    #[case(Activation::DeclareService)]
    #[case(Activation::OneShotExec)]
    #[tokio::test]
    async fn test_action_succeeds_when_config_present(#[case] activation: Activation) {
        let h = harness(true, false, activation);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        h.reconciler.on_configure_network_action().await.unwrap();

        assert_eq!(h.reporter.last().await, Some(Status::Active));
    }

    #[test_log::test(tokio::test)]
    async fn test_action_executes_simapp_with_pod_ip() {
        let h = harness(true, false, Activation::OneShotExec);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        h.reconciler.on_configure_network_action().await.unwrap();

        let execs = h.workload.execs().await;
        assert_eq!(execs.len(), 1);
        assert_eq!(
            execs[0].command,
            vec!["./bin/simapp", "-simapp", "/etc/simapp/simappcfg.conf"]
        );
        assert_eq!(
            execs[0].environment,
            BTreeMap::from([("POD_IP".to_string(), "1.2.3.4".to_string())])
        );
        assert_eq!(execs[0].timeout, Duration::from_secs(300));
        assert_eq!(h.reporter.statuses().await, vec![Status::Active]);
    }

    #[tokio::test]
    async fn test_action_reports_nonzero_exit() {
        let h = harness(true, false, Activation::OneShotExec);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;
        h.workload
            .set_exec_result(Ok(ExecOutput {
                stdout: String::new(),
                stderr: "invalid config".to_string(),
                exit_code: 2,
            }))
            .await;

        let err = h.reconciler.on_configure_network_action().await.unwrap_err();

        match err {
            ActionError::ProcessExecFault { message, stderr } => {
                assert_eq!(message, "simapp exited with code 2");
                assert_eq!(stderr, "invalid config");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.reporter.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_action_reports_exec_fault() {
        let h = harness(true, false, Activation::OneShotExec);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;
        h.workload.set_exec_result(Err("timed out".to_string())).await;

        let err = h.reconciler.on_configure_network_action().await.unwrap_err();

        assert!(matches!(err, ActionError::ProcessExecFault { .. }));
        assert!(err.to_string().starts_with("Failed to run simapp"));
        assert!(h.reporter.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_action_declares_simapp_layer() {
        let h = harness(true, false, Activation::DeclareService);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        h.reconciler.on_configure_network_action().await.unwrap();

        let plan = h.workload.plan().await;
        assert_eq!(plan.services.len(), 1);
        assert_eq!(plan.service("simapp"), Some(&expected_service()));
        assert_eq!(h.workload.replans().await, 1);

        let layers = h.workload.layers().await;
        assert_eq!(layers[0].label, "simapp");
        assert!(layers[0].combine);
    }

    #[rstest]
    #[case(true, Status::waiting(WAITING_FOR_CONFIG))]
    #[case(false, Status::blocked(BLOCKED_FOR_CONFIG))]
    #[tokio::test]
    async fn test_ready_without_config_is_never_active(
        #[case] use_default_config: bool,
        #[case] expected: Status,
    ) {
        let h = harness(true, use_default_config, Activation::DeclareService);

        let outcome = h.reconciler.on_workload_ready().await.unwrap();

        assert_eq!(outcome, Outcome::Settled(Some(expected.clone())));
        assert_eq!(h.reporter.statuses().await, vec![expected]);
        assert!(h.workload.layers().await.is_empty());
    }

    #[tokio::test]
    async fn test_ready_twice_is_idempotent() {
        let h = harness(true, false, Activation::DeclareService);
        h.workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        let first = h.reconciler.on_workload_ready().await.unwrap();
        let second = h.reconciler.on_workload_ready().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status(), Some(&Status::Active));

        let layers = h.workload.layers().await;
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], layers[1]);
        assert_eq!(h.workload.plan().await.service("simapp"), Some(&expected_service()));
    }

    #[tokio::test]
    async fn test_config_changed_defers_when_unreachable() {
        let h = harness(false, true, Activation::DeclareService);

        let outcome = h.reconciler.on_config_changed().await.unwrap();

        assert!(outcome.is_deferred());
        assert_eq!(
            h.reporter.statuses().await,
            vec![Status::waiting(WAITING_FOR_CONTAINER)]
        );
        assert!(h.workload.pushes().await.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_config_changed_writes_default_config() {
        let h = harness(true, true, Activation::DeclareService);

        let outcome = h.reconciler.on_config_changed().await.unwrap();

        assert_eq!(outcome, Outcome::Settled(Some(Status::Active)));
        assert_eq!(h.workload.pushes().await, vec![DEFAULT_CONFIG_PATH.to_string()]);
        assert_eq!(
            h.workload.file(DEFAULT_CONFIG_PATH).await,
            Some(DEFAULT_CONFIG.as_bytes().to_vec())
        );
        assert_eq!(h.workload.plan().await.service("simapp"), Some(&expected_service()));
    }

    #[tokio::test]
    async fn test_config_changed_leaves_human_provided_config_alone() {
        let h = harness(true, false, Activation::DeclareService);

        let outcome = h.reconciler.on_config_changed().await.unwrap();

        assert_eq!(outcome, Outcome::Settled(None));
        assert!(h.workload.pushes().await.is_empty());
        assert!(h.reporter.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_identity_failure_propagates() {
        let workload = Arc::new(FakeWorkload::new(true));
        workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        let mut identity = MockPodAddressProvider::new();
        identity
            .expect_pod_address()
            .times(1)
            .returning(|| Err(Error::NetworkIdentity("podIP 未分配".to_string())));

        let mut reporter = MockStatusReporter::new();
        reporter.expect_set_status().never();

        let reconciler = Reconciler::new(
            workload.clone(),
            Arc::new(identity),
            Arc::new(reporter),
            Profile::default(),
        );

        let err = reconciler.on_configure_network_action().await.unwrap_err();
        assert!(matches!(err, ActionError::Platform(Error::NetworkIdentity(_))));
        assert!(workload.layers().await.is_empty());
    }

    #[tokio::test]
    async fn test_active_is_published_once_per_action() {
        let workload = Arc::new(FakeWorkload::new(true));
        workload.put_file(PROVIDED_CONFIG_PATH, b"network: {}").await;

        let mut identity = MockPodAddressProvider::new();
        identity.expect_pod_address().returning(|| Ok(POD_IP));

        let mut reporter = MockStatusReporter::new();
        reporter
            .expect_set_status()
            .withf(|status| *status == Status::Active)
            .times(1)
            .returning(|_| Ok(()));

        let reconciler = Reconciler::new(
            workload,
            Arc::new(identity),
            Arc::new(reporter),
            Profile::default(),
        );

        reconciler.on_configure_network_action().await.unwrap();
    }
}
