//! Pod 工作负载模块
//!
//! 通过 Kubernetes API 实现工作负载句柄：容器是否可达取自 Pod 的容器状态，
//! 文件与进程操作经由 `pods/exec` 子资源在容器内完成，服务层交给容器内的
//! `pebble` 命令管理。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status as ExecStatus;
use kube::api::{Api, AttachParams};
use kube::Client;
use simapp_common::{Error, IntoError, Layer, Plan, Result};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::workload::{ExecOutput, ExecRequest, PodAddressProvider, Workload};

/// 服务层文件在容器内的存放目录
const LAYER_DIR: &str = "/tmp/simapp-operator/layers";

/// 写文件脚本，`$1` 为路径，`$2` 为内容
const PUSH_SCRIPT: &str = r#"mkdir -p "$(dirname "$1")" && printf '%s' "$2" > "$1""#;

/// 容器是否已就绪
pub fn container_ready(pod: &Pod, container: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == container))
        .map(|s| s.ready)
        .unwrap_or(false)
}

/// 解析 Pod 的 IPv4 地址
pub fn pod_ipv4(pod: &Pod) -> Result<Ipv4Addr> {
    match pod.status.as_ref().and_then(|status| status.pod_ip.as_deref()) {
        Some(ip) => ip
            .parse()
            .map_err(|e| Error::NetworkIdentity(format!("无效的 Pod 地址 {}: {}", ip, e))),
        None => "Pod 尚未分配地址".into_error(Error::NetworkIdentity),
    }
}

/// 将环境变量前置到命令上，容器内执行 `env K=V cmd...`
pub fn with_environment(request: &ExecRequest) -> Vec<String> {
    let mut command = Vec::with_capacity(1 + request.environment.len() + request.command.len());
    command.push("env".to_string());
    command.extend(
        request
            .environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value)),
    );
    command.extend(request.command.iter().cloned());
    command
}

/// 写入文件的命令，路径和内容都作为位置参数传入
fn push_command(path: &str, content: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        PUSH_SCRIPT.to_string(),
        "sh".to_string(),
        path.to_string(),
        content.to_string(),
    ]
}

/// 从 exec 返回的状态中取出退出码
///
/// 连接在状态送达前断开时无法判断子进程是否成功，视为执行失败。
fn exit_code(status: Option<&ExecStatus>) -> Result<i32> {
    let Some(status) = status else {
        return Err(Error::Exec(
            "exec stream closed without an exit status".to_string(),
        ));
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(0);
    }

    let code = status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.as_deref())
        .and_then(|message| message.parse().ok())
        .unwrap_or(1);
    Ok(code)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<String> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn kube_error(e: kube::Error) -> Error {
    Error::Kube(e.to_string())
}

/// 基于 Pod 的工作负载
pub struct PodWorkload {
    pods: Api<Pod>,
    pod_name: String,
    container: String,
    /// 已声明服务层合并后的计划
    plan: Mutex<Plan>,
}

impl PodWorkload {
    pub fn new(client: Client, namespace: &str, pod_name: &str, container: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            pod_name: pod_name.to_string(),
            container: container.to_string(),
            plan: Mutex::new(Plan::default()),
        }
    }

    /// 当前计划
    pub async fn plan(&self) -> Plan {
        self.plan.lock().await.clone()
    }

    /// 在容器内执行命令并收集输出
    async fn run(&self, command: Vec<String>) -> Result<ExecOutput> {
        debug!("在 {}/{} 中执行 {:?}", self.pod_name, self.container, command);

        let params = AttachParams::default()
            .container(self.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut process = self
            .pods
            .exec(&self.pod_name, command, &params)
            .await
            .map_err(kube_error)?;

        let stdout = process.stdout();
        let stderr = process.stderr();
        let status = process.take_status();

        let (stdout, stderr) = tokio::join!(read_all(stdout), read_all(stderr));
        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        process
            .join()
            .await
            .map_err(|e| Error::Exec(e.to_string()))?;

        Ok(ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
            exit_code: exit_code(status.as_ref())?,
        })
    }
}

#[async_trait]
impl Workload for PodWorkload {
    async fn can_connect(&self) -> bool {
        match self.pods.get_opt(&self.pod_name).await {
            Ok(Some(pod)) => container_ready(&pod, &self.container),
            Ok(None) => {
                debug!("Pod {} 不存在", self.pod_name);
                false
            }
            Err(e) => {
                warn!("获取 Pod {} 失败: {}", self.pod_name, e);
                false
            }
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let output = self
            .run(vec!["test".to_string(), "-f".to_string(), path.to_string()])
            .await?;
        Ok(output.success())
    }

    async fn push(&self, path: &str, content: &[u8]) -> Result<()> {
        let content = std::str::from_utf8(content)
            .map_err(|e| Error::Workload(format!("文件内容不是 UTF-8: {}", e)))?;
        let output = self.run(push_command(path, content)).await?;

        if !output.success() {
            return Err(Error::Workload(format!(
                "写入 {} 失败: {}",
                path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        let timeout = request.timeout;
        let command = with_environment(&request);

        tokio::time::timeout(timeout, self.run(command))
            .await
            .map_err(|_| Error::Exec(format!("等待子进程超过 {:?}", timeout)))?
    }

    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool) -> Result<()> {
        // 先校验合并结果，失败时不触碰容器
        let mut merged = if combine {
            self.plan.lock().await.clone()
        } else {
            Plan::default()
        };
        merged.combine(layer)?;

        let path = format!("{}/{}.yaml", LAYER_DIR, label);
        self.push(&path, layer.to_yaml()?.as_bytes()).await?;

        let mut command = vec!["pebble".to_string(), "add".to_string()];
        if combine {
            command.push("--combine".to_string());
        }
        command.push(label.to_string());
        command.push(path);

        let output = self.run(command).await?;
        if !output.success() {
            return Err(Error::Layer(format!(
                "添加服务层 {} 失败: {}",
                label,
                output.stderr.trim()
            )));
        }

        *self.plan.lock().await = merged;
        info!("服务层 {} 已添加到 {}", label, self.pod_name);
        Ok(())
    }

    async fn replan(&self) -> Result<()> {
        let output = self
            .run(vec!["pebble".to_string(), "replan".to_string()])
            .await?;
        if !output.success() {
            return Err(Error::Workload(format!(
                "重新规划失败: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

/// 从 Pod 状态读取网络身份
pub struct PodAddress {
    pods: Api<Pod>,
    pod_name: String,
}

impl PodAddress {
    pub fn new(client: Client, namespace: &str, pod_name: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            pod_name: pod_name.to_string(),
        }
    }
}

#[async_trait]
impl PodAddressProvider for PodAddress {
    async fn pod_address(&self) -> Result<Ipv4Addr> {
        let pod = self.pods.get(&self.pod_name).await.map_err(kube_error)?;
        pod_ipv4(&pod)
    }
}
