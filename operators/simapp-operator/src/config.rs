//! 配置管理模块
//!
//! 该模块负责加载 Operator 的配置文件（YAML/JSON），并叠加 `SIMAPP_` 前缀的环境变量。
//! 配置决定两条策略轴：配置文件由谁提供（写入默认配置 / 人工放置），
//! 以及如何启动服务（声明受监管服务 / 一次性执行）。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 写入默认配置时使用的配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "/simapp/config/simapp.yaml";

/// 人工提供配置时使用的配置文件路径
pub const PROVIDED_CONFIG_PATH: &str = "/etc/simapp/simappcfg.conf";

/// 受监管服务名称，同时作为服务层标签
pub const SERVICE_NAME: &str = "simapp";

/// 默认配置文件内容
pub const DEFAULT_CONFIG: &str = include_str!("../files/default_config.yaml");

/// 配置文件提供方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provisioning {
    /// 由 Operator 写入默认配置
    WriteDefault,
    /// 由人工拷贝到容器中
    HumanProvided,
}

impl Provisioning {
    /// 对应自定义资源上的 `useDefaultConfig` 选项
    pub fn from_use_default_config(use_default_config: bool) -> Self {
        if use_default_config {
            Provisioning::WriteDefault
        } else {
            Provisioning::HumanProvided
        }
    }

    /// 该方式下配置文件的默认路径
    pub fn default_config_path(self) -> &'static str {
        match self {
            Provisioning::WriteDefault => DEFAULT_CONFIG_PATH,
            Provisioning::HumanProvided => PROVIDED_CONFIG_PATH,
        }
    }
}

/// 服务启动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    /// 向监管层声明服务并重新规划
    #[default]
    DeclareService,
    /// 同步执行一次二进制
    OneShotExec,
}

/// Operator 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 命名空间
    pub namespace: String,
    /// SimApp 资源名称
    pub name: String,
    /// 工作负载所在 Pod
    pub pod_name: String,
    /// 工作负载容器
    pub container_name: String,
    /// 固定的配置提供方式，未设置时由 `useDefaultConfig` 决定
    pub provisioning: Option<Provisioning>,
    /// 服务启动方式
    pub activation: Activation,
    /// 配置文件路径，未设置时按提供方式选择
    pub config_path: Option<String>,
    /// 受监管服务的命令行
    pub service_command: String,
    /// 一次性执行的二进制（相对于容器工作目录）
    pub exec_binary: String,
    /// 一次性执行的超时（秒）
    pub exec_timeout_secs: u64,
    /// 推迟事件的重新投递间隔（秒）
    pub defer_interval_secs: u64,
    /// 日志级别
    pub log_level: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: "simapp".to_string(),
            pod_name: "simapp-0".to_string(),
            container_name: "simapp".to_string(),
            provisioning: None,
            activation: Activation::DeclareService,
            config_path: None,
            service_command: "/simapp/bin/simapp".to_string(),
            exec_binary: "./bin/simapp".to_string(),
            exec_timeout_secs: 300,
            defer_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl OperatorConfig {
    /// 加载配置：默认值 < 配置文件 < 环境变量
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&OperatorConfig::default()).context("构建默认配置失败")?);

        if let Some(path) = config_path {
            let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
            };

            builder = builder.add_source(File::new(config_file, format));
        }

        let config = builder
            .add_source(Environment::with_prefix("SIMAPP"))
            .build()
            .context("构建配置失败")?;

        config
            .try_deserialize::<OperatorConfig>()
            .with_context(|| format!("配置格式错误: {:?}", config_path))
    }

    /// 按资源上的 `useDefaultConfig` 选项生成本次协调使用的策略
    pub fn profile(&self, use_default_config: bool) -> Profile {
        let provisioning = self
            .provisioning
            .unwrap_or_else(|| Provisioning::from_use_default_config(use_default_config));
        let config_path = self
            .config_path
            .clone()
            .unwrap_or_else(|| provisioning.default_config_path().to_string());

        Profile {
            provisioning,
            activation: self.activation,
            exec_command: vec![
                self.exec_binary.clone(),
                "-simapp".to_string(),
                config_path.clone(),
            ],
            config_path,
            service_command: self.service_command.clone(),
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
        }
    }

    pub fn defer_interval(&self) -> Duration {
        Duration::from_secs(self.defer_interval_secs)
    }
}

/// 协调策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub provisioning: Provisioning,
    pub activation: Activation,
    /// 配置文件路径
    pub config_path: String,
    /// 受监管服务的命令行
    pub service_command: String,
    /// 一次性执行的完整命令
    pub exec_command: Vec<String>,
    /// 一次性执行的超时
    pub exec_timeout: Duration,
}

impl Default for Profile {
    fn default() -> Self {
        OperatorConfig::default().profile(false)
    }
}
