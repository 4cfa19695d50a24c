//! 服务层模型
//!
//! 描述交给进程监管层（Pebble）的服务声明。多个层按顺序合并成计划：
//! `replace` 覆盖同名服务的全部声明，`merge` 只覆盖本层给出的字段。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Error, Result};

/// 同名服务的合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    Replace,
    Merge,
}

/// 服务启动策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Enabled,
    Disabled,
}

/// 单个受监管服务的声明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// 合并方式，层内的服务必须给出
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_mode: Option<Override>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Startup>,

    /// 启动命令行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// 环境变量
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// 用 `other` 中给出的字段覆盖当前声明
    fn merge_from(&mut self, other: &ServiceSpec) {
        if other.override_mode.is_some() {
            self.override_mode = other.override_mode;
        }
        if other.summary.is_some() {
            self.summary = other.summary.clone();
        }
        if other.startup.is_some() {
            self.startup = other.startup;
        }
        if other.command.is_some() {
            self.command = other.command.clone();
        }
        self.environment
            .extend(other.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// 服务层
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Layer {
    /// 渲染为 YAML，供监管层的 `add` 命令读取
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// 从 YAML 解析服务层
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// 合并后的监管计划
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Plan {
    /// 将服务层合并进计划
    ///
    /// 校验先于修改：任一服务缺少 `override` 时整个层被拒绝，计划保持不变。
    pub fn combine(&mut self, layer: &Layer) -> Result<()> {
        if let Some((name, _)) = layer
            .services
            .iter()
            .find(|(_, service)| service.override_mode.is_none())
        {
            return Err(Error::Layer(format!(
                "服务 {} 缺少 override 字段，必须为 replace 或 merge",
                name
            )));
        }

        for (name, service) in &layer.services {
            debug!("合并服务 {} ({:?})", name, service.override_mode);
            match service.override_mode {
                Some(Override::Merge) => {
                    self.services
                        .entry(name.clone())
                        .or_default()
                        .merge_from(service);
                }
                _ => {
                    self.services.insert(name.clone(), service.clone());
                }
            }
        }

        Ok(())
    }

    /// 获取服务声明
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(command: &str, env: &[(&str, &str)], mode: Override) -> ServiceSpec {
        ServiceSpec {
            override_mode: Some(mode),
            summary: None,
            startup: Some(Startup::Enabled),
            command: Some(command.to_string()),
            environment: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn layer_with(name: &str, spec: ServiceSpec) -> Layer {
        let mut layer = Layer::default();
        layer.services.insert(name.to_string(), spec);
        layer
    }

    #[test]
    fn test_replace_overwrites_existing_service() {
        let mut plan = Plan::default();
        plan.combine(&layer_with(
            "simapp",
            service("/old", &[("POD_IP", "10.0.0.1"), ("DEBUG", "1")], Override::Replace),
        ))
        .unwrap();
        plan.combine(&layer_with(
            "simapp",
            service("/simapp/bin/simapp", &[("POD_IP", "10.0.0.2")], Override::Replace),
        ))
        .unwrap();

        let simapp = plan.service("simapp").unwrap();
        assert_eq!(simapp.command.as_deref(), Some("/simapp/bin/simapp"));
        assert_eq!(simapp.environment.len(), 1);
        assert_eq!(simapp.environment["POD_IP"], "10.0.0.2");
    }

    #[test]
    fn test_merge_overlays_fields() {
        let mut plan = Plan::default();
        plan.combine(&layer_with(
            "simapp",
            service("/simapp/bin/simapp", &[("POD_IP", "10.0.0.1")], Override::Replace),
        ))
        .unwrap();

        let overlay = ServiceSpec {
            override_mode: Some(Override::Merge),
            environment: [("LOG_LEVEL".to_string(), "debug".to_string())].into(),
            ..Default::default()
        };
        plan.combine(&layer_with("simapp", overlay)).unwrap();

        let simapp = plan.service("simapp").unwrap();
        assert_eq!(simapp.command.as_deref(), Some("/simapp/bin/simapp"));
        assert_eq!(simapp.environment["POD_IP"], "10.0.0.1");
        assert_eq!(simapp.environment["LOG_LEVEL"], "debug");
        assert_eq!(simapp.override_mode, Some(Override::Merge));
    }

    #[test]
    fn test_missing_override_is_rejected() {
        let mut plan = Plan::default();
        let layer = layer_with(
            "simapp",
            ServiceSpec {
                command: Some("/simapp/bin/simapp".to_string()),
                ..Default::default()
            },
        );

        assert!(matches!(plan.combine(&layer), Err(Error::Layer(_))));
        assert!(plan.services.is_empty());
    }

    #[test]
    fn test_combining_twice_is_stable() {
        let layer = layer_with(
            "simapp",
            service("/simapp/bin/simapp", &[("POD_IP", "1.2.3.4")], Override::Replace),
        );
        let mut plan = Plan::default();
        plan.combine(&layer).unwrap();
        let first = plan.clone();
        plan.combine(&layer).unwrap();

        assert_eq!(plan, first);
    }

    #[test]
    fn test_layer_yaml_uses_supervisor_field_names() {
        let layer = layer_with(
            "simapp",
            service("/simapp/bin/simapp", &[("POD_IP", "1.2.3.4")], Override::Replace),
        );
        let yaml = layer.to_yaml().unwrap();

        assert!(yaml.contains("override: replace"));
        assert!(yaml.contains("startup: enabled"));
        assert_eq!(Layer::from_yaml(&yaml).unwrap(), layer);
    }
}
