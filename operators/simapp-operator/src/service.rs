//! 服务暴露模块
//!
//! 启动时为工作负载声明固定的两个端口。

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::info;

/// 字段管理者名称
const FIELD_MANAGER: &str = "simapp-operator";

/// 对外暴露的端口
pub const SERVICE_PORTS: [(&str, i32); 2] = [("prometheus-exporter", 9089), ("config-exporter", 8080)];

/// 构建 Service 资源
pub fn service_for(name: &str, namespace: &str) -> Service {
    let selector = BTreeMap::from([("app".to_string(), name.to_string())]);

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(selector.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(
                SERVICE_PORTS
                    .iter()
                    .map(|(port_name, port)| ServicePort {
                        name: Some(port_name.to_string()),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 以 server-side apply 方式声明 Service
pub async fn expose_ports(client: Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let service = service_for(name, namespace);

    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&service),
    )
    .await
    .context("声明 Service 端口失败")?;

    info!("已声明 Service {}/{} 端口", namespace, name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ports() {
        let service = service_for("simapp", "core");
        let ports = service.spec.unwrap().ports.unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name.as_deref(), Some("prometheus-exporter"));
        assert_eq!(ports[0].port, 9089);
        assert_eq!(ports[1].name.as_deref(), Some("config-exporter"));
        assert_eq!(ports[1].port, 8080);
        assert_eq!(service.metadata.namespace.as_deref(), Some("core"));
    }
}
