//! 事件处理模块
//!
//! 该模块监听 Kubernetes 资源变化，并将其转换为协调器关心的三类生命周期事件：
//! 配置变更（`SimApp` 的 generation 变化）、工作负载就绪（目标容器变为 ready）
//! 和用户动作（新建的 `SimAppAction`）。事件经由通道按顺序交给分发器。
//! 配置变更不携带配置内容，分发器在处理时读取最新的 `SimApp`。

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::Api,
    client::Client,
    runtime::{watcher, WatchStreamExt},
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::crd::{SimApp, SimAppAction};
use crate::pod::container_ready;

/// 生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// 配置变更
    ConfigChanged,
    /// 工作负载容器就绪
    WorkloadReady,
    /// 用户触发的动作
    Action { id: String, action: String },
}

/// 跟踪 `SimApp` 的 generation，只在规范变化时产生事件
#[derive(Debug, Default)]
pub struct ConfigTracker {
    last_generation: Option<i64>,
}

impl ConfigTracker {
    pub fn observe(&mut self, app: &SimApp) -> Option<LifecycleEvent> {
        let generation = app.metadata.generation;
        if self.last_generation.is_some() && self.last_generation == generation {
            return None;
        }
        self.last_generation = generation;
        Some(LifecycleEvent::ConfigChanged)
    }
}

/// 跟踪容器就绪状态，只在未就绪到就绪的转变时产生事件
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    ready: bool,
}

impl ReadinessTracker {
    pub fn observe(&mut self, pod: &Pod, container: &str) -> Option<LifecycleEvent> {
        let ready = container_ready(pod, container);
        let became_ready = ready && !self.ready;
        self.ready = ready;
        became_ready.then_some(LifecycleEvent::WorkloadReady)
    }

    /// Pod 被删除
    pub fn reset(&mut self) {
        self.ready = false;
    }
}

/// 跟踪已分发但尚未写回结果的动作，避免重复执行
///
/// 结果写回或动作被删除后不再跟踪。
#[derive(Debug, Default)]
pub struct ActionTracker {
    dispatched: HashSet<String>,
}

impl ActionTracker {
    pub fn observe(&mut self, action: &SimAppAction, simapp: &str) -> Option<LifecycleEvent> {
        if action.spec.simapp != simapp {
            return None;
        }
        let id = action.name_any();
        if !action.is_pending() {
            self.forget(&id);
            return None;
        }
        if !self.dispatched.insert(id.clone()) {
            return None;
        }
        Some(LifecycleEvent::Action {
            id,
            action: action.spec.action.clone(),
        })
    }

    /// 监听重新列举后，丢弃已不存在的动作
    pub fn restart(&mut self, actions: &[SimAppAction], simapp: &str) -> Vec<LifecycleEvent> {
        let present: HashSet<String> = actions.iter().map(|a| a.name_any()).collect();
        self.dispatched.retain(|id| present.contains(id));
        actions
            .iter()
            .filter_map(|action| self.observe(action, simapp))
            .collect()
    }

    pub fn forget(&mut self, id: &str) {
        self.dispatched.remove(id);
    }

    /// 正在跟踪的动作数量
    pub fn tracked(&self) -> usize {
        self.dispatched.len()
    }
}

/// 已启动的监听任务
#[derive(Debug, Default)]
pub struct WatcherSet {
    handles: Vec<JoinHandle<()>>,
}

impl WatcherSet {
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    /// 取消全部任务，包括仍在等待下一个事件的任务
    pub fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// 事件处理器结构体
pub struct EventHandler {
    /// Kubernetes 客户端
    client: Client,
    namespace: String,
    /// SimApp 资源名称
    name: String,
    pod_name: String,
    container: String,
    /// 事件通道发送端
    event_tx: mpsc::Sender<LifecycleEvent>,
    /// 监听任务
    watchers: WatcherSet,
}

impl EventHandler {
    /// 创建新的事件处理器
    pub fn new(
        client: Client,
        namespace: &str,
        name: &str,
        pod_name: &str,
        container: &str,
        event_tx: mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            pod_name: pod_name.to_string(),
            container: container.to_string(),
            event_tx,
            watchers: WatcherSet::default(),
        }
    }

    /// 启动事件处理器
    pub fn start(&mut self) {
        self.start_simapp_watcher();
        self.start_pod_watcher();
        self.start_action_watcher();
    }

    /// 停止事件处理器，取消所有监听任务
    pub fn stop(&mut self) {
        self.watchers.abort_all();
        info!("事件监听器已停止");
    }

    /// 启动 SimApp 监听器
    fn start_simapp_watcher(&mut self) {
        let api: Api<SimApp> = Api::namespaced(self.client.clone(), &self.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.name));
        let mut tracker = ConfigTracker::default();

        self.watchers.spawn(watch(
            api,
            config,
            self.event_tx.clone(),
            move |event| match event {
                watcher::Event::Applied(app) => tracker.observe(&app).into_iter().collect(),
                watcher::Event::Restarted(apps) => {
                    apps.iter().filter_map(|app| tracker.observe(app)).collect()
                }
                watcher::Event::Deleted(app) => {
                    info!("SimApp {} 已删除", app.name_any());
                    Vec::new()
                }
            },
        ));
    }

    /// 启动 Pod 监听器
    fn start_pod_watcher(&mut self) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let config =
            watcher::Config::default().fields(&format!("metadata.name={}", self.pod_name));
        let container = self.container.clone();
        let mut tracker = ReadinessTracker::default();

        self.watchers.spawn(watch(
            api,
            config,
            self.event_tx.clone(),
            move |event| match event {
                watcher::Event::Applied(pod) => {
                    tracker.observe(&pod, &container).into_iter().collect()
                }
                watcher::Event::Restarted(pods) => pods
                    .iter()
                    .filter_map(|pod| tracker.observe(pod, &container))
                    .collect(),
                watcher::Event::Deleted(_) => {
                    tracker.reset();
                    Vec::new()
                }
            },
        ));
    }

    /// 启动动作监听器
    fn start_action_watcher(&mut self) {
        let api: Api<SimAppAction> = Api::namespaced(self.client.clone(), &self.namespace);
        let simapp = self.name.clone();
        let mut tracker = ActionTracker::default();

        self.watchers.spawn(watch(
            api,
            watcher::Config::default(),
            self.event_tx.clone(),
            move |event| match event {
                watcher::Event::Applied(action) => {
                    tracker.observe(&action, &simapp).into_iter().collect()
                }
                watcher::Event::Restarted(actions) => tracker.restart(&actions, &simapp),
                watcher::Event::Deleted(action) => {
                    tracker.forget(&action.name_any());
                    Vec::new()
                }
            },
        ));
    }
}

/// 监听资源并将转换后的事件发送到通道
async fn watch<K, F>(
    api: Api<K>,
    config: watcher::Config,
    event_tx: mpsc::Sender<LifecycleEvent>,
    mut convert: F,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
    F: FnMut(watcher::Event<K>) -> Vec<LifecycleEvent> + Send + 'static,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut stream = watcher(api, config).default_backoff().boxed();

    info!("启动 {} 监听器", kind);

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                for event in convert(event) {
                    debug!("{} 监听器产生事件: {:?}", kind, event);
                    if event_tx.send(event).await.is_err() {
                        error!("事件通道已关闭，{} 监听器退出", kind);
                        return;
                    }
                }
            }
            Err(e) => error!("{} 监听器错误: {}", kind, e),
        }
    }

    info!("{} 监听器已停止", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SimAppActionSpec, SimAppActionStatus, SimAppSpec};
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

    fn simapp(generation: i64, use_default_config: bool) -> SimApp {
        let mut app = SimApp::new("simapp", SimAppSpec { use_default_config });
        app.metadata.generation = Some(generation);
        app
    }

    fn pod(ready: bool) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "simapp".to_string(),
                    ready,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn action(name: &str, simapp: &str) -> SimAppAction {
        SimAppAction::new(
            name,
            SimAppActionSpec {
                simapp: simapp.to_string(),
                action: "configure-network".to_string(),
            },
        )
    }

    #[test]
    fn test_config_changes_only_on_new_generation() {
        let mut tracker = ConfigTracker::default();

        assert_eq!(
            tracker.observe(&simapp(1, false)),
            Some(LifecycleEvent::ConfigChanged)
        );
        // 仅状态变化，generation 不变
        assert_eq!(tracker.observe(&simapp(1, false)), None);
        assert_eq!(
            tracker.observe(&simapp(2, true)),
            Some(LifecycleEvent::ConfigChanged)
        );
    }

    #[test]
    fn test_ready_only_on_transition() {
        let mut tracker = ReadinessTracker::default();

        assert_eq!(tracker.observe(&pod(false), "simapp"), None);
        assert_eq!(
            tracker.observe(&pod(true), "simapp"),
            Some(LifecycleEvent::WorkloadReady)
        );
        assert_eq!(tracker.observe(&pod(true), "simapp"), None);

        tracker.reset();
        assert_eq!(
            tracker.observe(&pod(true), "simapp"),
            Some(LifecycleEvent::WorkloadReady)
        );
    }

    #[test]
    fn test_actions_dispatched_once() {
        let mut tracker = ActionTracker::default();

        assert_eq!(
            tracker.observe(&action("configure-1", "simapp"), "simapp"),
            Some(LifecycleEvent::Action {
                id: "configure-1".to_string(),
                action: "configure-network".to_string(),
            })
        );
        assert_eq!(tracker.observe(&action("configure-1", "simapp"), "simapp"), None);
        assert_eq!(tracker.observe(&action("configure-2", "other"), "simapp"), None);

        let mut done = action("configure-3", "simapp");
        done.status = Some(SimAppActionStatus {
            state: "Completed".to_string(),
            ..Default::default()
        });
        assert_eq!(tracker.observe(&done, "simapp"), None);
    }

    fn completed(name: &str) -> SimAppAction {
        let mut done = action(name, "simapp");
        done.status = Some(SimAppActionStatus {
            state: "Completed".to_string(),
            ..Default::default()
        });
        done
    }

    #[test]
    fn test_finished_actions_are_not_tracked() {
        let mut tracker = ActionTracker::default();

        for i in 0..50 {
            let name = format!("configure-{}", i);
            assert!(tracker.observe(&action(&name, "simapp"), "simapp").is_some());
            assert_eq!(tracker.observe(&completed(&name), "simapp"), None);
        }
        assert_eq!(tracker.tracked(), 0);

        assert!(tracker.observe(&action("configure-a", "simapp"), "simapp").is_some());
        tracker.forget("configure-a");
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_restart_drops_vanished_actions() {
        let mut tracker = ActionTracker::default();
        assert!(tracker.observe(&action("configure-1", "simapp"), "simapp").is_some());
        assert!(tracker.observe(&action("configure-2", "simapp"), "simapp").is_some());

        // configure-1 在断线期间被删除，configure-2 仍在等待结果
        let events = tracker.restart(&[action("configure-2", "simapp")], "simapp");
        assert!(events.is_empty());
        assert_eq!(tracker.tracked(), 1);
    }

    struct DropSignal(Option<tokio::sync::oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn test_abort_stops_idle_watchers() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (_event_tx, mut event_rx) = mpsc::channel::<LifecycleEvent>(1);
        let mut watchers = WatcherSet::default();

        // 模拟一直等待下一个事件的监听任务
        watchers.spawn(async move {
            let _signal = DropSignal(Some(tx));
            event_rx.recv().await;
        });
        assert_eq!(watchers.len(), 1);

        watchers.abort_all();
        assert!(watchers.is_empty());

        let dropped = tokio::time::timeout(std::time::Duration::from_secs(1), rx).await;
        assert!(matches!(dropped, Ok(Ok(()))));
    }
}
