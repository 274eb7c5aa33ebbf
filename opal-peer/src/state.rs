//! Process-wide peer services
//!
//! Every singleton the node carries lives on [`PeerServices`] and is injected
//! into the routers, which keeps tests hermetic: no ambient globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::bandwidth::BucketMonitor;
use crate::bucketmeta::{BucketMetadataSys, BucketTargetSys, PeerNotifier, ReplicationStatsMap};
use crate::config::{DynamicConfig, PeerConfig};
use crate::error::{PeerError, PeerResult};
use crate::heal::HealStatus;
use crate::iam::{IamStore, IamSys};
use crate::locks::LockRegistry;
use crate::metacache::MetacacheManager;
use crate::object::ObjectLayer;
use crate::profiler::ProfilerSet;
use crate::tracker::UpdateTracker;
use opal_core::audit::AuditEntry;
use opal_core::console::{LogLevel, LogRecord};
use opal_core::event::{Event, RulesMap};
use opal_core::trace::TraceEntry;
use opal_core::Publisher;

/// Signals a peer may deliver to the service loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSignal {
    Restart,
    Stop,
    ReloadDynamic,
}

impl ServiceSignal {
    /// Wire encoding used on the signal endpoint.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Restart),
            2 => Some(Self::Stop),
            3 => Some(Self::ReloadDynamic),
            _ => None,
        }
    }
}

/// Everything a handler may touch, injected as one struct.
pub struct PeerServices {
    pub config: PeerConfig,
    shared_key: Vec<u8>,
    pub started: Instant,

    pub listen: Arc<Publisher<Event>>,
    pub trace: Arc<Publisher<TraceEntry>>,
    pub console: Arc<Publisher<LogRecord>>,
    pub audit: Arc<Publisher<AuditEntry>>,
    /// Bucket notification rules feeding the listen fabric.
    listen_rules: RwLock<HashMap<String, RulesMap>>,

    pub iam: IamSys,
    pub bucket_metadata: BucketMetadataSys,
    pub bucket_targets: BucketTargetSys,
    pub replication_stats: ReplicationStatsMap,
    pub metacache: MetacacheManager,
    pub monitor: BucketMonitor,
    pub tracker: StdMutex<UpdateTracker>,
    pub locks: LockRegistry,
    pub heal: HealStatus,
    pub profilers: StdMutex<ProfilerSet>,
    dynamic: StdRwLock<DynamicConfig>,

    object_layer: StdRwLock<Option<Arc<dyn ObjectLayer>>>,
    signal_tx: mpsc::Sender<ServiceSignal>,
}

impl PeerServices {
    /// Builds the service set. The returned receiver is the consuming end of
    /// the 1-capacity service-signal channel; simultaneous restarts
    /// serialise on it by design.
    pub fn new(
        config: PeerConfig,
        iam_store: Arc<dyn IamStore>,
        notifier: Arc<dyn PeerNotifier>,
    ) -> (Arc<Self>, mpsc::Receiver<ServiceSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let shared_key = config.shared_key();
        let services = Arc::new(Self {
            shared_key,
            started: Instant::now(),
            listen: Arc::new(Publisher::new()),
            trace: Arc::new(Publisher::new()),
            console: Arc::new(Publisher::new()),
            audit: Arc::new(Publisher::new()),
            listen_rules: RwLock::new(HashMap::new()),
            iam: IamSys::new(iam_store),
            bucket_metadata: BucketMetadataSys::new(notifier),
            bucket_targets: BucketTargetSys::new(),
            replication_stats: ReplicationStatsMap::new(),
            metacache: MetacacheManager::new(),
            monitor: BucketMonitor::new(),
            tracker: StdMutex::new(UpdateTracker::new()),
            locks: LockRegistry::new(),
            heal: HealStatus::new(),
            profilers: StdMutex::new(ProfilerSet::new()),
            dynamic: StdRwLock::new(DynamicConfig::default()),
            object_layer: StdRwLock::new(None),
            signal_tx,
            config,
        });
        (services, signal_rx)
    }

    pub fn shared_key(&self) -> &[u8] {
        &self.shared_key
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn set_object_layer(&self, layer: Arc<dyn ObjectLayer>) {
        *self.object_layer.write().expect("object layer poisoned") = Some(layer);
    }

    /// The attached object layer, or the initialisation error every handler
    /// that needs storage reports.
    pub fn object_layer(&self) -> PeerResult<Arc<dyn ObjectLayer>> {
        self.object_layer
            .read()
            .expect("object layer poisoned")
            .clone()
            .ok_or(PeerError::ServerNotInitialized)
    }

    /// Blocks while a previous signal is still unconsumed; the channel has
    /// capacity one as an admission control.
    pub async fn send_signal(&self, signal: ServiceSignal) -> PeerResult<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| PeerError::Other("service signal consumer gone".to_string()))
    }

    /// Publishes an event to the listen fabric.
    pub fn publish_event(&self, event: &Event) -> usize {
        self.listen.publish(event)
    }

    /// Merges bucket notification rules into the listen registry.
    pub async fn add_listen_rules(&self, bucket: &str, rules: &RulesMap) {
        let mut registry = self.listen_rules.write().await;
        registry.entry(bucket.to_string()).or_default().add(rules);
    }

    pub async fn remove_listen_rules(&self, bucket: &str) {
        self.listen_rules.write().await.remove(bucket);
    }

    pub async fn listen_rules(&self, bucket: &str) -> Option<RulesMap> {
        self.listen_rules.read().await.get(bucket).cloned()
    }

    /// Currently applied dynamic knobs.
    pub fn dynamic_config(&self) -> DynamicConfig {
        self.dynamic.read().expect("dynamic config poisoned").clone()
    }

    /// Emits a console record to both the tracing sink and the console
    /// stream subscribers. Records below the configured console level are
    /// not streamed.
    pub fn console_log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Fatal | LogLevel::Error => error!(node = %self.node_name(), "{message}"),
            LogLevel::Warning => warn!(node = %self.node_name(), "{message}"),
            LogLevel::Info => info!(node = %self.node_name(), "{message}"),
        }
        if level.priority() > self.dynamic_config().console_level.priority() {
            return;
        }
        self.console
            .publish(&LogRecord::new(self.node_name(), level, message));
    }

    /// Re-reads the dynamically reloadable knobs and applies them.
    pub async fn reload_dynamic(&self) -> PeerResult<DynamicConfig> {
        let fresh: DynamicConfig = match &self.config.dynamic_config_path {
            Some(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| PeerError::Other(format!("reading dynamic config: {e}")))?;
                serde_json::from_slice(&data)
                    .map_err(|e| PeerError::Other(format!("parsing dynamic config: {e}")))?
            }
            None => DynamicConfig::default(),
        };
        *self.dynamic.write().expect("dynamic config poisoned") = fresh.clone();
        self.console_log(LogLevel::Info, "dynamic configuration reloaded");
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketmeta::NoopNotifier;
    use crate::iam::MemoryIamStore;
    use crate::object::MemoryObjectLayer;

    fn services() -> (Arc<PeerServices>, mpsc::Receiver<ServiceSignal>) {
        PeerServices::new(
            PeerConfig::default(),
            Arc::new(MemoryIamStore::new()),
            Arc::new(NoopNotifier),
        )
    }

    #[test]
    fn signal_wire_mapping() {
        assert_eq!(ServiceSignal::from_wire(1), Some(ServiceSignal::Restart));
        assert_eq!(ServiceSignal::from_wire(2), Some(ServiceSignal::Stop));
        assert_eq!(
            ServiceSignal::from_wire(3),
            Some(ServiceSignal::ReloadDynamic)
        );
        assert_eq!(ServiceSignal::from_wire(9), None);
    }

    #[tokio::test]
    async fn object_layer_absent_then_attached() {
        let (services, _rx) = services();
        assert!(services.object_layer().is_err());
        services.set_object_layer(Arc::new(MemoryObjectLayer::new()));
        assert!(services.object_layer().is_ok());
    }

    #[tokio::test]
    async fn signal_channel_has_capacity_one() {
        let (services, mut rx) = services();
        services.send_signal(ServiceSignal::Restart).await.unwrap();

        // A second send must park until the consumer drains the first.
        let services2 = services.clone();
        let second = tokio::spawn(async move {
            services2.send_signal(ServiceSignal::Stop).await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        assert_eq!(rx.recv().await, Some(ServiceSignal::Restart));
        second.await.unwrap();
        assert_eq!(rx.recv().await, Some(ServiceSignal::Stop));
    }

    #[tokio::test]
    async fn listen_rules_merge() {
        use opal_core::event::{EventName, TargetId};
        let (services, _rx) = services();
        let rules = RulesMap::new(
            &[EventName::ObjectCreatedPut],
            "*".to_string(),
            TargetId {
                id: "1".to_string(),
                name: "t".to_string(),
            },
        );
        services.add_listen_rules("photos", &rules).await;
        let stored = services.listen_rules("photos").await.unwrap();
        assert!(stored.match_simple(EventName::ObjectCreatedPut, "any"));
    }
}
