//! Route service
//!
//! Accepts route updates and withdrawals, resolves next hops against the
//! known hosts and publishes a [`RouteEvent`] whenever the best route of a
//! prefix changes. All mutations of one manager are serialized so events
//! for a prefix are published in the order the changes were made.

use super::resolver::RouteResolver;
use super::store::RouteStore;
use super::types::{ResolvedRoute, Route, RouteEvent};
use crate::device::NetworkEvent;
use crate::error::SdnResult;
use crate::event::{EventListener, ListenerId, ListenerRegistry};
use crate::metrics_otel;
use crate::store::MapOptions;
use crate::types::NodeId;
use ipnet::IpNet;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq)]
struct Published {
    best: ResolvedRoute,
    alternatives: Vec<ResolvedRoute>,
}

pub struct RouteManager {
    store: RouteStore,
    resolver: RouteResolver,
    published: RwLock<BTreeMap<IpNet, Published>>,
    gate: tokio::sync::Mutex<()>,
    listeners: ListenerRegistry<RouteEvent>,
}

impl RouteManager {
    /// Create the manager; routes reloaded from persistence are published
    /// once their next hops resolve
    pub fn new(options: MapOptions) -> SdnResult<Arc<Self>> {
        let listeners = ListenerRegistry::new("routes", options.events.clone());
        Ok(Arc::new(Self {
            store: RouteStore::new(options)?,
            resolver: RouteResolver::new(),
            published: RwLock::new(BTreeMap::new()),
            gate: tokio::sync::Mutex::new(()),
            listeners,
        }))
    }

    pub fn store(&self) -> &RouteStore {
        &self.store
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<RouteEvent>>) -> ListenerId {
        self.listeners.add_listener(listener)
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id).await
    }

    #[instrument(skip(self, routes), fields(count = routes.len()))]
    pub async fn update(&self, routes: Vec<Route>) -> SdnResult<()> {
        let _gate = self.gate.lock().await;
        let mut touched = BTreeSet::new();
        for route in routes {
            let prefix = route.prefix.trunc();
            if self.store.update(route).await? {
                touched.insert(prefix);
            }
        }
        self.refresh_all(touched).await
    }

    #[instrument(skip(self, routes), fields(count = routes.len()))]
    pub async fn withdraw(&self, routes: Vec<Route>) -> SdnResult<()> {
        let _gate = self.gate.lock().await;
        let mut touched = BTreeSet::new();
        for route in routes {
            if self.store.withdraw(&route).await? {
                touched.insert(route.prefix.trunc());
            }
        }
        self.refresh_all(touched).await
    }

    /// Withdraw every route learned by `node`; returns how many were removed
    #[instrument(skip(self))]
    pub async fn withdraw_by_node(&self, node: &NodeId) -> SdnResult<usize> {
        let _gate = self.gate.lock().await;
        let (touched, removed) = self.store.withdraw_node(node).await?;
        self.refresh_all(touched.into_iter().collect()).await?;
        if removed > 0 {
            info!("Withdrew {} routes learned by {}", removed, node);
        }
        Ok(removed)
    }

    /// Re-resolve routes whose next hop is a host touched by the event
    pub async fn handle_host_event(&self, event: &NetworkEvent) -> SdnResult<()> {
        if event.host().is_none() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        let mut touched = BTreeSet::new();
        for ip in self.resolver.apply(event) {
            touched.extend(self.store.prefixes_via(&ip)?);
        }
        if !touched.is_empty() {
            debug!("Host change affects {} prefixes", touched.len());
        }
        self.refresh_all(touched).await
    }

    /// Recompute every stored prefix, e.g. after reloading persisted routes
    pub async fn resync(&self) -> SdnResult<()> {
        let _gate = self.gate.lock().await;
        let mut prefixes: BTreeSet<IpNet> = self.store.prefixes()?.into_iter().collect();
        prefixes.extend(self.published.read().keys().copied());
        self.refresh_all(prefixes).await
    }

    async fn refresh_all(&self, prefixes: BTreeSet<IpNet>) -> SdnResult<()> {
        for prefix in prefixes {
            if let Some(event) = self.refresh(prefix)? {
                metrics_otel::record_route_event(event.kind());
                debug!("{} for {}", event.kind(), prefix);
                self.listeners.post(event).await;
            }
        }
        Ok(())
    }

    fn refresh(&self, prefix: IpNet) -> SdnResult<Option<RouteEvent>> {
        let resolved = match self.store.get(&prefix)? {
            Some(set) => self.resolver.resolve_set(&set),
            None => Vec::new(),
        };
        let current = resolved.split_first().map(|(best, rest)| Published {
            best: best.clone(),
            alternatives: rest.to_vec(),
        });

        let mut published = self.published.write();
        let previous = published.get(&prefix).cloned();
        let event = match (previous, &current) {
            (None, None) => None,
            (None, Some(now)) => Some(RouteEvent::RouteAdded(now.best.clone())),
            (Some(before), None) => Some(RouteEvent::RouteRemoved(before.best)),
            (Some(before), Some(now)) if before.best != now.best => Some(RouteEvent::RouteUpdated {
                route: now.best.clone(),
                previous: before.best,
            }),
            (Some(before), Some(now)) if before.alternatives != now.alternatives => {
                Some(RouteEvent::AlternativeRoutesChanged {
                    prefix,
                    alternatives: now.alternatives.clone(),
                })
            }
            _ => None,
        };
        match current {
            Some(now) => {
                published.insert(prefix, now);
            }
            None => {
                published.remove(&prefix);
            }
        }
        Ok(event)
    }

    /// Best resolved route of the most specific prefix containing `addr`
    ///
    /// Prefixes whose routes do not resolve are skipped in favour of the
    /// next less specific one.
    pub fn longest_prefix_match(&self, addr: IpAddr) -> Option<ResolvedRoute> {
        let published = self.published.read();
        self.store
            .matching(addr)
            .into_iter()
            .find_map(|prefix| published.get(&prefix).map(|p| p.best.clone()))
    }

    pub fn best_route(&self, prefix: &IpNet) -> Option<ResolvedRoute> {
        self.published
            .read()
            .get(&prefix.trunc())
            .map(|p| p.best.clone())
    }

    /// Best route first, then the resolved alternatives
    pub fn resolved_routes(&self, prefix: &IpNet) -> Vec<ResolvedRoute> {
        self.published
            .read()
            .get(&prefix.trunc())
            .map(|p| {
                std::iter::once(p.best.clone())
                    .chain(p.alternatives.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every stored route of the prefix, resolved or not
    pub fn routes(&self, prefix: &IpNet) -> SdnResult<Vec<Route>> {
        Ok(self
            .store
            .get(prefix)?
            .map(|set| set.routes)
            .unwrap_or_default())
    }

    pub fn best_routes(&self) -> Vec<ResolvedRoute> {
        self.published
            .read()
            .values()
            .map(|p| p.best.clone())
            .collect()
    }

    pub fn prefix_count(&self) -> usize {
        self.store.len()
    }
}
