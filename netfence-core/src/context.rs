//! Explicitly constructed engine context

use crate::error::Result;
use crate::executor::{self, RuleExecutor};
use crate::firewall::FirewallPolicy;
use crate::hosts::HostsBlocklist;
use crate::resolver::{PathResolver, SettingsPathResolver};
use crate::settings::{Settings, SettingsLoader};
use crate::store::ConfigStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Owns the shared collaborators and builds the components from them
///
/// Components built from one context share its rule executor, so a dry-run
/// context sees the rules created by every component.
#[derive(Clone)]
pub struct FenceContext {
    settings: Settings,
    executor: Arc<dyn RuleExecutor>,
    resolver: Arc<dyn PathResolver>,
    runtime: Handle,
}

impl FenceContext {
    pub fn new(settings: Settings, runtime: Handle) -> Self {
        let executor = executor::from_settings(&settings.firewall);
        let resolver = Arc::new(SettingsPathResolver::new(&settings.firewall));
        Self::with_parts(settings, runtime, executor, resolver)
    }

    pub fn with_parts(
        settings: Settings,
        runtime: Handle,
        executor: Arc<dyn RuleExecutor>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        tracing::debug!("Using {} firewall backend", executor.backend_name());
        Self {
            settings,
            executor,
            resolver,
            runtime,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn executor(&self) -> Arc<dyn RuleExecutor> {
        self.executor.clone()
    }

    pub fn resolver(&self) -> Arc<dyn PathResolver> {
        self.resolver.clone()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn record_path(&self) -> PathBuf {
        SettingsLoader::record_path(&self.settings)
    }

    pub fn open_store(&self) -> Result<ConfigStore> {
        ConfigStore::open(&self.settings.store, self.record_path(), self.runtime.clone())
    }

    pub fn firewall(&self) -> FirewallPolicy {
        FirewallPolicy::new(
            self.settings.firewall.clone(),
            self.executor.clone(),
            self.resolver.clone(),
        )
    }

    pub fn hosts(&self) -> HostsBlocklist {
        HostsBlocklist::new(self.settings.hosts.clone())
    }
}
