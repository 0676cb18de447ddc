//! Runtime catalogue of provider configurations.
//!
//! Providers are registered once at startup and may be enabled or disabled
//! while the process runs; they are never removed.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::Catalog;
use crate::provider_config::ProviderConfig;
use crate::{Capability, ProviderId, Tier, TransportKind, ValidationError};

const LOG_TARGET: &str = "fiscalis::registry";

/// Optional constraints for [`SourceRegistry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderFilter {
    pub tier: Option<Tier>,
    pub enabled: Option<bool>,
    pub transport: Option<TransportKind>,
    pub capability: Option<Capability>,
}

impl ProviderFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn enabled() -> Self {
        Self::default().with_enabled(true)
    }

    pub const fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub const fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub const fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn matches(&self, config: &ProviderConfig) -> bool {
        self.tier.map_or(true, |tier| config.tier == tier)
            && self.enabled.map_or(true, |enabled| config.enabled == enabled)
            && self
                .transport
                .map_or(true, |transport| config.transport == transport)
            && self
                .capability
                .map_or(true, |capability| config.supports(capability))
    }
}

/// Thread-safe provider registry.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    providers: RwLock<BTreeMap<ProviderId, ProviderConfig>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Result<Self, ValidationError> {
        catalog.validate()?;
        let registry = Self::new();
        for provider in catalog.providers {
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// Adds `config`, replacing any provider with the same id.
    pub fn register(&self, config: ProviderConfig) -> Result<(), ValidationError> {
        config.validate()?;
        let id = config.id.clone();
        if self.write().insert(id.clone(), config).is_some() {
            log::info!(target: LOG_TARGET, "replaced provider '{id}'");
        } else {
            log::debug!(target: LOG_TARGET, "registered provider '{id}'");
        }
        Ok(())
    }

    /// Sets the enabled flag. Unknown ids are logged and ignored.
    ///
    /// Returns whether the provider is registered.
    pub fn toggle(&self, id: &ProviderId, enabled: bool) -> bool {
        let mut providers = self.write();
        match providers.get_mut(id) {
            Some(config) => {
                if config.enabled != enabled {
                    config.enabled = enabled;
                    log::info!(
                        target: LOG_TARGET,
                        "provider '{id}' {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
                true
            }
            None => {
                log::warn!(target: LOG_TARGET, "cannot toggle unknown provider '{id}'");
                false
            }
        }
    }

    pub fn get(&self, id: &ProviderId) -> Option<ProviderConfig> {
        self.read().get(id).cloned()
    }

    pub fn is_enabled(&self, id: &ProviderId) -> Option<bool> {
        self.read().get(id).map(|config| config.enabled)
    }

    /// Matching providers ordered by tier, then priority rank, then id.
    pub fn list(&self, filter: &ProviderFilter) -> Vec<ProviderConfig> {
        let mut providers = self
            .read()
            .values()
            .filter(|config| filter.matches(config))
            .cloned()
            .collect::<Vec<_>>();
        providers.sort_by(|left, right| {
            left.tier
                .cmp(&right.tier)
                .then_with(|| left.priority.cmp(&right.priority))
                .then_with(|| left.id.cmp(&right.id))
        });
        providers
    }

    /// Enabled providers answering `capability`, best priority rank first.
    pub fn providers_with_capability(&self, capability: Capability) -> Vec<ProviderConfig> {
        let mut providers = self.list(&ProviderFilter::enabled().with_capability(capability));
        providers.sort_by(|left, right| {
            left.priority
                .cmp(&right.priority)
                .then_with(|| left.tier.cmp(&right.tier))
                .then_with(|| left.id.cmp(&right.id))
        });
        providers
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ProviderId, ProviderConfig>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ProviderId, ProviderConfig>> {
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        SourceRegistry::from_catalog(Catalog::builtin()).expect("builtin catalog is valid")
    }

    fn id(raw: &str) -> ProviderId {
        ProviderId::parse(raw).expect("valid id")
    }

    #[test]
    fn toggle_is_idempotent_and_ignores_unknown_ids() {
        let registry = registry();

        assert!(registry.toggle(&id("pgfn"), false));
        assert!(registry.toggle(&id("pgfn"), false));
        assert_eq!(registry.is_enabled(&id("pgfn")), Some(false));

        assert!(!registry.toggle(&id("unknown"), true));
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn register_replaces_by_id() {
        let registry = registry();
        let mut cvm = registry.get(&id("cvm")).expect("cvm is builtin");
        cvm.name = String::from("CVM (homologacao)");

        registry.register(cvm).expect("valid config");

        assert_eq!(registry.len(), 9);
        assert_eq!(
            registry.get(&id("cvm")).map(|config| config.name),
            Some(String::from("CVM (homologacao)"))
        );
    }

    #[test]
    fn list_filters_by_tier_enabled_and_transport() {
        let registry = registry();
        registry.toggle(&id("bacen"), false);

        let tier1_enabled = registry
            .list(&ProviderFilter::enabled().with_tier(Tier::Tier1))
            .into_iter()
            .map(|config| config.id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(tier1_enabled, vec!["pgfn", "receita_federal"]);

        let hybrid = registry.list(&ProviderFilter::all().with_transport(TransportKind::Hybrid));
        assert!(hybrid
            .iter()
            .all(|config| config.transport == TransportKind::Hybrid));
        assert!(!hybrid.is_empty());
    }

    #[test]
    fn capability_lookup_orders_by_priority() {
        let registry = registry();

        let identity = registry
            .providers_with_capability(Capability::Identity)
            .into_iter()
            .map(|config| config.id.to_string())
            .collect::<Vec<_>>();

        assert_eq!(identity, vec!["receita_federal", "brasilapi"]);
    }
}
