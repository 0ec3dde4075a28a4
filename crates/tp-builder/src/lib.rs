//! `ServiceBuilder` — startup composition (spec §4.10).
//!
//! A fluent builder that yields a `ServiceContext` only once every required
//! provider has been supplied. Completeness is enforced at compile time via
//! a const-generic typestate: each `with_*` method is only implemented on
//! the builder state where that slot is still empty, and `build()` is only
//! implemented on the state where every slot is filled. There is no
//! possible call sequence that reaches `build()` on an incomplete builder —
//! the compiler rejects it.

use async_trait::async_trait;
use std::sync::Arc;
use tp_core::config::{Config, InterfaceConfig};
use tp_core::error::{ErrorKind, TestProbeError};
use tp_control::guardian::Guardian;
use tp_providers::storage::BlockStorageWorker;
use tp_providers::vault::VaultWorker;

/// Optional extension point (spec §4.10 "Optional: any number of
/// `ActorBehavior` extensions"). Default method bodies are no-ops so an
/// extension can implement only the hook it needs.
#[async_trait]
pub trait ActorBehaviorExtension: Send + Sync {
    async fn pre_flight(&self, _ctx: &ServiceContext) -> Result<(), TestProbeError> {
        Ok(())
    }
    async fn initialize(&self, _ctx: &ServiceContext) -> Result<(), TestProbeError> {
        Ok(())
    }
    async fn final_check(&self, _ctx: &ServiceContext) -> Result<(), TestProbeError> {
        Ok(())
    }
}

/// The fully composed service, handed to the daemon's main loop.
pub struct ServiceContext {
    pub config: Config,
    pub guardian: Arc<Guardian>,
    pub storage: Arc<BlockStorageWorker>,
    pub vault: Arc<VaultWorker>,
    pub interface: InterfaceConfig,
    pub extensions: Vec<Arc<dyn ActorBehaviorExtension>>,
}

/// `ServiceBuilder<C, A, I, S, V>` tracks, at the type level, whether
/// Config/ActorSystem/Interface/StorageService/VaultService have been
/// supplied.
pub struct ServiceBuilder<
    const HAS_CONFIG: bool,
    const HAS_ACTOR_SYSTEM: bool,
    const HAS_INTERFACE: bool,
    const HAS_STORAGE: bool,
    const HAS_VAULT: bool,
> {
    config: Option<Config>,
    guardian: Option<Arc<Guardian>>,
    interface: Option<InterfaceConfig>,
    storage: Option<Arc<BlockStorageWorker>>,
    vault: Option<Arc<VaultWorker>>,
    extensions: Vec<Arc<dyn ActorBehaviorExtension>>,
}

pub type EmptyServiceBuilder = ServiceBuilder<false, false, false, false, false>;

impl Default for EmptyServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmptyServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            guardian: None,
            interface: None,
            storage: None,
            vault: None,
            extensions: Vec::new(),
        }
    }
}

// Extension registration is available regardless of which required slots
// are filled, so it's implemented generically over all five flags.
impl<const C: bool, const A: bool, const I: bool, const S: bool, const V: bool> ServiceBuilder<C, A, I, S, V> {
    pub fn with_extension(mut self, extension: Arc<dyn ActorBehaviorExtension>) -> Self {
        self.extensions.push(extension);
        self
    }
}

impl<const A: bool, const I: bool, const S: bool, const V: bool> ServiceBuilder<false, A, I, S, V> {
    pub fn with_config(self, config: Config) -> ServiceBuilder<true, A, I, S, V> {
        ServiceBuilder {
            config: Some(config),
            guardian: self.guardian,
            interface: self.interface,
            storage: self.storage,
            vault: self.vault,
            extensions: self.extensions,
        }
    }
}

impl<const C: bool, const I: bool, const S: bool, const V: bool> ServiceBuilder<C, false, I, S, V> {
    pub fn with_actor_system(self, guardian: Arc<Guardian>) -> ServiceBuilder<C, true, I, S, V> {
        ServiceBuilder {
            config: self.config,
            guardian: Some(guardian),
            interface: self.interface,
            storage: self.storage,
            vault: self.vault,
            extensions: self.extensions,
        }
    }
}

impl<const C: bool, const A: bool, const S: bool, const V: bool> ServiceBuilder<C, A, false, S, V> {
    pub fn with_interface(self, interface: InterfaceConfig) -> ServiceBuilder<C, A, true, S, V> {
        ServiceBuilder {
            config: self.config,
            guardian: self.guardian,
            interface: Some(interface),
            storage: self.storage,
            vault: self.vault,
            extensions: self.extensions,
        }
    }
}

impl<const C: bool, const A: bool, const I: bool, const V: bool> ServiceBuilder<C, A, I, false, V> {
    pub fn with_storage(self, storage: Arc<BlockStorageWorker>) -> ServiceBuilder<C, A, I, true, V> {
        ServiceBuilder {
            config: self.config,
            guardian: self.guardian,
            interface: self.interface,
            storage: Some(storage),
            vault: self.vault,
            extensions: self.extensions,
        }
    }
}

impl<const C: bool, const A: bool, const I: bool, const S: bool> ServiceBuilder<C, A, I, S, false> {
    pub fn with_vault(self, vault: Arc<VaultWorker>) -> ServiceBuilder<C, A, I, S, true> {
        ServiceBuilder {
            config: self.config,
            guardian: self.guardian,
            interface: self.interface,
            storage: self.storage,
            vault: Some(vault),
            extensions: self.extensions,
        }
    }
}

/// Only a builder with every required slot filled has a `build` method —
/// the "composition-completeness" witness (spec §4.10) is the type itself.
impl ServiceBuilder<true, true, true, true, true> {
    pub async fn build(self) -> Result<ServiceContext, TestProbeError> {
        let config = self.config.expect("HAS_CONFIG=true guarantees this is Some");
        let guardian = self.guardian.expect("HAS_ACTOR_SYSTEM=true guarantees this is Some");
        let interface = self.interface.expect("HAS_INTERFACE=true guarantees this is Some");
        let storage = self.storage.expect("HAS_STORAGE=true guarantees this is Some");
        let vault = self.vault.expect("HAS_VAULT=true guarantees this is Some");
        let extensions = self.extensions;

        // preFlight: Config -> Storage -> Vault -> Extensions -> ActorSystem -> Interface
        config.validate().map_err(|e| fatal(format!("config preFlight failed: {e}")))?;
        preflight_storage(&config)?;
        preflight_vault(&config)?;

        // ServiceContext is assembled here, ahead of `initialize`, so
        // extensions' `pre_flight` hook gets the real thing rather than a
        // stand-in — preFlight still must not open network connections,
        // but that's a contract on the extension, not something this
        // builder can enforce by withholding fields.
        let ctx = ServiceContext {
            config,
            guardian: guardian.clone(),
            storage,
            vault,
            interface,
            extensions,
        };
        for ext in &ctx.extensions {
            ext.pre_flight(&ctx).await.map_err(|e| fatal(format!("extension preFlight failed: {e}")))?;
        }
        preflight_actor_system(&guardian).await?;
        preflight_interface(&ctx.interface)?;

        // initialize: Config -> Extensions -> ActorSystem -> Storage -> Vault -> Interface
        // Config has nothing further to allocate; it is already loaded and validated.
        for ext in &ctx.extensions {
            ext.initialize(&ctx).await.map_err(|e| fatal(format!("extension initialize failed: {e}")))?;
        }
        ctx.guardian.initialize().await;
        // Storage/Vault providers are already constructed; nothing left to open here.
        // Interface binding happens in the daemon's own startup, after build() returns.

        // finalCheck: Config -> Extensions -> ActorSystem -> Storage -> Vault -> Interface
        for ext in &ctx.extensions {
            ext.final_check(&ctx).await.map_err(|e| fatal(format!("extension finalCheck failed: {e}")))?;
        }
        ctx.guardian
            .get_queue_actor()
            .await
            .map_err(|e| fatal(format!("actor system finalCheck failed: {e}")))?;

        Ok(ctx)
    }
}

fn fatal(message: String) -> TestProbeError {
    TestProbeError::new(ErrorKind::FatalBooting, message)
}

fn preflight_storage(config: &Config) -> Result<(), TestProbeError> {
    if config.storage.provider.trim().is_empty() {
        return Err(fatal("storage.provider must not be empty".to_string()));
    }
    Ok(())
}

fn preflight_vault(config: &Config) -> Result<(), TestProbeError> {
    if config.vault.provider.trim().is_empty() {
        return Err(fatal("vault.provider must not be empty".to_string()));
    }
    if config.vault.provider != "local" && config.vault.oauth.token_endpoint.is_none() {
        return Err(fatal(
            "vault.oauth.token-endpoint is required for non-local vault providers".to_string(),
        ));
    }
    Ok(())
}

async fn preflight_actor_system(guardian: &Guardian) -> Result<(), TestProbeError> {
    // Stateless check only: actually bringing the Guardian up happens in
    // `initialize`, not here (spec §4.10 preFlight "must not open network
    // connections").
    let _ = guardian.is_degraded().await;
    Ok(())
}

fn preflight_interface(interface: &InterfaceConfig) -> Result<(), TestProbeError> {
    if interface.host.trim().is_empty() {
        return Err(fatal("interface.host must not be empty".to_string()));
    }
    Ok(())
}
