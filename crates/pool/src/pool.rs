//! The visual token pool.
//!
//! Tokens live in an arena keyed by [`TokenId`]; free ones wait in a FIFO
//! queue. A token only re-enters the queue once its exit transition has
//! finished, so two owners can never share one token.
//!
//! Asset loads complete through the host's [`AssetLoader`] at some later
//! point. Completions are posted to an inbox and applied when the pool is
//! next ticked or acquired from, on the caller's thread. Each result carries
//! the epoch of the binding that asked for it and is dropped if the token has
//! since been released or rebound.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use enrichments_config::PoolConfig;
use enrichments_core::asset::{AssetHandle, AssetLoader, LoadCallback};
use enrichments_core::catalog::TemplateCatalog;
use enrichments_core::error::AssetError;
use enrichments_core::math::Pose;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::assets::{AssetCache, Lookup, Waiter};
use crate::error::PoolError;
use crate::token::{OwnerId, TokenId, TokenState, VisualSlot, VisualToken};
use crate::transition::{Step, Transition, TransitionKind};

/// Pool sizing, asset keys and transition timing.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub prewarm_count: usize,
    pub token_asset_key: String,
    pub rig_asset_key: String,
    pub enter_delay: f32,
    pub enter_duration: f32,
    pub release_duration: f32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            prewarm_count: config.prewarm_count,
            token_asset_key: config.token_asset_key.clone(),
            rig_asset_key: config.rig_asset_key.clone(),
            enter_delay: config.enter_delay_secs,
            enter_duration: config.enter_duration_secs,
            release_duration: config.release_duration_secs,
        }
    }
}

/// Progress of the one-time warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warmth {
    Cold,
    Warming,
    Warm,
    /// The base token asset failed to load; acquires allocate on demand.
    Failed,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub tokens: usize,
    pub free: usize,
    pub active: usize,
    pub releasing: usize,
    /// Tokens made ready by the warm-up
    pub warmed: usize,
    /// Tokens allocated because the free queue was empty
    pub overflow_allocations: usize,
    /// Async results dropped because their binding had moved on
    pub stale_callbacks: usize,
    pub asset_failures: usize,
}

enum PoolMessage {
    BaseLoaded {
        generation: u64,
        result: Result<AssetHandle, AssetError>,
    },
    RigLoaded {
        token: TokenId,
        result: Result<AssetHandle, AssetError>,
    },
    VisualLoaded {
        key: String,
        result: Result<AssetHandle, AssetError>,
    },
}

pub struct TokenPool {
    settings: PoolSettings,
    catalog: Arc<dyn TemplateCatalog>,
    loader: Arc<dyn AssetLoader>,
    tokens: BTreeMap<TokenId, VisualToken>,
    free: VecDeque<TokenId>,
    cache: AssetCache,
    inbox: UnboundedReceiver<PoolMessage>,
    outbox: UnboundedSender<PoolMessage>,
    warmth: Warmth,
    /// Bumped on every warm-up and shutdown
    generation: u64,
    base: Option<AssetHandle>,
    pending_rigs: usize,
    next_token: u64,
    stats: PoolStats,
}

impl TokenPool {
    pub fn new(
        settings: PoolSettings,
        catalog: Arc<dyn TemplateCatalog>,
        loader: Arc<dyn AssetLoader>,
    ) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            settings,
            catalog,
            loader,
            tokens: BTreeMap::new(),
            free: VecDeque::new(),
            cache: AssetCache::new(),
            inbox,
            outbox,
            warmth: Warmth::Cold,
            generation: 0,
            base: None,
            pending_rigs: 0,
            next_token: 0,
            stats: PoolStats::default(),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Start the one-time warm-up of `count` tokens.
    ///
    /// Returns `false` if a warm-up is already in flight or done.
    pub fn warm(&mut self, count: usize) -> bool {
        if self.warmth != Warmth::Cold {
            debug!(warmth = ?self.warmth, "Token pool already warmed, ignoring");
            return false;
        }
        self.warmth = Warmth::Warming;
        self.generation += 1;
        self.pending_rigs = count;
        let generation = self.generation;
        info!(count, key = %self.settings.token_asset_key, "Warming token pool");
        let key = self.settings.token_asset_key.clone();
        self.load(&key, move |result| PoolMessage::BaseLoaded { generation, result });
        true
    }

    pub fn warmth(&self) -> Warmth {
        self.warmth
    }

    /// Bind a token to `template_id` for `owner` at `pose`.
    ///
    /// Takes the oldest free token, or allocates one when none is free.
    pub fn acquire(
        &mut self,
        template_id: &str,
        owner: OwnerId,
        pose: Pose,
    ) -> Result<TokenId, PoolError> {
        self.drain_inbox();

        let template = self
            .catalog
            .resolve(template_id)
            .ok_or_else(|| PoolError::TemplateNotFound(template_id.to_string()))?;

        let id = match self.free.pop_front() {
            Some(id) => id,
            None => {
                let id = self.allocate(true);
                self.stats.overflow_allocations += 1;
                warn!(
                    token = %id,
                    warmth = ?self.warmth,
                    total = self.tokens.len(),
                    "Token pool exhausted, allocating on demand"
                );
                id
            }
        };

        let Some(token) = self.tokens.get_mut(&id) else {
            return Err(PoolError::UnknownToken(id));
        };
        if token.state != TokenState::Free {
            return Err(PoolError::InvalidState {
                token: id,
                state: token.state,
                operation: "acquire",
            });
        }

        token.state = TokenState::Binding;
        token.epoch += 1;
        token.pose = pose;
        token.owner = Some(owner);
        token.title = Some(if template.display_name.is_empty() {
            template.id.clone()
        } else {
            template.display_name.clone()
        });
        token.description = Some(template.description.clone()).filter(|d| !d.is_empty());
        token.button_enabled = true;
        token.scale = 0.0;

        let mut requests = Vec::new();
        if let Some(key) = &template.visuals.orb_icon {
            requests.push((VisualSlot::OrbIcon, key.clone()));
        }
        if let Some(key) = template.button_icon(true) {
            requests.push((VisualSlot::ButtonIcon, key.to_string()));
        }
        if let Some(key) = &template.visuals.video {
            requests.push((VisualSlot::Video, key.clone()));
        }
        for (slot, key) in &requests {
            token.wanted.insert(*slot, key.clone());
        }
        token.template = Some(template);
        let epoch = token.epoch;

        for (slot, key) in requests {
            self.request_visual(id, epoch, slot, &key);
        }

        if let Some(token) = self.tokens.get_mut(&id) {
            token.state = TokenState::Active;
            token.transition = Some(Transition::enter(
                epoch,
                self.settings.enter_delay,
                self.settings.enter_duration,
            ));
        }
        debug!(token = %id, enrichment = %template_id, owner = %owner, epoch, "Token acquired");
        Ok(id)
    }

    /// Begin returning a token to the pool.
    ///
    /// The token is handed out again only after its exit transition completes
    /// on a later [`Self::tick`]. Releasing a token that is already releasing
    /// is a no-op.
    pub fn release(&mut self, id: TokenId) -> Result<(), PoolError> {
        let token = self.tokens.get_mut(&id).ok_or(PoolError::UnknownToken(id))?;
        match token.state {
            TokenState::Active | TokenState::Binding => {}
            TokenState::Releasing => {
                debug!(token = %id, "Token already releasing");
                return Ok(());
            }
            state => {
                return Err(PoolError::InvalidState {
                    token: id,
                    state,
                    operation: "release",
                });
            }
        }

        token.state = TokenState::Releasing;
        token.epoch += 1;
        token.transition = Some(Transition::exit(
            token.epoch,
            token.scale,
            self.settings.release_duration,
        ));
        debug!(token = %id, epoch = token.epoch, "Token releasing");
        Ok(())
    }

    /// Release every bound token of `owner`. Returns how many were released.
    pub fn release_all(&mut self, owner: OwnerId) -> usize {
        let owned: Vec<TokenId> = self
            .tokens
            .values()
            .filter(|t| t.owner == Some(owner))
            .filter(|t| matches!(t.state, TokenState::Binding | TokenState::Active))
            .map(|t| t.id)
            .collect();
        for id in &owned {
            if let Err(e) = self.release(*id) {
                debug!(token = %id, error = %e, "Token release skipped");
            }
        }
        owned.len()
    }

    /// Apply finished loads and advance transitions by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        self.drain_inbox();

        let mut finished = Vec::new();
        for token in self.tokens.values_mut() {
            let Some(transition) = token.transition.as_mut() else {
                continue;
            };
            if transition.epoch() != token.epoch {
                debug!(token = %token.id, "Dropping superseded transition");
                token.transition = None;
                continue;
            }
            match transition.step(dt) {
                Step::Running(scale) => token.scale = scale,
                Step::Done(scale) => {
                    token.scale = scale;
                    let kind = transition.kind();
                    token.transition = None;
                    if kind == TransitionKind::Exit {
                        finished.push(token.id);
                    }
                }
            }
        }

        for id in finished {
            self.finish_release(id);
        }
    }

    /// Swap the button icon for the enabled/disabled variant.
    pub fn set_button_state(&mut self, id: TokenId, enabled: bool) -> Result<(), PoolError> {
        let token = self.tokens.get_mut(&id).ok_or(PoolError::UnknownToken(id))?;
        if token.state != TokenState::Active {
            return Err(PoolError::InvalidState {
                token: id,
                state: token.state,
                operation: "set the button state of",
            });
        }
        if token.button_enabled == enabled {
            return Ok(());
        }
        token.button_enabled = enabled;

        let key = token
            .template
            .as_deref()
            .and_then(|t| t.button_icon(enabled))
            .map(str::to_string);
        let epoch = token.epoch;
        let previous = token.visuals.remove(&VisualSlot::ButtonIcon);
        match &key {
            Some(key) => token.wanted.insert(VisualSlot::ButtonIcon, key.clone()),
            None => token.wanted.remove(&VisualSlot::ButtonIcon),
        };

        if let Some(previous) = previous {
            self.release_visual(previous);
        }
        if let Some(key) = key {
            self.request_visual(id, epoch, VisualSlot::ButtonIcon, &key);
        }
        Ok(())
    }

    /// Move a bound token.
    pub fn move_to(&mut self, id: TokenId, pose: Pose) -> Result<(), PoolError> {
        let token = self.tokens.get_mut(&id).ok_or(PoolError::UnknownToken(id))?;
        if token.state == TokenState::Free {
            return Err(PoolError::InvalidState {
                token: id,
                state: token.state,
                operation: "move",
            });
        }
        token.pose = pose;
        Ok(())
    }

    pub fn token(&self, id: TokenId) -> Option<&VisualToken> {
        self.tokens.get(&id)
    }

    /// Active tokens, in arena order.
    pub fn active_tokens(&self) -> Vec<&VisualToken> {
        self.tokens
            .values()
            .filter(|t| t.state == TokenState::Active)
            .collect()
    }

    /// Active tokens bound for `owner`, in acquisition-independent arena order.
    pub fn active_tokens_of(&self, owner: OwnerId) -> Vec<TokenId> {
        self.tokens
            .values()
            .filter(|t| t.state == TokenState::Active && t.owner == Some(owner))
            .map(|t| t.id)
            .collect()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Loaded references held on a visual asset key.
    pub fn asset_refs(&self, key: &str) -> usize {
        self.cache.refs(key)
    }

    pub fn stats(&self) -> PoolStats {
        let count = |state| self.tokens.values().filter(|t| t.state == state).count();
        PoolStats {
            tokens: self.tokens.len(),
            free: self.free.len(),
            active: count(TokenState::Active),
            releasing: count(TokenState::Releasing),
            ..self.stats
        }
    }

    /// Drop every token and hand all held assets back to the loader.
    ///
    /// Loads still in flight are released as soon as they complete.
    pub fn shutdown(&mut self) {
        self.drain_inbox();
        let mut handles = self.cache.drain();
        for token in self.tokens.values_mut() {
            token.visuals.clear();
            handles.extend(token.rig.take());
        }
        handles.extend(self.base.take());

        let released = handles.len();
        for handle in handles {
            self.loader.release(handle);
        }
        let tokens = self.tokens.len();
        self.tokens.clear();
        self.free.clear();
        self.pending_rigs = 0;
        self.generation += 1;
        self.warmth = Warmth::Cold;
        info!(tokens, released, "Token pool shut down");
    }

    // --- Internals ---

    fn allocate(&mut self, on_demand: bool) -> TokenId {
        self.next_token += 1;
        let id = TokenId(self.next_token);
        self.tokens.insert(id, VisualToken::new(id, on_demand));
        id
    }

    fn load<F>(&self, key: &str, wrap: F)
    where
        F: FnOnce(Result<AssetHandle, AssetError>) -> PoolMessage + Send + 'static,
    {
        let outbox = self.outbox.clone();
        let on_complete: LoadCallback = Box::new(move |result| {
            // The pool was dropped; nothing left to deliver to
            let _ = outbox.send(wrap(result));
        });
        self.loader.load_async(key, on_complete);
    }

    fn request_visual(&mut self, token: TokenId, epoch: u64, slot: VisualSlot, key: &str) {
        let waiter = Waiter { token, epoch, slot };
        match self.cache.request(key, waiter) {
            Lookup::Hit(handle) => {
                if let Some(previous) = self
                    .tokens
                    .get_mut(&token)
                    .and_then(|t| t.visuals.insert(slot, handle))
                {
                    self.release_visual(previous);
                }
            }
            Lookup::Queued => {}
            Lookup::Miss => {
                let key_owned = key.to_string();
                self.load(key, move |result| PoolMessage::VisualLoaded {
                    key: key_owned,
                    result,
                });
            }
        }
    }

    fn release_visual(&mut self, handle: AssetHandle) {
        if let Some(unused) = self.cache.release(&handle.key) {
            debug!(key = %unused.key, "Visual asset no longer referenced");
            self.loader.release(unused);
        }
    }

    fn finish_release(&mut self, id: TokenId) {
        let Some(token) = self.tokens.get_mut(&id) else {
            return;
        };
        let handles = token.unbind();
        token.state = TokenState::Free;
        for handle in handles {
            self.release_visual(handle);
        }
        self.free.push_back(id);
        debug!(token = %id, "Token returned to pool");
    }

    fn drain_inbox(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                PoolMessage::BaseLoaded { generation, result } => {
                    self.on_base_loaded(generation, result)
                }
                PoolMessage::RigLoaded { token, result } => self.on_rig_loaded(token, result),
                PoolMessage::VisualLoaded { key, result } => self.on_visual_loaded(&key, result),
            }
        }
    }

    fn on_base_loaded(&mut self, generation: u64, result: Result<AssetHandle, AssetError>) {
        if generation != self.generation || self.warmth != Warmth::Warming {
            if let Ok(handle) = result {
                self.loader.release(handle);
            }
            return;
        }
        match result {
            Ok(handle) => {
                self.base = Some(handle);
                let count = self.pending_rigs;
                if count == 0 {
                    self.warmth = Warmth::Warm;
                    info!("Token pool warmed with no tokens");
                    return;
                }
                let rig_key = self.settings.rig_asset_key.clone();
                for _ in 0..count {
                    let token = self.allocate(false);
                    self.load(&rig_key, move |result| PoolMessage::RigLoaded { token, result });
                }
            }
            Err(e) => {
                error!(error = %e, "Token asset failed to load, pool stays empty");
                self.stats.asset_failures += 1;
                self.pending_rigs = 0;
                self.warmth = Warmth::Failed;
            }
        }
    }

    fn on_rig_loaded(&mut self, id: TokenId, result: Result<AssetHandle, AssetError>) {
        let Some(token) = self.tokens.get_mut(&id) else {
            if let Ok(handle) = result {
                self.loader.release(handle);
            }
            return;
        };
        match result {
            Ok(handle) => token.rig = Some(handle),
            Err(e) => {
                warn!(token = %id, error = %e, "Token rig failed to load, token stays usable");
                self.stats.asset_failures += 1;
            }
        }
        self.free.push_back(id);
        self.stats.warmed += 1;
        self.pending_rigs = self.pending_rigs.saturating_sub(1);
        if self.pending_rigs == 0 && self.warmth == Warmth::Warming {
            self.warmth = Warmth::Warm;
            info!(tokens = self.stats.warmed, "Token pool warmed");
        }
    }

    fn on_visual_loaded(&mut self, key: &str, result: Result<AssetHandle, AssetError>) {
        let Some(waiters) = self.cache.take_waiters(key) else {
            if let Ok(handle) = result {
                self.loader.release(handle);
            }
            return;
        };

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                warn!(key = %key, error = %e, waiters = waiters.len(), "Visual asset failed to load");
                self.stats.asset_failures += 1;
                return;
            }
        };

        let mut refs = 0;
        let mut displaced = Vec::new();
        for waiter in waiters {
            match self.tokens.get_mut(&waiter.token) {
                Some(token) if token.accepts(waiter.epoch, waiter.slot, key) => {
                    if let Some(previous) = token.visuals.insert(waiter.slot, handle.clone()) {
                        displaced.push(previous);
                    }
                    refs += 1;
                }
                _ => {
                    self.stats.stale_callbacks += 1;
                    debug!(
                        token = %waiter.token,
                        epoch = waiter.epoch,
                        key = %key,
                        "Discarding stale visual load"
                    );
                }
            }
        }

        if refs == 0 {
            self.loader.release(handle);
        } else {
            self.cache.insert_loaded(handle, refs);
        }
        for previous in displaced {
            self.release_visual(previous);
        }
    }
}
