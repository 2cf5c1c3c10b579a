//! Lifecycle controller: install, activate, intercept.
//!
//! A [`Registration`] owns the "current namespace" pointer. Versions move
//! through `Installing -> Installed (waiting) -> Activating -> Active`; at most
//! one version is active, and activation deletes every namespace no version
//! still owns.

use color_eyre::Result;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::classifier::Classifier;
use super::error::{FetchError, LifecycleError};
use super::manifest::Manifest;
use super::strategy::{self, StrategyExecutor};
use crate::cache::{CacheResult, CacheStorage, RequestIdentity};
use crate::config::Config;
use crate::net::{Network, Request, Response};

/// Name of the namespace holding a version's cache.
pub fn namespace_name(cache_prefix: &str, tag: &str) -> String {
  format!("{}-{}", cache_prefix, tag)
}

/// One deployable version of the worker.
#[derive(Debug)]
pub struct WorkerVersion {
  tag: String,
  namespace: String,
  classifier: Classifier,
  stale_fallback: bool,
}

impl WorkerVersion {
  pub fn new(tag: impl Into<String>, cache_prefix: &str, classifier: Classifier) -> Self {
    let tag = tag.into();
    Self {
      namespace: namespace_name(cache_prefix, &tag),
      tag,
      classifier,
      stale_fallback: false,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    let manifest = Manifest::resolve(&config.origin, &config.manifest)?;
    let classifier = Classifier::new(config.origin.clone(), manifest)
      .with_api_prefix(config.api_prefix.clone())
      .with_static_extensions(config.static_extensions.clone())
      .with_bypass(config.bypass.clone());

    Ok(
      Self::new(config.version.clone(), &config.cache_prefix, classifier)
        .with_stale_fallback(config.network_first_fallback),
    )
  }

  pub fn with_stale_fallback(mut self, enabled: bool) -> Self {
    self.stale_fallback = enabled;
    self
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn manifest(&self) -> &Manifest {
    self.classifier.manifest()
  }

  pub fn classifier(&self) -> &Classifier {
    &self.classifier
  }
}

/// Lifecycle phase of a version known to a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Installing,
  /// Populated and waiting to take over
  Installed,
  /// Serving, stale namespaces still being removed
  Activating,
  Active,
}

/// An open application session (a loaded page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "session-{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  /// Namespace populated; version is waiting to activate
  Installed,
  /// The version is already active; nothing was fetched
  AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub version: String,
  pub namespace: String,
  /// Sessions now served by this version
  pub claimed: usize,
  pub deleted: Vec<String>,
  /// Stale namespaces whose deletion failed; retried on the next activation
  pub retained: Vec<String>,
}

/// Point-in-time view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationState {
  pub installing: Option<String>,
  pub waiting: Option<String>,
  pub active: Option<String>,
  pub activating: bool,
  pub sessions: usize,
}

#[derive(Default)]
struct State {
  generation: u64,
  installing: Option<(u64, Arc<WorkerVersion>)>,
  waiting: Option<Arc<WorkerVersion>>,
  active: Option<Arc<WorkerVersion>>,
  activating: bool,
  next_session: u64,
  /// Session -> version serving it (None = uncontrolled)
  sessions: HashMap<SessionId, Option<Arc<WorkerVersion>>>,
}

/// The lifecycle controller and request-handling entry point.
///
/// Concurrent identical requests are not coalesced: two cache-first misses
/// for the same identity both hit the network and the later write wins.
pub struct Registration<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  state: Arc<Mutex<State>>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  pub fn new(storage: S, network: N) -> Self {
    Self::from_shared(Arc::new(storage), Arc::new(network))
  }

  pub fn from_shared(storage: Arc<S>, network: Arc<N>) -> Self {
    Self {
      storage,
      network,
      state: Arc::new(Mutex::new(State::default())),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn network(&self) -> &N {
    &self.network
  }

  // State mutations are single assignments, so a poisoned lock is still consistent.
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> RegistrationState {
    let state = self.lock();
    RegistrationState {
      installing: state.installing.as_ref().map(|(_, v)| v.tag.clone()),
      waiting: state.waiting.as_ref().map(|v| v.tag.clone()),
      active: state.active.as_ref().map(|v| v.tag.clone()),
      activating: state.activating,
      sessions: state.sessions.len(),
    }
  }

  /// Phase of the given version tag, if this registration knows it.
  pub fn phase(&self, tag: &str) -> Option<Phase> {
    let state = self.lock();
    if state.active.as_ref().is_some_and(|v| v.tag == tag) {
      return Some(if state.activating {
        Phase::Activating
      } else {
        Phase::Active
      });
    }
    if state.waiting.as_ref().is_some_and(|v| v.tag == tag) {
      return Some(Phase::Installed);
    }
    if state.installing.as_ref().is_some_and(|(_, v)| v.tag == tag) {
      return Some(Phase::Installing);
    }
    None
  }

  /// Fetch every manifest entry and store them in a fresh namespace.
  ///
  /// Population is all-or-nothing: any fetch failure, non-OK status or
  /// storage failure leaves no namespace behind and the active version (if
  /// any) keeps serving. There is no automatic retry.
  pub async fn install(&self, version: WorkerVersion) -> Result<InstallOutcome, LifecycleError> {
    let version = Arc::new(version);
    let generation = {
      let mut state = self.lock();
      if state
        .active
        .as_ref()
        .is_some_and(|active| active.namespace == version.namespace)
      {
        debug!(version = %version.tag, "version already active, skipping install");
        return Ok(InstallOutcome::AlreadyActive);
      }

      state.generation += 1;
      let generation = state.generation;
      if let Some((_, previous)) = state.installing.replace((generation, Arc::clone(&version))) {
        info!(previous = %previous.tag, version = %version.tag, "superseding in-flight install");
      }
      generation
    };

    info!(
      version = %version.tag,
      namespace = %version.namespace,
      entries = version.manifest().len(),
      "installing"
    );

    let fetched = self.fetch_manifest(&version).await;

    // Population happens outside the state lock so requests keep flowing
    let result = if self.install_is_current(generation) {
      fetched.and_then(|entries| self.populate(&version, &entries))
    } else {
      Ok(())
    };

    let mut state = self.lock();
    if !state
      .installing
      .as_ref()
      .is_some_and(|(g, _)| *g == generation)
    {
      warn!(version = %version.tag, "install superseded, discarding result");
      return Err(LifecycleError::Superseded {
        version: version.tag.clone(),
      });
    }
    state.installing = None;

    match result {
      Ok(()) => {
        if let Some(previous) = state.waiting.replace(Arc::clone(&version)) {
          info!(previous = %previous.tag, "replacing waiting version");
        }
        info!(version = %version.tag, "installed, waiting to activate");
        Ok(InstallOutcome::Installed)
      }
      Err(e) => {
        warn!(version = %version.tag, error = %e, "install failed");
        Err(e)
      }
    }
  }

  async fn fetch_manifest(
    &self,
    version: &WorkerVersion,
  ) -> Result<Vec<(RequestIdentity, Response)>, LifecycleError> {
    let fetches = version.manifest().requests().map(|request| async move {
      let response =
        self
          .network
          .fetch(&request)
          .await
          .map_err(|source| LifecycleError::ManifestFetch {
            version: version.tag.clone(),
            url: request.url.clone(),
            source,
          })?;

      if !response.is_cacheable() {
        return Err(LifecycleError::ManifestStatus {
          version: version.tag.clone(),
          url: request.url.clone(),
          status: response.status,
        });
      }

      debug!(url = %request.url, "fetched manifest entry");
      Ok((RequestIdentity::of(&request), response))
    });

    // Every fetch runs to completion; the first failure decides the outcome
    join_all(fetches).await.into_iter().collect()
  }

  fn install_is_current(&self, generation: u64) -> bool {
    self
      .lock()
      .installing
      .as_ref()
      .is_some_and(|(g, _)| *g == generation)
  }

  fn populate(
    &self,
    version: &WorkerVersion,
    entries: &[(RequestIdentity, Response)],
  ) -> Result<(), LifecycleError> {
    self
      .storage
      .populate(&version.namespace, entries)
      .map_err(|e| LifecycleError::Storage {
        version: version.tag.clone(),
        namespace: version.namespace.clone(),
        reason: format!("{:#}", e),
      })
  }

  /// Namespaces still owned by an installing, waiting or active version.
  fn namespaces_in_use(&self) -> HashSet<String> {
    let state = self.lock();
    state
      .installing
      .iter()
      .map(|(_, v)| v)
      .chain(state.waiting.iter())
      .chain(state.active.iter())
      .map(|v| v.namespace.clone())
      .collect()
  }

  /// Promote the waiting version.
  ///
  /// Open sessions are claimed first, so no new request reaches a stale
  /// namespace; then every namespace no installing, waiting or active
  /// version owns is deleted. Deletion failures are logged and left for the
  /// next activation.
  pub fn activate(&self) -> Result<ActivationReport, LifecycleError> {
    let (version, claimed) = {
      let mut state = self.lock();
      let version = state.waiting.take().ok_or(LifecycleError::NothingWaiting)?;
      info!(version = %version.tag, "activating");
      state.active = Some(Arc::clone(&version));
      state.activating = true;
      let claimed = claim(&mut state, &version);
      (version, claimed)
    };
    debug!(claimed, "claimed open sessions");

    let mut report = ActivationReport {
      version: version.tag.clone(),
      namespace: version.namespace.clone(),
      claimed,
      deleted: Vec::new(),
      retained: Vec::new(),
    };

    match self.storage.list_namespaces() {
      Ok(names) => {
        // Taken after listing, so an install that finished meanwhile is kept
        let in_use = self.namespaces_in_use();
        for name in names.into_iter().filter(|n| !in_use.contains(n)) {
          match self.storage.delete_namespace(&name) {
            Ok(_) => {
              info!(namespace = %name, "deleted stale namespace");
              report.deleted.push(name);
            }
            Err(e) => {
              warn!(namespace = %name, error = %e, "failed to delete stale namespace");
              report.retained.push(name);
            }
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to enumerate namespaces, stale cleanup deferred"),
    }

    let mut state = self.lock();
    if state
      .active
      .as_ref()
      .is_some_and(|active| Arc::ptr_eq(active, &version))
    {
      state.activating = false;
    }
    info!(version = %version.tag, namespace = %version.namespace, "active");

    Ok(report)
  }

  /// Install and immediately take over. Returns None if the version was
  /// already active.
  pub async fn update(
    &self,
    version: WorkerVersion,
  ) -> Result<Option<ActivationReport>, LifecycleError> {
    match self.install(version).await? {
      InstallOutcome::AlreadyActive => Ok(None),
      InstallOutcome::Installed => self.activate().map(Some),
    }
  }

  /// Adopt a version whose namespace survives from an earlier run.
  ///
  /// Returns false (and changes nothing) if the namespace does not exist or
  /// lacks any manifest entry; the caller should install instead.
  pub fn resume(&self, version: WorkerVersion) -> Result<bool> {
    let namespaces = self.storage.list_namespaces()?;
    if !namespaces.iter().any(|n| *n == version.namespace) {
      debug!(namespace = %version.namespace, "no namespace to resume");
      return Ok(false);
    }

    for request in version.manifest().requests() {
      let identity = RequestIdentity::of(&request);
      if self.storage.get(&version.namespace, &identity)?.is_none() {
        warn!(namespace = %version.namespace, missing = %identity, "namespace incomplete, not resuming");
        return Ok(false);
      }
    }

    let version = Arc::new(version);
    let mut state = self.lock();
    state.active = Some(Arc::clone(&version));
    state.activating = false;
    claim(&mut state, &version);
    info!(version = %version.tag, namespace = %version.namespace, "resumed active version");
    Ok(true)
  }

  /// Register a newly loaded page; it is controlled by the active version, if any.
  pub fn open_session(&self) -> SessionId {
    let mut state = self.lock();
    state.next_session += 1;
    let id = SessionId(state.next_session);
    let controller = state.active.clone();
    state.sessions.insert(id, controller);
    id
  }

  pub fn close_session(&self, session: SessionId) -> bool {
    self.lock().sessions.remove(&session).is_some()
  }

  /// Version tag serving the session.
  pub fn controller(&self, session: SessionId) -> Option<String> {
    let state = self.lock();
    state
      .sessions
      .get(&session)
      .and_then(|controller| controller.as_ref().map(|v| v.tag.clone()))
  }

  /// Entry point for every request a session issues.
  ///
  /// Uncontrolled (or unknown) sessions are not intercepted.
  pub async fn handle_fetch(
    &self,
    session: SessionId,
    request: &Request,
  ) -> Result<CacheResult<Response>, FetchError> {
    let controller = {
      let state = self.lock();
      state.sessions.get(&session).cloned().flatten()
    };

    let Some(version) = controller else {
      debug!(%session, url = %request.url, "uncontrolled session, not intercepting");
      return strategy::passthrough(self.network.as_ref(), request).await;
    };

    let strategy = version.classifier.classify(request);
    StrategyExecutor::new(
      self.storage.as_ref(),
      self.network.as_ref(),
      &version.namespace,
    )
    .with_stale_fallback(version.stale_fallback)
    .execute(strategy, request)
    .await
  }
}

fn claim(state: &mut State, version: &Arc<WorkerVersion>) -> usize {
  for controller in state.sessions.values_mut() {
    *controller = Some(Arc::clone(version));
  }
  state.sessions.len()
}

impl<S, N> Clone for Registration<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      state: Arc::clone(&self.state),
    }
  }
}
