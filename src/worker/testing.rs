//! Scripted network and storage doubles for worker tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage, RequestIdentity};
use crate::net::{Network, NetworkError, Request, Response};

/// Network with per-URL responses, an online switch and a call counter.
///
/// Unknown URLs answer 404.
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  online: AtomicBool,
  calls: AtomicUsize,
  last_request: Mutex<Option<Request>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
      last_request: Mutex::new(None),
    }
  }

  pub fn with_route(self, url: &str, body: &str) -> Self {
    self.set_response(url, Response::new(200, body));
    self
  }

  pub fn set_response(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Make a single URL unreachable while the rest of the network works.
  pub fn fail_url(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_request(&self) -> Option<Request> {
    self.last_request.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    *self.last_request.lock().unwrap() = Some(request.clone());

    // Let concurrent fetches interleave
    tokio::task::yield_now().await;

    if !self.online.load(Ordering::SeqCst) {
      return Err(NetworkError::Offline);
    }
    let url = request.url.as_str();
    if self.failing.lock().unwrap().contains(url) {
      return Err(NetworkError::Unreachable(url.to_string()));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

type Gate = Mutex<Option<(Sender<()>, Receiver<()>)>>;

/// Holds a storage call open until [`Pause::resume`] is called.
pub struct Pause {
  entered: Receiver<()>,
  resume: Sender<()>,
}

impl Pause {
  fn arm(gate: &Gate) -> Self {
    let (entered_tx, entered) = channel();
    let (resume, resume_rx) = channel();
    *gate.lock().unwrap() = Some((entered_tx, resume_rx));
    Self { entered, resume }
  }

  /// Block until the paused call has started.
  pub fn wait_entered(&self) {
    self.entered.recv().unwrap();
  }

  pub fn resume(&self) {
    self.resume.send(()).unwrap();
  }
}

fn pass_gate(gate: &Gate) {
  let armed = gate.lock().unwrap().take();
  if let Some((entered, resume)) = armed {
    let _ = entered.send(());
    let _ = resume.recv();
  }
}

/// Memory storage whose reads, writes or deletes can be made to fail, and
/// whose listing or population can be paused mid-call.
#[derive(Default)]
pub struct FailingStorage {
  inner: MemoryStorage,
  reads: AtomicBool,
  writes: AtomicBool,
  deletes: AtomicBool,
  list_gate: Gate,
  populate_gate: Gate,
}

impl FailingStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_reads(&self, fail: bool) {
    self.reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.writes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_deletes(&self, fail: bool) {
    self.deletes.store(fail, Ordering::SeqCst);
  }

  /// Pause the next `list_namespaces` before it reads.
  pub fn pause_next_list(&self) -> Pause {
    Pause::arm(&self.list_gate)
  }

  /// Pause the next `populate` before it writes.
  pub fn pause_next_populate(&self) -> Pause {
    Pause::arm(&self.populate_gate)
  }

  fn check(flag: &AtomicBool, op: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
      Err(eyre!("storage busy: {} refused", op))
    } else {
      Ok(())
    }
  }
}

impl CacheStorage for FailingStorage {
  fn open_namespace(&self, name: &str) -> Result<bool> {
    self.inner.open_namespace(name)
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    pass_gate(&self.list_gate);
    self.inner.list_namespaces()
  }

  fn delete_namespace(&self, name: &str) -> Result<bool> {
    Self::check(&self.deletes, "delete")?;
    self.inner.delete_namespace(name)
  }

  fn get(&self, namespace: &str, identity: &RequestIdentity) -> Result<Option<CachedResponse>> {
    Self::check(&self.reads, "read")?;
    self.inner.get(namespace, identity)
  }

  fn put(&self, namespace: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
    Self::check(&self.writes, "write")?;
    self.inner.put(namespace, identity, response)
  }

  fn populate(&self, namespace: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
    pass_gate(&self.populate_gate);
    Self::check(&self.writes, "write")?;
    self.inner.populate(namespace, entries)
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    self.inner.entry_count(namespace)
  }
}
