//! In-memory cluster for tests
//!
//! [`FakeCluster`] implements [`ResourceClient`] with enough API-server
//! behavior for flow tests: resource versions with optimistic-lock conflicts,
//! label-selector lists, JSON merge patch, subresources, a service-account
//! token controller, per-resource get hooks, per-kind create hooks and
//! injected failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use cm_common::kube_utils::ResourceRef;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::client::{ApiError, ListQuery, ResourceClient, TargetConnector};

/// Secret type populated by the token controller
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Kind of call made against the fake
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeOp {
    /// `get`
    Get,
    /// `list`
    List,
    /// `create`
    Create,
    /// `replace`
    Replace,
    /// `merge_patch`
    Patch,
    /// `replace_subresource`
    Subresource,
    /// `delete`
    Delete,
}

impl FakeOp {
    fn is_write(self) -> bool {
        !matches!(self, Self::Get | Self::List)
    }
}

/// Called on each `get` of a resource with the number of earlier gets and a
/// mutable handle on the stored object.
pub type GetHook = Box<dyn FnMut(u32, &mut Value) + Send>;

/// Called on each `create` of a kind with the object about to be stored.
pub type CreateHook = Box<dyn FnMut(&mut Value) + Send>;

type Key = (String, Option<String>, String);

fn key(r: &ResourceRef) -> Key {
    (r.kind.clone(), r.namespace.clone(), r.name.clone())
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    next_version: u64,
    calls: HashMap<FakeOp, u32>,
    gets_per_resource: HashMap<Key, u32>,
    get_hooks: HashMap<Key, GetHook>,
    create_hooks: HashMap<String, CreateHook>,
    failures: VecDeque<(FakeOp, ApiError)>,
    token_controller_disabled: bool,
}

impl State {
    fn bump_version(&mut self, obj: &mut Value) {
        self.next_version += 1;
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert(
                "resourceVersion".to_string(),
                Value::String(self.next_version.to_string()),
            );
        }
    }

    fn record(&mut self, op: FakeOp) -> Result<(), ApiError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(pos) = self.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = self.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Stateful in-memory API server. Clones share state.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an object directly, bypassing call accounting
    pub fn seed(&self, object: Value) -> ResourceRef {
        let r = ResourceRef::from_manifest(&object)
            .unwrap_or_else(|e| panic!("seeded object must be addressable: {e}"));
        let mut state = self.lock();
        let mut object = object;
        state.bump_version(&mut object);
        state.objects.insert(key(&r), object);
        r
    }

    /// Current stored object
    pub fn object(&self, target: &ResourceRef) -> Option<Value> {
        self.lock().objects.get(&key(target)).cloned()
    }

    /// All stored objects of a kind
    pub fn objects_of_kind(&self, kind: &str) -> Vec<Value> {
        self.lock()
            .objects
            .iter()
            .filter(|((k, _, _), _)| k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Run `hook` on every `get` of `target`
    pub fn on_get(&self, target: &ResourceRef, hook: impl FnMut(u32, &mut Value) + Send + 'static) {
        self.lock().get_hooks.insert(key(target), Box::new(hook));
    }

    /// Run `hook` on every `create` of `kind`
    pub fn on_create(&self, kind: &str, hook: impl FnMut(&mut Value) + Send + 'static) {
        self.lock()
            .create_hooks
            .insert(kind.to_string(), Box::new(hook));
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: FakeOp, err: ApiError) {
        self.lock().failures.push_back((op, err));
    }

    /// Stop populating `data.token` on service-account token secrets
    pub fn disable_token_controller(&self) {
        self.lock().token_controller_disabled = true;
    }

    /// Number of calls of one kind
    pub fn calls(&self, op: FakeOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total number of calls
    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    /// Number of mutating calls
    pub fn writes(&self) -> u32 {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, n)| *n)
            .sum()
    }
}

/// [`TargetConnector`] handing out one [`FakeCluster`] and recording the
/// kubeconfig documents it was given.
#[derive(Clone, Default)]
pub struct FakeConnector {
    cluster: FakeCluster,
    kubeconfigs: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    /// Connector for `cluster`
    pub fn new(cluster: FakeCluster) -> Self {
        Self {
            cluster,
            kubeconfigs: Arc::default(),
        }
    }

    /// Kubeconfig documents seen so far
    pub fn kubeconfigs(&self) -> Vec<String> {
        self.kubeconfigs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TargetConnector for FakeConnector {
    async fn connect(&self, kubeconfig_yaml: &str) -> cm_common::Result<Arc<dyn ResourceClient>> {
        self.kubeconfigs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(kubeconfig_yaml.to_string());
        Ok(Arc::new(self.cluster.clone()))
    }
}

fn random_token() -> String {
    let raw: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn matches_labels(obj: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| {
            let labels = obj.pointer("/metadata/labels");
            let label = |k: &str| labels.and_then(|l| l.get(k)).and_then(Value::as_str);
            if let Some((k, v)) = term.split_once("!=") {
                label(k) != Some(v)
            } else if let Some((k, v)) = term.split_once('=') {
                label(k) == Some(v.trim_start_matches('='))
            } else {
                label(term).is_some()
            }
        })
}

fn matches_fields(obj: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .all(|(path, expected)| {
            let pointer = format!("/{}", path.replace('.', "/"));
            obj.pointer(&pointer).and_then(Value::as_str) == Some(expected)
        })
}

/// RFC 7386 JSON merge patch
fn json_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(t) = target {
        for (k, v) in patch {
            if v.is_null() {
                t.remove(k);
            } else {
                json_merge_patch(t.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn get(&self, target: &ResourceRef) -> Result<Option<Value>, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Get)?;
        let k = key(target);
        let seen = {
            let n = state.gets_per_resource.entry(k.clone()).or_default();
            let seen = *n;
            *n += 1;
            seen
        };
        let State {
            objects, get_hooks, ..
        } = &mut *state;
        if let (Some(obj), Some(hook)) = (objects.get_mut(&k), get_hooks.get_mut(&k)) {
            hook(seen, obj);
        }
        Ok(state.objects.get(&k).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Value>, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::List)?;
        Ok(state
            .objects
            .iter()
            .filter(|((kind, ns, _), _)| {
                *kind == query.kind
                    && (query.namespace.is_none() || query.namespace == *ns)
            })
            .filter(|(_, obj)| {
                query
                    .label_selector
                    .as_deref()
                    .map_or(true, |s| matches_labels(obj, s))
                    && query
                        .field_selector
                        .as_deref()
                        .map_or(true, |s| matches_fields(obj, s))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, target: &ResourceRef, manifest: &Value) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Create)?;
        let k = key(target);
        if state.objects.contains_key(&k) {
            return Err(ApiError::conflict(target, "already exists"));
        }

        let mut obj = manifest.clone();
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert(
                "uid".to_string(),
                Value::String(format!("uid-{}", state.next_version + 1)),
            );
        }
        let is_token_secret = target.kind == "Secret"
            && obj.get("type").and_then(Value::as_str) == Some(SERVICE_ACCOUNT_TOKEN_TYPE);
        if is_token_secret && !state.token_controller_disabled {
            let data = obj
                .as_object_mut()
                .map(|o| o.entry("data").or_insert_with(|| json!({})));
            if let Some(Value::Object(data)) = data {
                data.insert("token".to_string(), Value::String(random_token()));
            }
        }
        if let Some(hook) = state.create_hooks.get_mut(&target.kind) {
            hook(&mut obj);
        }
        // review kinds are evaluated and returned, never stored
        if target.kind.ends_with("Review") {
            return Ok(obj);
        }
        state.bump_version(&mut obj);
        state.objects.insert(k, obj.clone());
        Ok(obj)
    }

    async fn replace(&self, target: &ResourceRef, manifest: &Value) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Replace)?;
        let k = key(target);
        let Some(current) = state.objects.get(&k) else {
            return Err(ApiError::not_found(target));
        };
        let expected = manifest.pointer("/metadata/resourceVersion");
        if expected.is_some() && expected != current.pointer("/metadata/resourceVersion") {
            return Err(ApiError::conflict(target, "the object has been modified"));
        }
        let mut obj = manifest.clone();
        state.bump_version(&mut obj);
        state.objects.insert(k, obj.clone());
        Ok(obj)
    }

    async fn merge_patch(&self, target: &ResourceRef, patch: &Value) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Patch)?;
        let k = key(target);
        let Some(mut obj) = state.objects.get(&k).cloned() else {
            return Err(ApiError::not_found(target));
        };
        json_merge_patch(&mut obj, patch);
        state.bump_version(&mut obj);
        state.objects.insert(k, obj.clone());
        Ok(obj)
    }

    async fn replace_subresource(
        &self,
        target: &ResourceRef,
        _subresource: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Subresource)?;
        let k = key(target);
        let Some(mut obj) = state.objects.get(&k).cloned() else {
            return Err(ApiError::not_found(target));
        };
        if let (Some(o), Some(status)) = (obj.as_object_mut(), body.get("status")) {
            o.insert("status".to_string(), status.clone());
        }
        state.bump_version(&mut obj);
        state.objects.insert(k, obj.clone());
        Ok(obj)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.record(FakeOp::Delete)?;
        state
            .objects
            .remove(&key(target))
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(target))
    }
}
