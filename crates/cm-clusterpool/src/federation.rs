//! Credential federation for claimed clusters
//!
//! Drives one claim through
//! `ClaimUnknown -> Resuming -> Running -> TokenExchangeInProgress -> ContextReady`.
//! The pool API is only used to resume the claim, watch its phase and find
//! the claimed cluster's admin kubeconfig; the service account and its token
//! live on the claimed cluster itself. A failure at any stage is reported as
//! `"<stage> failed: <cause>"` and leaves whatever was already written in
//! place, so the recovery is to run the flow again.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use cm_applier::{
    wait_for_resource, Applier, ApplyReport, DryRunApplier, KubeApplier, ResourceClient,
    TargetConnector, TemplateRenderer, ValueMapping, WaitOptions,
};
use cm_common::kube_utils::ResourceRef;
use cm_common::retry::RetryConfig;
use cm_common::{Error, Result, DEFAULT_NAMESPACE};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claim::{claim_phase, get_claim, resolve_target_kubeconfig, ClaimPhase, ClusterClaim};
use crate::context::{ContextBuilder, ContextEntry, ContextStore, Kubeconfig};
use crate::host::ClusterPoolHost;
use crate::power::{set_power_state, PowerState};
use crate::scenario::{self, TOKEN_BUNDLE};

/// Default time allowed for a claim to reach Running
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default time allowed for the token controller to populate the secret
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(60);
/// Default poll cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const TOKEN_KEY: &str = "token";

/// Where a failed flow stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Identifying the pool user
    Identify,
    /// Rendering the credential bundle
    Render,
    /// Requesting the claim's cluster to run
    Resume,
    /// Waiting for the claim to report Running
    Wait,
    /// Resolving and connecting to the claimed cluster
    ResolveTarget,
    /// Creating the service account and reading its token
    TokenExchange,
    /// Writing the context store
    PersistContext,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identify => "identify",
            Self::Render => "render",
            Self::Resume => "resume",
            Self::Wait => "wait",
            Self::ResolveTarget => "resolve-target",
            Self::TokenExchange => "token-exchange",
            Self::PersistContext => "persist-context",
        })
    }
}

/// State of one attach flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationState {
    /// Nothing requested yet
    ClaimUnknown,
    /// Resume requested, waiting for Running
    Resuming,
    /// The claim reported Running
    Running,
    /// Service account applied on the claimed cluster, token pending
    TokenExchangeInProgress,
    /// Context persisted
    ContextReady,
    /// The flow stopped at `stage`
    Failed {
        /// Stage that failed
        stage: Stage,
        /// Rendered cause
        cause: String,
    },
}

impl fmt::Display for FederationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClaimUnknown => f.write_str("ClaimUnknown"),
            Self::Resuming => f.write_str("Resuming"),
            Self::Running => f.write_str("Running"),
            Self::TokenExchangeInProgress => f.write_str("TokenExchangeInProgress"),
            Self::ContextReady => f.write_str("ContextReady"),
            Self::Failed { stage, .. } => write!(f, "Failed({stage})"),
        }
    }
}

impl FederationState {
    /// Whether the flow may move from `self` to `next`
    pub fn can_transition_to(&self, next: &FederationState) -> bool {
        use FederationState::*;
        matches!(
            (self, next),
            (ClaimUnknown, Resuming)
                | (Resuming, Running)
                | (Running, TokenExchangeInProgress)
                | (TokenExchangeInProgress, ContextReady)
        ) || (!matches!(self, Failed { .. } | ContextReady) && matches!(next, Failed { .. }))
    }
}

/// Recorded walk through [`FederationState`]s
#[derive(Debug, Clone, PartialEq, Eq)]
struct Transitions {
    claim: String,
    history: Vec<FederationState>,
}

impl Transitions {
    fn new(claim: &str) -> Self {
        Self {
            claim: claim.to_string(),
            history: vec![FederationState::ClaimUnknown],
        }
    }

    fn current(&self) -> &FederationState {
        // history always holds the initial state
        self.history.last().unwrap_or(&FederationState::ClaimUnknown)
    }

    fn advance(&mut self, next: FederationState) {
        if !self.current().can_transition_to(&next) {
            warn!(claim = %self.claim, from = %self.current(), to = %next, "unexpected transition");
        }
        info!(claim = %self.claim, from = %self.current(), to = %next, "claim state");
        self.history.push(next);
    }

    fn fail(&mut self, stage: Stage, err: Error) -> Error {
        error!(claim = %self.claim, %stage, error = %err, "attach failed");
        self.advance(FederationState::Failed {
            stage,
            cause: err.to_string(),
        });
        Error::failed(stage.to_string(), err)
    }
}

/// Options of one attach
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Claim to attach
    pub claim: String,
    /// Service account to create; discovered from the pool identity when unset
    pub service_account: Option<String>,
    /// Time allowed for the claim to reach Running
    pub timeout: Duration,
    /// Time allowed for the token to be populated
    pub token_timeout: Duration,
    /// Poll cadence for both waits
    pub poll_interval: Duration,
    /// Make the new context current
    pub set_current: bool,
    /// Only render the credential bundle
    pub dry_run: bool,
    /// Where rendered manifests go on a dry run
    pub output_file: Option<PathBuf>,
    /// Retry policy for writes
    pub retry: RetryConfig,
}

impl AttachOptions {
    /// Defaults for attaching `claim`
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            service_account: None,
            timeout: DEFAULT_ATTACH_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            set_current: false,
            dry_run: false,
            output_file: None,
            retry: RetryConfig::default(),
        }
    }

    /// Wait `minutes` for Running
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout = Duration::from_secs(minutes * 60);
        self
    }
}

/// Result of a completed attach
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOutcome {
    /// States visited, first to last
    pub history: Vec<FederationState>,
    /// Persisted context; `None` on a dry run
    pub context: Option<ContextEntry>,
    /// Per-resource log of the credential bundle
    pub report: ApplyReport,
}

impl AttachOutcome {
    /// Final state
    pub fn state(&self) -> &FederationState {
        self.history.last().unwrap_or(&FederationState::ClaimUnknown)
    }
}

/// Creates a service account on a claimed cluster and reads back its token.
///
/// Each exchange deletes the previous token secret first so the returned
/// token is always fresh.
pub struct TokenExchange<'a> {
    target: Arc<dyn ResourceClient>,
    renderer: &'a TemplateRenderer,
    retry: RetryConfig,
    wait: WaitOptions,
}

impl<'a> TokenExchange<'a> {
    /// Exchange against `target`
    pub fn new(target: Arc<dyn ResourceClient>, renderer: &'a TemplateRenderer) -> Self {
        Self {
            target,
            renderer,
            retry: RetryConfig::default(),
            wait: WaitOptions::new(DEFAULT_POLL_INTERVAL, DEFAULT_TOKEN_TIMEOUT),
        }
    }

    /// Override the write retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the token wait
    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Secret holding the token of `service_account`
    pub fn token_secret(service_account: &str) -> ResourceRef {
        ResourceRef::namespaced(
            "v1",
            "Secret",
            DEFAULT_NAMESPACE,
            format!("{service_account}-token"),
        )
    }

    /// Apply the credential bundle and return the apply log with the token
    pub async fn exchange(
        &self,
        service_account: &str,
        cancel: &CancellationToken,
    ) -> Result<(ApplyReport, String)> {
        let values = token_values(service_account);
        let bundle = self
            .renderer
            .render(TOKEN_BUNDLE, &values, Some(DEFAULT_NAMESPACE))?;

        let secret = Self::token_secret(service_account);
        match self.target.delete(&secret).await {
            Ok(()) => debug!(secret = %secret, "rotated previous token"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let applier = KubeApplier::new(self.target.clone()).with_retry(self.retry.clone());
        let report = applier.apply(&bundle).await?;

        let encoded = wait_for_resource(
            self.target.as_ref(),
            &secret,
            |obj: &Value| {
                obj.pointer(&format!("/data/{TOKEN_KEY}"))
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            },
            |_| true,
            &self.wait,
            cancel,
        )
        .await
        .map_err(|e| match e {
            Error::WaitTimeout { .. } => Error::token_extraction(
                secret.to_string(),
                format!("no {TOKEN_KEY} after {:?}", self.wait.timeout),
            ),
            other => other,
        })?;

        let token = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|e| Error::token_extraction(secret.to_string(), format!("not base64: {e}")))
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| {
                    Error::token_extraction(secret.to_string(), format!("not UTF-8: {e}"))
                })
            })?;
        Ok((report, token))
    }
}

fn token_values(service_account: &str) -> ValueMapping {
    ValueMapping::new().with("serviceAccountName", service_account)
}

/// Username the pool client authenticates as
pub async fn whoami(pool: &dyn ResourceClient) -> Result<String> {
    let review_ref =
        ResourceRef::cluster_scoped("authentication.k8s.io/v1", "SelfSubjectReview", "");
    let review = json!({
        "apiVersion": review_ref.api_version,
        "kind": review_ref.kind,
        "metadata": {},
    });
    let answered = pool.create(&review_ref, &review).await?;
    answered
        .pointer("/status/userInfo/username")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::internal_with_context("whoami", "review returned no username"))
}

/// Attaches claimed clusters of one pool host
pub struct Federation<'a> {
    host: &'a ClusterPoolHost,
    pool: Arc<dyn ResourceClient>,
    connector: &'a dyn TargetConnector,
    store: &'a ContextStore,
    renderer: TemplateRenderer,
}

impl<'a> Federation<'a> {
    /// Flow over `pool` (the host's API) writing contexts to `store`
    pub fn new(
        host: &'a ClusterPoolHost,
        pool: Arc<dyn ResourceClient>,
        connector: &'a dyn TargetConnector,
        store: &'a ContextStore,
    ) -> Self {
        Self {
            host,
            pool,
            connector,
            store,
            renderer: scenario::renderer(),
        }
    }

    /// Run the flow for one claim
    pub async fn attach(
        &self,
        opts: &AttachOptions,
        cancel: &CancellationToken,
    ) -> Result<AttachOutcome> {
        if opts.claim.trim().is_empty() {
            return Err(Error::validation("clusterclaim name is missing"));
        }
        // The CLI short-circuits dry runs itself; this branch serves library callers.
        if opts.dry_run {
            return render_credentials(opts).await;
        }

        let mut states = Transitions::new(&opts.claim);

        let service_account = match &opts.service_account {
            Some(sa) => sa.clone(),
            None => {
                let user = whoami(self.pool.as_ref())
                    .await
                    .map_err(|e| states.fail(Stage::Identify, e))?;
                self.host.service_account_name(&user)
            }
        };
        // validate the bundle before anything is written
        self.renderer
            .render(TOKEN_BUNDLE, &token_values(&service_account), None)
            .map_err(|e| states.fail(Stage::Render, e))?;

        self.resume(opts)
            .await
            .map_err(|e| states.fail(Stage::Resume, e))?;
        states.advance(FederationState::Resuming);

        let wait = WaitOptions::new(opts.poll_interval, opts.timeout);
        wait_for_resource(
            self.pool.as_ref(),
            &ClusterClaim::resource_ref(&self.host.namespace, &opts.claim),
            claim_phase,
            |phase| *phase == ClaimPhase::Running,
            &wait,
            cancel,
        )
        .await
        .map_err(|e| states.fail(Stage::Wait, e))?;
        states.advance(FederationState::Running);

        let admin_kubeconfig =
            resolve_target_kubeconfig(self.pool.as_ref(), &self.host.namespace, &opts.claim)
                .await
                .map_err(|e| states.fail(Stage::ResolveTarget, e))?;
        let cluster = target_cluster(&admin_kubeconfig)
            .map_err(|e| states.fail(Stage::ResolveTarget, e))?;
        let target = self
            .connector
            .connect(&admin_kubeconfig)
            .await
            .map_err(|e| states.fail(Stage::ResolveTarget, e))?;

        let exchange = TokenExchange::new(target, &self.renderer)
            .with_retry(opts.retry.clone())
            .with_wait(WaitOptions::new(opts.poll_interval, opts.token_timeout));
        states.advance(FederationState::TokenExchangeInProgress);
        let (report, token) = exchange
            .exchange(&service_account, cancel)
            .await
            .map_err(|e| states.fail(Stage::TokenExchange, e))?;

        let context_name = self.host.context_name_for(&opts.claim);
        let entry = ContextEntry {
            user: format!("{service_account}/{context_name}"),
            name: context_name,
            server: cluster.server,
            certificate_authority_data: cluster.certificate_authority_data,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify.unwrap_or(false),
            token,
            namespace: DEFAULT_NAMESPACE.to_string(),
        };
        ContextBuilder::new(self.store)
            .upsert(&entry, opts.set_current)
            .map_err(|e| states.fail(Stage::PersistContext, e))?;
        states.advance(FederationState::ContextReady);

        Ok(AttachOutcome {
            history: states.history,
            context: Some(entry),
            report,
        })
    }

    /// Request Running unless the claim already runs or is not bound yet.
    ///
    /// An unbound claim gets a cluster from the pool that the pool itself
    /// starts.
    async fn resume(&self, opts: &AttachOptions) -> Result<()> {
        let claim = get_claim(self.pool.as_ref(), &self.host.namespace, &opts.claim).await?;
        if claim.phase == Some(ClaimPhase::Running) {
            debug!(claim = %claim.name, "already running");
            return Ok(());
        }
        if claim.target_namespace.is_none() {
            debug!(claim = %claim.name, "not bound to a cluster yet");
            return Ok(());
        }
        let applier = KubeApplier::new(self.pool.clone()).with_retry(opts.retry.clone());
        set_power_state(
            self.pool.as_ref(),
            &applier,
            &self.renderer,
            self.host,
            std::slice::from_ref(&opts.claim),
            PowerState::Running,
        )
        .await?;
        Ok(())
    }
}

/// Render the credential bundle of a dry run.
///
/// No cluster is contacted and no context is written, so the service account
/// name has to be given.
pub async fn render_credentials(opts: &AttachOptions) -> Result<AttachOutcome> {
    let service_account = opts.service_account.as_deref().ok_or_else(|| {
        Error::validation_for_field(
            "serviceAccountName",
            "a service account name is required for a dry run",
        )
    })?;
    let bundle = scenario::renderer().render(
        TOKEN_BUNDLE,
        &token_values(service_account),
        Some(DEFAULT_NAMESPACE),
    )?;
    let applier = match &opts.output_file {
        Some(path) => DryRunApplier::with_output_file(path),
        None => DryRunApplier::new(),
    };
    let report = applier.apply(&bundle).await?;
    Ok(AttachOutcome {
        history: vec![FederationState::ClaimUnknown],
        context: None,
        report,
    })
}

fn target_cluster(admin_kubeconfig: &str) -> Result<crate::context::ClusterConfig> {
    Kubeconfig::from_yaml(admin_kubeconfig)?
        .current_cluster()
        .cloned()
        .ok_or_else(|| {
            Error::internal_with_context("resolve_target", "admin kubeconfig names no cluster")
        })
}
