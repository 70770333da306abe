//! The staged installation driver.
//!
//! Eight strictly sequential steps run on whatever task calls
//! [`Installer::install`]; every human or policy decision leaves through
//! the listener seam and the step either advances, reruns (after
//! credentials arrive), or aborts. Cancellation is observed at the start
//! of each step and inside transfers, never preemptively.

use std::cmp::Ordering;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use log::{debug, info, warn};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;

use otapkg_client::error::TransferError;
use otapkg_client::transfer::{BoxFuture, ResourceFetcher, TransferListener, TransferRequest};
use otapkg_core::descriptor::parse_descriptor;
use otapkg_core::identity::PackageIdentity;
use otapkg_core::suite::{self, PushDeclaration, SuiteIdentity};
use otapkg_notify::queue::{NotificationQueue, StatusPoster};
use otapkg_notify::status::StatusCode;
use otapkg_x509::cert::{parse_certificate, Certificate, DigestKind};
use otapkg_x509::store::TrustStore;
use otapkg_x509::verify::{self, EKU_NONE, KU_DIGITAL_SIGNATURE};

use crate::archive;
use crate::domain::{self, SecurityDomain};
use crate::error::{InstallError, StorageError};
use crate::listener::{Advisory, DownloadSummary, InstallListener};
use crate::optimize::{NoopOptimizer, PostInstallOptimizer};
use crate::push::{NoopPushRegistry, PushRegistry};
use crate::request::InstallSource;
use crate::state::{InstallState, InstallStep};
use crate::store::{InstalledSuite, PackageStore};

/// Media type of descriptors.
pub const MEDIA_TYPE_DESCRIPTOR: &str = "text/vnd.otapkg.descriptor";
/// Media type of archives. An absent type is tolerated for archives.
pub const MEDIA_TYPE_ARCHIVE: &str = "application/vnd.otapkg.archive";

/// Tunable installation policy.
///
/// The quota factors reproduce the historical sizing margin (descriptor
/// re-parse headroom and UTF-8 URL expansion); they are compatibility
/// defaults, not load-bearing invariants.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Multiplier applied to the descriptor length in the quota estimate.
    pub descriptor_factor: u64,
    /// Multiplier applied to the archive URL length in the quota estimate.
    pub url_factor: u64,
    /// Minimum elapsed seconds before a commit; a trivially fast
    /// confirmation flow pauses for the remainder.
    pub min_install_secs: u64,
    /// Domain assigned to suites whose signature chain verifies.
    pub trusted_domain: SecurityDomain,
    /// Domain assigned to unsigned suites.
    pub unsigned_domain: SecurityDomain,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            descriptor_factor: 2,
            url_factor: 3,
            min_install_secs: 2,
            trusted_domain: SecurityDomain::trusted_default(),
            unsigned_domain: SecurityDomain::unsigned_default(),
        }
    }
}

enum StepOutcome {
    Advance,
    Decision(Advisory),
    NeedCredentials { url: String, proxy: bool },
    Committed(InstalledSuite),
}

enum Fetched {
    Bytes(Vec<u8>),
    Credentials { url: String, proxy: bool },
}

/// Drives installations against a set of collaborator seams.
pub struct Installer {
    fetcher: Arc<dyn ResourceFetcher>,
    store: Arc<dyn PackageStore>,
    trust: Arc<dyn TrustStore>,
    push: Arc<dyn PushRegistry>,
    optimizer: Arc<dyn PostInstallOptimizer>,
    listener: Option<Arc<dyn InstallListener>>,
    notifications: Mutex<NotificationQueue>,
    poster: Arc<dyn StatusPoster>,
    config: InstallerConfig,
}

impl Installer {
    /// Build an installer over the mandatory collaborators. Push registry
    /// and optimizer default to no-ops; no listener is attached, which
    /// makes every advisory condition fatal until one is.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        store: Arc<dyn PackageStore>,
        trust: Arc<dyn TrustStore>,
        notifications: NotificationQueue,
        poster: Arc<dyn StatusPoster>,
        config: InstallerConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            trust,
            push: Arc::new(NoopPushRegistry),
            optimizer: Arc::new(NoopOptimizer),
            listener: None,
            notifications: Mutex::new(notifications),
            poster,
            config,
        }
    }

    /// Attach the decision listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn InstallListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Replace the push registry collaborator.
    #[must_use]
    pub fn with_push_registry(mut self, push: Arc<dyn PushRegistry>) -> Self {
        self.push = push;
        self
    }

    /// Replace the post-commit optimizer.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn PostInstallOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Run one installation to completion.
    ///
    /// The provider's notify URL, when declared, always receives a status
    /// post — success or a numbered failure — without ever masking the
    /// returned result.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError`] after full rollback on any fatal
    /// condition, including a rejected advisory.
    pub async fn install(
        &self,
        request: crate::request::InstallRequest,
        cancel: Arc<AtomicBool>,
    ) -> Result<InstalledSuite, InstallError> {
        let mut state = InstallState::new(request, cancel);
        info!("installing from {}", state.request.source.url());
        let result = self.drive(&mut state).await;
        match &result {
            Ok(suite) => {
                info!("installed {}", suite.identity);
                self.notify(&state, StatusCode::Success).await;
            }
            Err(err) => {
                warn!("installation failed: {err}");
                Self::cleanup(&mut state);
                self.notify(&state, err.status_code()).await;
            }
        }
        result
    }

    /// Remove an installed suite, unregistering its push connections and
    /// posting a deletion notification.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Storage`] when the suite is missing or the
    /// store fails.
    pub async fn remove(
        &self,
        name: &otapkg_core::types::SuiteName,
        vendor: &otapkg_core::types::VendorName,
    ) -> Result<InstalledSuite, InstallError> {
        let suite = self.store.remove(name, vendor)?;
        for decl in &suite.push {
            self.push.unregister(&suite.identity, &decl.endpoint);
        }
        if let Some(url) = suite.properties.get(suite::KEY_NOTIFY_URL) {
            let mut queue = self.notifications.lock().await;
            queue
                .notify(self.poster.as_ref(), url, StatusCode::DeletionNotification)
                .await;
        }
        Ok(suite)
    }

    async fn drive(&self, state: &mut InstallState) -> Result<InstalledSuite, InstallError> {
        let suite = loop {
            // safe point: a pending advisory is resolved or gone, and
            // cancellation takes effect here
            state.pending_advisory = None;
            if state.cancellation_due() {
                return Err(InstallError::Cancelled);
            }
            debug!("step {}: {:?}", state.step.number(), state.step);
            match self.run_step(state).await? {
                StepOutcome::Advance => state.advance(),
                StepOutcome::Decision(advisory) => self.resolve_advisory(state, advisory).await?,
                StepOutcome::NeedCredentials { url, proxy } => {
                    self.resolve_credentials(state, &url, proxy).await?;
                }
                StepOutcome::Committed(suite) => break suite,
            }
        };
        state.step = InstallStep::Optimize;
        self.run_optimizer(state, &suite);
        state.step = InstallStep::Done;
        Ok(suite)
    }

    async fn run_step(&self, state: &mut InstallState) -> Result<StepOutcome, InstallError> {
        match state.step {
            InstallStep::DownloadDescriptor => self.step_download_descriptor(state).await,
            InstallStep::CheckUpdateOrigin => Ok(Self::step_check_update_origin(state)),
            InstallStep::CheckQuota => self.step_check_quota(state),
            InstallStep::ConfirmDownload => self.step_confirm_download(state).await,
            InstallStep::FetchAndVerify => self.step_fetch_and_verify(state).await,
            InstallStep::CheckArchiveOrigin => Ok(Self::step_check_archive_origin(state)),
            InstallStep::GrantAndCommit => self.step_grant_and_commit(state).await,
            // terminal steps are never scheduled: the driver exits the
            // loop on the commit outcome
            InstallStep::Optimize | InstallStep::Done => Ok(StepOutcome::Advance),
        }
    }

    async fn resolve_advisory(
        &self,
        state: &mut InstallState,
        advisory: Advisory,
    ) -> Result<(), InstallError> {
        state.pending_advisory = Some(advisory.clone());
        let Some(listener) = &self.listener else {
            // nobody to decide: advisory conditions are fatal
            return Err(InstallError::Cancelled);
        };
        info!("advisory at step {}: {advisory}", state.step.number());
        if listener.warn(&advisory).await {
            state.pending_advisory = None;
            state.advance();
            Ok(())
        } else {
            Err(InstallError::Cancelled)
        }
    }

    async fn resolve_credentials(
        &self,
        state: &mut InstallState,
        url: &str,
        proxy: bool,
    ) -> Result<(), InstallError> {
        let supplied = match &self.listener {
            Some(listener) => listener.provide_credentials(url, proxy).await,
            None => None,
        };
        match supplied {
            Some(credentials) if proxy => {
                state.proxy_credentials = Some(credentials);
                Ok(())
            }
            Some(credentials) => {
                state.credentials = Some(credentials);
                Ok(())
            }
            None if proxy => Err(TransferError::ProxyAuthRequired(url.to_owned()).into()),
            None => Err(TransferError::Unauthorized(url.to_owned()).into()),
        }
    }

    async fn fetch_resource(
        &self,
        state: &InstallState,
        url: &str,
        accepted: &[&str],
        allow_missing_media_type: bool,
    ) -> Result<Fetched, InstallError> {
        let mut request = TransferRequest::new(url, accepted);
        request.allow_missing_media_type = allow_missing_media_type;
        request.credentials = state.credentials.clone();
        request.proxy_credentials = state.proxy_credentials.clone();
        let bridge = TransferBridge {
            listener: self.listener.as_deref(),
            step: state.step,
        };
        match self
            .fetcher
            .fetch(&request, &bridge, state.cancel_flag())
            .await
        {
            Ok(bytes) => Ok(Fetched::Bytes(bytes)),
            Err(TransferError::Unauthorized(url))
                if state.credentials.is_none() && self.listener.is_some() =>
            {
                Ok(Fetched::Credentials { url, proxy: false })
            }
            Err(TransferError::ProxyAuthRequired(url))
                if state.proxy_credentials.is_none() && self.listener.is_some() =>
            {
                Ok(Fetched::Credentials { url, proxy: true })
            }
            Err(TransferError::Cancelled) => Err(InstallError::Cancelled),
            Err(err) => Err(err.into()),
        }
    }

    // step 1 — descriptor download, validation, previous-version detection
    async fn step_download_descriptor(
        &self,
        state: &mut InstallState,
    ) -> Result<StepOutcome, InstallError> {
        let InstallSource::Descriptor(url) = state.request.source.clone() else {
            debug!("archive-only install, no descriptor");
            return Ok(StepOutcome::Advance);
        };
        check_http_url(&url)?;

        let bytes = match self
            .fetch_resource(state, &url, &[MEDIA_TYPE_DESCRIPTOR], false)
            .await?
        {
            Fetched::Bytes(bytes) => bytes,
            Fetched::Credentials { url, proxy } => {
                return Ok(StepOutcome::NeedCredentials { url, proxy });
            }
        };

        state.descriptor_len = bytes.len() as u64;
        let text = String::from_utf8(bytes)
            .map_err(|_| InstallError::InvalidDescriptor("not valid UTF-8".to_owned()))?;
        // the raw bytes end here; only parsed properties are retained
        let props =
            parse_descriptor(&text).map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
        drop(text);

        let identity =
            suite::suite_identity(&props).map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
        let archive_url = props
            .require(suite::KEY_ARCHIVE_URL)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
        check_http_url(archive_url)?;
        props
            .require_u64(suite::KEY_ARCHIVE_SIZE)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
        props
            .get_u64(suite::KEY_DATA_SIZE)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;

        state.descriptor = Some(props);
        self.detect_previous(state, &identity)
    }

    /// Shared by step 1 and the archive-only branch of step 5.
    fn detect_previous(
        &self,
        state: &mut InstallState,
        identity: &SuiteIdentity,
    ) -> Result<StepOutcome, InstallError> {
        let Some(previous) = self.store.find(&identity.name, &identity.vendor)? else {
            return Ok(StepOutcome::Advance);
        };
        info!("previously installed: {}", previous.identity);
        let advisory = match identity.version.cmp(&previous.identity.version) {
            Ordering::Greater => Advisory::NewerVersion {
                installed: previous.identity.version.clone(),
                offered: identity.version.clone(),
            },
            Ordering::Equal => Advisory::SameVersion {
                version: identity.version.clone(),
            },
            Ordering::Less => Advisory::OlderVersion {
                installed: previous.identity.version.clone(),
                offered: identity.version.clone(),
            },
        };
        state.previous = Some(previous);
        if state.request.force_overwrite {
            return Ok(StepOutcome::Advance);
        }
        Ok(StepOutcome::Decision(advisory))
    }

    // step 2 — unsigned updates must come from the previous origin
    fn step_check_update_origin(state: &InstallState) -> StepOutcome {
        let Some(previous) = &state.previous else {
            return StepOutcome::Advance;
        };
        let Some(descriptor) = &state.descriptor else {
            return StepOutcome::Advance;
        };
        if descriptor.contains_key(&suite::certificate_key(1, 1)) {
            // signed packages are held to the signature, not the origin
            return StepOutcome::Advance;
        }
        let Some(previous_url) = previous.descriptor_url.clone() else {
            return StepOutcome::Advance;
        };
        let current = state.request.source.url();
        if same_origin(&previous_url, current) {
            return StepOutcome::Advance;
        }
        StepOutcome::Decision(Advisory::OriginMoved {
            previous: previous_url,
            current: current.to_owned(),
        })
    }

    // step 3 — declared sizes must fit the storage quota
    fn step_check_quota(&self, state: &mut InstallState) -> Result<StepOutcome, InstallError> {
        let Some(props) = &state.descriptor else {
            // archive-only installs declare no sizes up front
            return Ok(StepOutcome::Advance);
        };
        let archive_size = props
            .require_u64(suite::KEY_ARCHIVE_SIZE)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
        let data_size = props
            .get_u64(suite::KEY_DATA_SIZE)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?
            .unwrap_or(0);
        let url_len = props
            .require(suite::KEY_ARCHIVE_URL)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?
            .len() as u64;

        let needed = archive_size
            .saturating_add(state.descriptor_len.saturating_mul(self.config.descriptor_factor))
            .saturating_add(url_len.saturating_mul(self.config.url_factor))
            .saturating_add(data_size);
        let available = self.store.available_space()?;
        debug!("quota: need {needed} of {available} available");
        if needed > available {
            return Err(InstallError::InsufficientStorage { needed, available });
        }
        Ok(StepOutcome::Advance)
    }

    // step 4 — the user confirms the archive download
    async fn step_confirm_download(
        &self,
        state: &mut InstallState,
    ) -> Result<StepOutcome, InstallError> {
        let summary = Self::download_summary(state)?;
        // cancellation is deferred, not dropped, while the gate is open
        state.begin_no_cancel();
        let approved = match &self.listener {
            Some(listener) => listener.confirm_download(&summary).await,
            None => false,
        };
        state.end_no_cancel();
        if approved {
            Ok(StepOutcome::Advance)
        } else {
            Err(InstallError::Cancelled)
        }
    }

    fn download_summary(state: &InstallState) -> Result<DownloadSummary, InstallError> {
        let url = archive_url(state)?;
        if let Some(props) = &state.descriptor {
            let identity = suite::suite_identity(props)
                .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
            let archive_size = props
                .require_u64(suite::KEY_ARCHIVE_SIZE)
                .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
            return Ok(DownloadSummary {
                name: identity.name.to_string(),
                vendor: Some(identity.vendor.to_string()),
                version: Some(identity.version),
                archive_size: Some(archive_size),
                url,
            });
        }
        let name = state
            .request
            .provided_name
            .as_ref()
            .map_or_else(|| url.clone(), ToString::to_string);
        Ok(DownloadSummary {
            name,
            vendor: None,
            version: None,
            archive_size: None,
            url,
        })
    }

    // step 5 — fetch the archive, authenticate, cross-check the manifest
    async fn step_fetch_and_verify(
        &self,
        state: &mut InstallState,
    ) -> Result<StepOutcome, InstallError> {
        let url = archive_url(state)?;
        let bytes = match self
            .fetch_resource(state, &url, &[MEDIA_TYPE_ARCHIVE], true)
            .await?
        {
            Fetched::Bytes(bytes) => bytes,
            Fetched::Credentials { url, proxy } => {
                return Ok(StepOutcome::NeedCredentials { url, proxy });
            }
        };

        if let Some(props) = &state.descriptor {
            let declared = props
                .require_u64(suite::KEY_ARCHIVE_SIZE)
                .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
            if declared != bytes.len() as u64 {
                return Err(InstallError::SizeMismatch {
                    declared,
                    actual: bytes.len() as u64,
                });
            }
        }

        self.authenticate_archive(state, &bytes).await?;

        let mut tmp = tempfile::NamedTempFile::new().map_err(StorageError::Io)?;
        tmp.write_all(&bytes).map_err(StorageError::Io)?;
        tmp.flush().map_err(StorageError::Io)?;
        state.archive_len = bytes.len() as u64;
        drop(bytes);

        let manifest = archive::read_manifest(tmp.path())
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;
        let entries = archive::entry_paths(tmp.path())
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;
        state.archive = Some(tmp);

        // every declared entry point must physically exist in the archive
        let descriptor_entries = match &state.descriptor {
            Some(props) => suite::entry_points(props)
                .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?,
            None => Vec::new(),
        };
        let manifest_entries = suite::entry_points(&manifest)
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;
        for entry in descriptor_entries.iter().chain(&manifest_entries) {
            if !entries.contains(&entry.path) {
                return Err(InstallError::InvalidArchive(format!(
                    "entry '{}' names missing file '{}'",
                    entry.label, entry.path
                )));
            }
        }

        if state.descriptor.is_some() {
            Self::cross_check(state, &manifest)?;
            state.manifest = Some(manifest);
            return Ok(StepOutcome::Advance);
        }

        // archive-only: identity comes from the manifest, and the
        // previous-version detection of step 1 runs now
        let identity = suite::suite_identity(&manifest)
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;
        state.manifest = Some(manifest);
        self.detect_previous(state, &identity)
    }

    async fn authenticate_archive(
        &self,
        state: &mut InstallState,
        archive_bytes: &[u8],
    ) -> Result<(), InstallError> {
        let Some(props) = &state.descriptor else {
            // archive-only installs are unsigned
            return Ok(());
        };
        let chain = decode_certificate_chain(props)?;
        if chain.is_empty() {
            if props.contains_key(suite::KEY_ARCHIVE_SIGNATURE) {
                return Err(InstallError::InvalidDescriptor(
                    "archive signature without signing certificates".to_owned(),
                ));
            }
            return Ok(());
        }
        let signature_b64 = props.require(suite::KEY_ARCHIVE_SIGNATURE).map_err(|_| {
            InstallError::InvalidDescriptor("signing certificates without archive signature".to_owned())
        })?;
        let signature = STANDARD
            .decode(signature_b64)
            .map_err(|e| InstallError::InvalidDescriptor(format!("bad signature encoding: {e}")))?;

        let path = verify::verify_chain(
            &chain,
            KU_DIGITAL_SIGNATURE,
            EKU_NONE,
            self.trust.as_ref(),
            Utc::now(),
        )?;
        let digest = Sha1::digest(archive_bytes);
        verify::verify_data_signature(&chain[0], DigestKind::Sha1, &digest, &signature)?;

        if let Some(listener) = &self.listener {
            if !listener.confirm_auth_path(&path.names).await {
                return Err(InstallError::Cancelled);
            }
        }
        info!("archive authenticated via {path}");
        state.signer_serial = Some(chain[0].serial_hex().to_owned());
        state.auth_path = Some(path);
        state.trusted = true;
        Ok(())
    }

    fn cross_check(
        state: &InstallState,
        manifest: &otapkg_core::properties::PropertySet,
    ) -> Result<(), InstallError> {
        let Some(descriptor) = &state.descriptor else {
            return Ok(());
        };
        let mut keys = vec![suite::KEY_NAME, suite::KEY_VENDOR, suite::KEY_VERSION];
        if manifest.contains_key(suite::KEY_ARCHIVE_SIZE) {
            keys.push(suite::KEY_ARCHIVE_SIZE);
        }
        for key in keys {
            let declared = descriptor
                .require(key)
                .map_err(|e| InstallError::InvalidDescriptor(e.to_string()))?;
            let Some(actual) = manifest.get(key) else {
                return Err(InstallError::InvalidArchive(format!(
                    "manifest is missing '{key}'"
                )));
            };
            if declared != actual {
                return Err(InstallError::AttributeMismatch {
                    key: key.to_owned(),
                });
            }
        }
        Ok(())
    }

    // step 6 — archive-only variant of the origin check
    fn step_check_archive_origin(state: &InstallState) -> StepOutcome {
        if state.descriptor.is_some() {
            // already handled at step 2 via the descriptor URL
            return StepOutcome::Advance;
        }
        let Some(previous) = &state.previous else {
            return StepOutcome::Advance;
        };
        if previous.trusted || state.trusted {
            return StepOutcome::Advance;
        }
        let current = state.request.source.url();
        if same_origin(&previous.archive_url, current) {
            return StepOutcome::Advance;
        }
        StepOutcome::Decision(Advisory::OriginMoved {
            previous: previous.archive_url.clone(),
            current: current.to_owned(),
        })
    }

    // step 7 — domain, permissions, data retention, push, commit
    async fn step_grant_and_commit(
        &self,
        state: &mut InstallState,
    ) -> Result<StepOutcome, InstallError> {
        let merged = state.merged_properties();
        let identity = suite::suite_identity(&merged)
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;

        if let Some(previous) = &state.previous {
            if previous.trusted && !state.trusted {
                return Err(InstallError::TrustedOverwrite);
            }
        }
        if state.trusted {
            Self::check_trust_sensitive(state)?;
        }
        let domain = if state.trusted {
            self.config.trusted_domain.clone()
        } else {
            self.config.unsigned_domain.clone()
        };
        info!("assigning domain '{}'", domain.name);

        let required = merged
            .get(suite::KEY_REQUIRED_PERMISSIONS)
            .map(suite::permission_list)
            .unwrap_or_default();
        let optional = merged
            .get(suite::KEY_OPTIONAL_PERMISSIONS)
            .map(suite::permission_list)
            .unwrap_or_default();
        let mut permissions = domain::initial_grants(&domain, &required, &optional)?;
        if let Some(previous) = &state.previous {
            domain::carry_forward(&previous.permissions, &mut permissions, &domain);
        }

        let keep_data = self.decide_data_retention(state).await;

        let assigned = self.store.create_identity(
            &identity.name,
            &identity.vendor,
            &identity.version,
            state.request.storage_hint,
        )?;
        state.identity = Some(assigned.clone());

        let push_decls = suite::push_declarations(&merged)
            .map_err(|e| InstallError::InvalidArchive(e.to_string()))?;
        self.register_push(state, &assigned, &push_decls)?;

        // a trivially fast confirmation flow pauses before committing
        let elapsed = state.elapsed_secs();
        if elapsed < self.config.min_install_secs {
            tokio::time::sleep(Duration::from_secs(self.config.min_install_secs - elapsed)).await;
        }

        // permanent point of no return: the commit is the final durable
        // action of this step
        state.begin_no_cancel();
        if !keep_data {
            self.store.clear_data(&assigned)?;
        }

        let Some(tmp) = &state.archive else {
            return Err(InstallError::InvalidArchive("archive file missing".to_owned()));
        };
        let record = InstalledSuite {
            identity: assigned,
            domain: domain.name.clone(),
            trusted: state.trusted,
            descriptor_url: match &state.request.source {
                InstallSource::Descriptor(url) => Some(url.clone()),
                InstallSource::Archive(_) => None,
            },
            archive_url: archive_url(state)?,
            properties: merged,
            permissions,
            push: push_decls,
            signer_serial: state.signer_serial.clone(),
            archive_size: state.archive_len,
            installed_at: Utc::now(),
        };

        match self.store.store(&record, tmp.path()) {
            Ok(()) => Ok(StepOutcome::Committed(record)),
            Err(err) => {
                // the push registrations must not outlive a failed commit
                self.rollback_push(state, &record.identity, &record.push);
                Err(err.into())
            }
        }
    }

    fn register_push(
        &self,
        state: &InstallState,
        identity: &PackageIdentity,
        decls: &[PushDeclaration],
    ) -> Result<(), InstallError> {
        // an update surrenders the previous version's connections first
        if let Some(previous) = &state.previous {
            for decl in &previous.push {
                self.push.unregister(&previous.identity, &decl.endpoint);
            }
        }
        let mut registered: Vec<&PushDeclaration> = Vec::new();
        for decl in decls {
            if let Err(err) = self.push.register(identity, decl) {
                warn!("push registration failed: {err}");
                self.restore_push(state, identity, &registered);
                return Err(InstallError::PushRegistration(decl.endpoint.clone()));
            }
            registered.push(decl);
        }
        Ok(())
    }

    fn rollback_push(
        &self,
        state: &InstallState,
        identity: &PackageIdentity,
        decls: &[PushDeclaration],
    ) {
        let registered: Vec<&PushDeclaration> = decls.iter().collect();
        self.restore_push(state, identity, &registered);
    }

    fn restore_push(
        &self,
        state: &InstallState,
        identity: &PackageIdentity,
        registered: &[&PushDeclaration],
    ) {
        for decl in registered {
            self.push.unregister(identity, &decl.endpoint);
        }
        if let Some(previous) = &state.previous {
            for decl in &previous.push {
                if let Err(err) = self.push.register(&previous.identity, decl) {
                    warn!(
                        "could not restore push registration '{}': {err}",
                        decl.endpoint
                    );
                }
            }
        }
    }

    async fn decide_data_retention(&self, state: &InstallState) -> bool {
        let Some(previous) = &state.previous else {
            return true;
        };
        if state.request.remove_previous_data {
            return false;
        }
        // same signer keeps silently
        if previous.signer_serial.is_some() && previous.signer_serial == state.signer_serial {
            return true;
        }
        // same source URL keeps silently
        let same_descriptor = match (&previous.descriptor_url, &state.request.source) {
            (Some(prev), InstallSource::Descriptor(current)) => prev == current,
            _ => false,
        };
        let same_archive = matches!(
            &state.request.source,
            InstallSource::Archive(url) if *url == previous.archive_url
        );
        if same_descriptor || same_archive {
            return true;
        }
        match &self.listener {
            Some(listener) => listener.keep_data(previous.identity.name.as_str()).await,
            // no listener: discard is the safe default
            None => false,
        }
    }

    fn check_trust_sensitive(state: &InstallState) -> Result<(), InstallError> {
        let (Some(descriptor), Some(manifest)) = (&state.descriptor, &state.manifest) else {
            return Ok(());
        };
        // a trusted suite may not carry conflicting duplicated attributes
        for (key, declared) in descriptor.entries() {
            if let Some(actual) = manifest.get(key) {
                if actual != declared {
                    return Err(InstallError::AttributeMismatch {
                        key: key.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_optimizer(&self, state: &InstallState, suite: &InstalledSuite) {
        let Some(tmp) = &state.archive else {
            return;
        };
        if let Err(err) = self.optimizer.optimize(suite, tmp.path()) {
            // post-commit: logged and swallowed, never rolls back
            warn!("{err}");
        }
    }

    fn cleanup(state: &mut InstallState) {
        // dropping the handle deletes the temporary archive
        if state.archive.take().is_some() {
            debug!("removed temporary archive");
        }
        state.previous = None;
    }

    async fn notify(&self, state: &InstallState, code: StatusCode) {
        let merged = state.merged_properties();
        let Some(url) = merged.get(suite::KEY_NOTIFY_URL) else {
            return;
        };
        let mut queue = self.notifications.lock().await;
        queue.notify(self.poster.as_ref(), url, code).await;
    }

}

fn archive_url(state: &InstallState) -> Result<String, InstallError> {
    match &state.descriptor {
        Some(props) => props
            .require(suite::KEY_ARCHIVE_URL)
            .map(ToOwned::to_owned)
            .map_err(|e| InstallError::InvalidDescriptor(e.to_string())),
        None => Ok(state.request.source.url().to_owned()),
    }
}

struct TransferBridge<'a> {
    listener: Option<&'a dyn InstallListener>,
    step: InstallStep,
}

impl TransferListener for TransferBridge<'_> {
    fn progress(&self, received: u64, total: Option<u64>) {
        if let Some(listener) = self.listener {
            listener.progress(self.step, received, total);
        }
    }

    fn confirm_redirect<'b>(&'b self, from: &'b str, to: &'b str) -> BoxFuture<'b, bool> {
        match self.listener {
            Some(listener) => listener.confirm_redirect(from, to),
            None => Box::pin(async { false }),
        }
    }
}

fn check_http_url(url: &str) -> Result<(), InstallError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        Err(InstallError::InvalidUrl(url.to_owned()))
    }
}

fn decode_certificate_chain(
    props: &otapkg_core::properties::PropertySet,
) -> Result<Vec<Certificate>, InstallError> {
    let mut chain = Vec::new();
    for index in 1.. {
        let Some(encoded) = props.get(&suite::certificate_key(1, index)) else {
            break;
        };
        let der = STANDARD
            .decode(encoded)
            .map_err(|e| InstallError::InvalidDescriptor(format!("bad certificate encoding: {e}")))?;
        chain.push(parse_certificate(&der, 0, der.len())?);
    }
    Ok(chain)
}

/// Scheme and host of a URL, lowercased; `None` for non-hierarchical URLs.
fn origin_of(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    Some((scheme.to_ascii_lowercase(), host.to_ascii_lowercase()))
}

/// Whether two URLs share scheme and host, case-insensitively.
fn same_origin(a: &str, b: &str) -> bool {
    match (origin_of(a), origin_of(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_compares_scheme_and_host_case_insensitively() {
        assert!(same_origin(
            "http://Pkg.Example.com/a/one.jad",
            "http://pkg.example.com/b/two.jad"
        ));
        assert!(!same_origin(
            "http://pkg.example.com/a.jad",
            "https://pkg.example.com/a.jad"
        ));
        assert!(!same_origin(
            "http://pkg.example.com/a.jad",
            "http://other.example.com/a.jad"
        ));
        assert!(same_origin(
            "http://user@pkg.example.com/a",
            "http://pkg.example.com/b"
        ));
        assert!(!same_origin("not-a-url", "http://pkg.example.com/"));
    }

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(check_http_url("http://x.example/a").is_ok());
        assert!(check_http_url("HTTPS://x.example/a").is_ok());
        assert!(check_http_url("ftp://x.example/a").is_err());
        assert!(check_http_url("file:///etc/passwd").is_err());
    }
}
