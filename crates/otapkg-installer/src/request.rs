//! The immutable input describing one requested installation.

use otapkg_core::identity::StorageId;
use otapkg_core::types::SuiteName;

/// Where the suite comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// A descriptor URL; the archive URL is read from the descriptor.
    Descriptor(String),
    /// A direct archive URL with no descriptor.
    Archive(String),
}

impl InstallSource {
    /// The URL the request starts from.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Descriptor(url) | Self::Archive(url) => url,
        }
    }
}

/// One requested installation. Immutable once built.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Descriptor or archive source.
    pub source: InstallSource,
    /// Preferred storage slot, honored by the store when free.
    pub storage_hint: Option<StorageId>,
    /// Overwrite a previously installed version without asking.
    pub force_overwrite: bool,
    /// Discard the previous version's persistent data without asking.
    pub remove_previous_data: bool,
    /// Display name for archive-only installs, shown before the manifest
    /// has been read.
    pub provided_name: Option<SuiteName>,
}

impl InstallRequest {
    /// A plain request with every flag off.
    #[must_use]
    pub fn new(source: InstallSource) -> Self {
        Self {
            source,
            storage_hint: None,
            force_overwrite: false,
            remove_previous_data: false,
            provided_name: None,
        }
    }

    /// Enable force-overwrite.
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force_overwrite = true;
        self
    }
}
