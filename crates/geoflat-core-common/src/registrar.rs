//! Registrar contract for finished artifacts.

use url::Url;

/// A layer handed to a [`LayerRegistrar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredLayer {
    /// `file://` URI of the primary artifact
    pub uri: Url,
    /// Display name for the layer
    pub display_name: String,
}

/// Receives artifacts that passed validation and adds them to a session.
///
/// The export pipeline calls this only for non-empty artifacts, in partition
/// order.
pub trait LayerRegistrar: Send + Sync {
    /// Registers one layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the session refused the layer. The pipeline logs
    /// the failure and keeps the artifact on disk.
    fn register(&self, layer: &RegisteredLayer) -> anyhow::Result<()>;
}
