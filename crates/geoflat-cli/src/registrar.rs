//! Registrar used by the command line: records each finished layer and logs it.

use std::sync::Mutex;

use anyhow::anyhow;
use geoflat_core::{LayerRegistrar, RegisteredLayer};
use tracing::info;

/// [`LayerRegistrar`] that logs every finished layer and keeps the list so
/// the command can print it after the run.
#[derive(Debug, Default)]
pub struct ConsoleRegistrar {
    /// Layers in registration order
    layers: Mutex<Vec<RegisteredLayer>>,
}

impl ConsoleRegistrar {
    /// Layers registered so far, in registration order.
    pub fn layers(&self) -> Vec<RegisteredLayer> {
        self.layers
            .lock()
            .map(|layers| layers.clone())
            .unwrap_or_default()
    }
}

impl LayerRegistrar for ConsoleRegistrar {
    fn register(&self, layer: &RegisteredLayer) -> anyhow::Result<()> {
        info!("Registered layer '{}' ({})", layer.display_name, layer.uri);
        self.layers
            .lock()
            .map_err(|_| anyhow!("layer list poisoned"))?
            .push(layer.clone());
        Ok(())
    }
}
