use std::{
    fmt::Display,
    num::NonZeroUsize,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bon::Builder;
use log::info;

use crate::{
    error::{Error, Result},
    mesh::{Geometry, GeometryType},
    scene::Scene,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum WorkerCount {
    /// One worker per logical CPU
    #[default]
    Auto,
    Manual(NonZeroUsize),
}

impl WorkerCount {
    pub fn get(&self) -> usize {
        match self {
            WorkerCount::Auto => num_cpus::get(),
            WorkerCount::Manual(count) => count.get(),
        }
    }
}

impl Display for WorkerCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerCount::Auto => write!(f, "auto"),
            WorkerCount::Manual(count) => write!(f, "{count}"),
        }
    }
}

/// Settings of a device, shared by every scene created from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Builder)]
pub struct DeviceConfig {
    /// Threads used for ray stream queries
    #[builder(default)]
    pub worker_count: WorkerCount,

    /// Rays handed to a worker at once
    #[builder(default = DeviceConfig::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: NonZeroUsize,
}

impl DeviceConfig {
    pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(256).unwrap();
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::builder().build()
    }
}

impl FromStr for DeviceConfig {
    type Err = Error;

    /// Parses comma separated `key=value` pairs, for example `threads=4,chunk_size=1024`.
    /// Recognized keys are `threads` (a positive number or `auto`), `chunk_size` and `verbose`
    /// (accepted and ignored, logging is configured through the `log` facade).
    fn from_str(s: &str) -> Result<Self> {
        let mut config = DeviceConfig::default();

        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let Some((key, value)) = item.split_once('=') else {
                return Err(Error::InitializationError(format!(
                    "Expected key=value, got {item:?}"
                )));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "threads" if value == "auto" => config.worker_count = WorkerCount::Auto,
                "threads" => {
                    config.worker_count = WorkerCount::Manual(parse_positive(key, value)?)
                }
                "chunk_size" => config.chunk_size = parse_positive(key, value)?,
                "verbose" => {}
                _ => {
                    return Err(Error::InitializationError(format!(
                        "Unknown configuration key {key:?}"
                    )));
                }
            }
        }

        Ok(config)
    }
}

fn parse_positive(key: &str, value: &str) -> Result<NonZeroUsize> {
    value.parse().map_err(|_| {
        Error::InitializationError(format!("{key} must be a positive integer, got {value:?}"))
    })
}

/// State shared between a device and everything created from it.
#[derive(Debug)]
pub(crate) struct DeviceShared {
    config: DeviceConfig,
    released: AtomicBool,
}

impl DeviceShared {
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Fails if the device was released; `what` names the object being used.
    pub fn ensure_alive(&self, what: &'static str) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            Err(Error::UseAfterRelease(what))
        } else {
            Ok(())
        }
    }
}

/// Handle to the ray query engine.
/// Scenes and geometries are created through it and become unusable once it is released.
#[derive(Debug)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    pub fn new() -> Result<Device> {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Result<Device> {
        // Resolves Auto, so that a broken CPU count shows up here instead of in the first query
        let workers = config.worker_count.get();
        if workers == 0 {
            return Err(Error::InitializationError(
                "No CPUs available for workers".to_owned(),
            ));
        }

        info!(
            "Created device with {} workers ({}), chunk size {}",
            workers, config.worker_count, config.chunk_size
        );

        Ok(Device {
            shared: Arc::new(DeviceShared {
                config,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// Creates a device from an engine style configuration string, see [`DeviceConfig::from_str`].
    pub fn with_config_str(config: &str) -> Result<Device> {
        Self::with_config(config.parse()?)
    }

    pub fn config(&self) -> &DeviceConfig {
        self.shared.config()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<DeviceShared> {
        Arc::clone(&self.shared)
    }

    pub fn make_scene(&self) -> Result<Scene> {
        self.shared.ensure_alive("Device")?;
        Ok(Scene::new(Arc::clone(&self.shared)))
    }

    pub fn make_geometry(&self, geometry_type: GeometryType) -> Result<Geometry> {
        self.shared.ensure_alive("Device")?;
        Ok(Geometry::new(Arc::clone(&self.shared), geometry_type))
    }

    /// Releases the device. Every scene, geometry and buffer created from it fails
    /// with [`Error::UseAfterRelease`] from now on.
    pub fn release(self) {
        self.shared.released.store(true, Ordering::Release);
        info!("Released device");
    }
}
