//! Persistent device and bake settings.
//!
//! Both structs deserialize with `#[serde(default)]`, so a settings file only
//! needs the fields it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::device::Backend;
use crate::util::{Error, Result};

/// Adapter selection hint for the GPU backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuPowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Which backend to run on and how to drive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub backend: Backend,
    /// Job backend pool size; 0 lets rayon decide
    pub worker_threads: usize,
    /// Probes per job batch
    pub batch_size: usize,
    pub gpu_power_preference: GpuPowerPreference,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Reference,
            worker_threads: 0,
            batch_size: 64,
            gpu_power_preference: GpuPowerPreference::HighPerformance,
        }
    }
}

impl DeviceSettings {
    /// Default settings file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("lightbaker");
            p.push("device.json");
            p
        })
    }

    /// Load from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&text)?;
        if settings.batch_size == 0 {
            tracing::warn!("batch_size 0 in {}, using 64", path.display());
            settings.batch_size = 64;
        }
        Ok(settings)
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        Self::default_path()
            .filter(|p| p.exists())
            .and_then(|p| match Self::load_from(&p) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("ignoring {}: {}", p.display(), e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Sample budgets and integration parameters of a probe bake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    pub direct_sample_count: u32,
    pub indirect_sample_count: u32,
    pub validity_sample_count: u32,
    /// Indirect bounces after the first hit
    pub bounce_count: u32,
    /// Ray origin offset along the sample direction
    pub pushoff: f32,
    pub ignore_direct_environment: bool,
    pub ignore_indirect_environment: bool,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            direct_sample_count: 32,
            indirect_sample_count: 256,
            validity_sample_count: 64,
            bounce_count: 2,
            pushoff: 1e-4,
            ignore_direct_environment: false,
            ignore_indirect_environment: false,
        }
    }
}

impl BakeSettings {
    /// Reject settings no kernel can run with.
    pub fn validate(&self) -> Result<()> {
        if !self.pushoff.is_finite() || self.pushoff < 0.0 {
            return Err(Error::invalid(format!("pushoff must be >= 0, got {}", self.pushoff)));
        }
        if self.indirect_sample_count == 0 && self.direct_sample_count == 0 {
            return Err(Error::invalid("all sample counts are zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, r#"{ "backend": "jobs", "worker_threads": 3 }"#).unwrap();

        let s = DeviceSettings::load_from(&path).unwrap();
        assert_eq!(s.backend, Backend::Jobs);
        assert_eq!(s.worker_threads, 3);
        assert_eq!(s.batch_size, 64);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("device.json");
        let s = DeviceSettings {
            backend: Backend::Gpu,
            gpu_power_preference: GpuPowerPreference::LowPower,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(DeviceSettings::load_from(&path).unwrap(), s);
    }

    #[test]
    fn test_bad_json_is_invalid_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.json");
        std::fs::write(&path, "{ backend: ").unwrap();
        let err = DeviceSettings::load_from(&path).unwrap_err();
        assert_eq!(err.kind(), crate::util::ResultKind::InvalidInput);
    }

    #[test]
    fn test_bake_settings_validate() {
        assert!(BakeSettings::default().validate().is_ok());
        let bad = BakeSettings {
            pushoff: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
