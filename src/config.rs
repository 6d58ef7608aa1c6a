//! Configuration for vgpu devices

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vgpu_protocol::{DEFAULT_DSTORE_SIZE, DEFAULT_VRAM_MB, DEFAULT_ZCOPY_SIZE};

use crate::{Error, Result};

/// Smallest window the device will expose (one page).
const MIN_WINDOW_SIZE: u64 = 4096;

/// Largest dstore slot or zero-copy window accepted (1 TiB).
const MAX_WINDOW_SIZE: u64 = 1 << 40;

/// Configuration for realizing a vgpu device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VgpuConfig {
    /// Size of one per-VM dstore slot in bytes (default: 64 MiB)
    pub dstore_size: u64,
    /// Size of the zero-copy window in bytes (default: 256 MiB)
    pub zcopy_size: u64,
    /// VGA memory in megabytes (default: 16)
    pub vram_mb: u32,
    /// Guest physical address of the register BAR, once programmed
    pub mmio_base: Option<u64>,
}

impl Default for VgpuConfig {
    fn default() -> Self {
        Self {
            dstore_size: DEFAULT_DSTORE_SIZE,
            zcopy_size: DEFAULT_ZCOPY_SIZE,
            vram_mb: DEFAULT_VRAM_MB,
            mmio_base: None,
        }
    }
}

impl VgpuConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dstore slot size in bytes
    pub fn dstore_size(mut self, size: u64) -> Self {
        self.dstore_size = size;
        self
    }

    /// Set the zero-copy window size in bytes
    pub fn zcopy_size(mut self, size: u64) -> Self {
        self.zcopy_size = size;
        self
    }

    /// Set the VGA memory size in megabytes
    pub fn vram_mb(mut self, mb: u32) -> Self {
        self.vram_mb = mb;
        self
    }

    /// Set the guest physical base of the register BAR
    pub fn mmio_base(mut self, base: u64) -> Self {
        self.mmio_base = Some(base);
        self
    }

    /// VGA memory size in bytes
    pub fn vram_size(&self) -> u64 {
        u64::from(self.vram_mb) << 20
    }

    /// Load a configuration from a YAML (`.yaml`/`.yml`) or JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let config: VgpuConfig = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid YAML config {}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid JSON config {}: {}", path.display(), e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Every window becomes a PCI BAR, so sizes must be powers of two.
    pub fn validate(&self) -> Result<()> {
        validate_window("dstore_size", self.dstore_size)?;
        validate_window("zcopy_size", self.zcopy_size)?;

        if self.vram_mb == 0 {
            return Err(Error::Config("vram_mb must be at least 1".into()));
        }
        if !self.vram_mb.is_power_of_two() {
            return Err(Error::Config(format!(
                "vram_mb must be a power of two, got {}",
                self.vram_mb
            )));
        }

        if let Some(base) = self.mmio_base {
            if base % vgpu_protocol::REGISTER_BLOCK_SIZE != 0 {
                return Err(Error::Config(format!(
                    "mmio_base {:#x} is not aligned to the register block size",
                    base
                )));
            }
        }

        Ok(())
    }
}

fn validate_window(name: &str, size: u64) -> Result<()> {
    if size < MIN_WINDOW_SIZE {
        return Err(Error::Config(format!(
            "{} must be at least {:#x} bytes, got {:#x}",
            name, MIN_WINDOW_SIZE, size
        )));
    }
    if size > MAX_WINDOW_SIZE {
        return Err(Error::Config(format!(
            "{} must be at most {:#x} bytes, got {:#x}",
            name, MAX_WINDOW_SIZE, size
        )));
    }
    if !size.is_power_of_two() {
        return Err(Error::Config(format!(
            "{} must be a power of two, got {:#x}",
            name, size
        )));
    }
    Ok(())
}
