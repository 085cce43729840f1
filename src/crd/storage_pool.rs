//! LINSTOR storage pool configuration
//!
//! A storage pool is configured through exactly one backend field. The wire
//! form keeps the backends as independent optional fields (that is what the
//! CRD schema looks like); [`LinstorStoragePool::backend`] turns them into
//! the closed [`PoolBackend`] set after checking that exactly one is set.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::LinstorNodeProperty;
use crate::error::{Error, Result};

/// Directory used for file pools without explicit directory
pub const DEFAULT_FILE_POOL_DIR: &str = "/var/lib/linstor-pools";

// =============================================================================
// Storage Pool
// =============================================================================

/// A LINSTOR storage pool on a satellite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinstorStoragePool {
    /// Name of the storage pool in LINSTOR
    pub name: String,

    /// Properties to set on the storage pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<LinstorNodeProperty>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_pool: Option<LvmPool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_thin_pool: Option<LvmThinPool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pool: Option<FilePool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_thin_pool: Option<FilePool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zfs_pool: Option<ZfsPool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zfs_thin_pool: Option<ZfsPool>,

    /// Devices used to create the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StoragePoolSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LvmPool {
    /// Volume group. Defaults to the pool name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LvmThinPool {
    /// Volume group. Defaults to `linstor_<thinPool>`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_group: String,

    /// Thin pool logical volume. Defaults to the pool name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thin_pool: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilePool {
    /// Host directory. Defaults to `/var/lib/linstor-pools/<name>`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZfsPool {
    /// ZPool name. Defaults to the pool name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub z_pool: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolSource {
    /// Block devices to create the pool on, e.g. `/dev/sdb`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_devices: Option<Vec<String>>,
}

// =============================================================================
// Backend Variants
// =============================================================================

/// LINSTOR storage pool provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "LVM")]
    Lvm,
    #[serde(rename = "LVM_THIN")]
    LvmThin,
    #[serde(rename = "FILE")]
    File,
    #[serde(rename = "FILE_THIN")]
    FileThin,
    #[serde(rename = "ZFS")]
    Zfs,
    #[serde(rename = "ZFS_THIN")]
    ZfsThin,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Lvm => "LVM",
            ProviderKind::LvmThin => "LVM_THIN",
            ProviderKind::File => "FILE",
            ProviderKind::FileThin => "FILE_THIN",
            ProviderKind::Zfs => "ZFS",
            ProviderKind::ZfsThin => "ZFS_THIN",
        }
    }

    /// File pools live in a host directory and cannot be created from devices
    pub fn is_file_based(&self) -> bool {
        matches!(self, ProviderKind::File | ProviderKind::FileThin)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend of a storage pool, after the exactly-one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolBackend<'a> {
    Lvm(&'a LvmPool),
    LvmThin(&'a LvmThinPool),
    File(&'a FilePool),
    FileThin(&'a FilePool),
    Zfs(&'a ZfsPool),
    ZfsThin(&'a ZfsPool),
}

impl PoolBackend<'_> {
    pub fn kind(&self) -> ProviderKind {
        match self {
            PoolBackend::Lvm(_) => ProviderKind::Lvm,
            PoolBackend::LvmThin(_) => ProviderKind::LvmThin,
            PoolBackend::File(_) => ProviderKind::File,
            PoolBackend::FileThin(_) => ProviderKind::FileThin,
            PoolBackend::Zfs(_) => ProviderKind::Zfs,
            PoolBackend::ZfsThin(_) => ProviderKind::ZfsThin,
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl LinstorStoragePool {
    /// All backend fields that are set, in declaration order
    pub fn backends(&self) -> Vec<PoolBackend<'_>> {
        let mut backends = Vec::with_capacity(1);
        if let Some(lvm) = &self.lvm_pool {
            backends.push(PoolBackend::Lvm(lvm));
        }
        if let Some(thin) = &self.lvm_thin_pool {
            backends.push(PoolBackend::LvmThin(thin));
        }
        if let Some(file) = &self.file_pool {
            backends.push(PoolBackend::File(file));
        }
        if let Some(file) = &self.file_thin_pool {
            backends.push(PoolBackend::FileThin(file));
        }
        if let Some(zfs) = &self.zfs_pool {
            backends.push(PoolBackend::Zfs(zfs));
        }
        if let Some(zfs) = &self.zfs_thin_pool {
            backends.push(PoolBackend::ZfsThin(zfs));
        }
        backends
    }

    /// The single configured backend. Fails unless exactly one is set.
    pub fn backend(&self) -> Result<PoolBackend<'_>> {
        let backends = self.backends();
        match backends.as_slice() {
            [backend] => Ok(*backend),
            _ => Err(Error::PoolBackend {
                pool: self.name.clone(),
                count: backends.len(),
            }),
        }
    }

    /// Provider kind of the first configured backend, if any
    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.backends().first().map(PoolBackend::kind)
    }

    /// Backend specific pool identifier: volume group, `vg/thinpool`,
    /// directory or zpool.
    pub fn pool_name(&self) -> String {
        match self.backends().first() {
            Some(PoolBackend::Lvm(lvm)) => non_empty_or(&lvm.volume_group, &self.name),
            Some(PoolBackend::LvmThin(thin)) => {
                let lv = non_empty_or(&thin.thin_pool, &self.name);
                let vg = if thin.volume_group.is_empty() {
                    format!("linstor_{}", lv)
                } else {
                    thin.volume_group.clone()
                };
                format!("{}/{}", vg, lv)
            }
            Some(PoolBackend::File(file)) | Some(PoolBackend::FileThin(file)) => {
                self.file_directory(file)
            }
            Some(PoolBackend::Zfs(zfs)) | Some(PoolBackend::ZfsThin(zfs)) => {
                non_empty_or(&zfs.z_pool, &self.name)
            }
            None => String::new(),
        }
    }

    /// Volume group and thin pool LV of an LVM thin pool, defaults applied
    pub fn lvm_thin_names(&self) -> Option<(String, String)> {
        let name = self.pool_name();
        self.lvm_thin_pool.as_ref()?;
        name.split_once('/')
            .map(|(vg, lv)| (vg.to_string(), lv.to_string()))
    }

    /// Host directory of a file pool, defaults applied
    pub fn directory(&self) -> Option<String> {
        self.file_pool
            .as_ref()
            .or(self.file_thin_pool.as_ref())
            .map(|file| self.file_directory(file))
    }

    fn file_directory(&self, file: &FilePool) -> String {
        if file.directory.is_empty() {
            format!("{}/{}", DEFAULT_FILE_POOL_DIR, self.name)
        } else {
            file.directory.clone()
        }
    }

    /// Host devices of the pool source
    pub fn host_devices(&self) -> &[String] {
        self.source
            .as_ref()
            .and_then(|s| s.host_devices.as_deref())
            .unwrap_or(&[])
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
