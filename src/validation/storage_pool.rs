//! Storage pool validation
//!
//! Checks a whole list of pools at once against the previously accepted
//! list. Backend identity (type, volume group, thin pool, zpool, source
//! devices) is immutable once a pool with that name was accepted. Host
//! devices are claimed across all pools of the list.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use super::{ErrorList, FieldError, Path};
use crate::crd::{LinstorStoragePool, PoolBackend, ProviderKind};

/// Every host device must live below this directory
pub const DEVICE_ROOT: &str = "/dev/";

const MSG_EXACTLY_ONE_TYPE: &str = "Must specify exactly 1 type of storage pool";

static POOL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{1,46}[A-Za-z0-9]$").expect("static regex")
});

static LVM_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9.+_-]+$").expect("static regex"));

static ZPOOL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.:-]*(/[A-Za-z0-9_.:-]+)*$").expect("static regex"));

/// Validate `current` pools against the previously accepted `old` pools
pub fn validate_storage_pools(
    current: &[LinstorStoragePool],
    old: &[LinstorStoragePool],
    path: &Path,
) -> ErrorList {
    let mut errors = ErrorList::new();
    let mut names = BTreeSet::new();
    // Devices of unchanged pools are claimed before any new pool is checked
    let mut claimed_devices: BTreeSet<String> = current
        .iter()
        .filter(|pool| is_unchanged_source(pool, old))
        .flat_map(|pool| pool.host_devices().iter().cloned())
        .collect();

    for (i, pool) in current.iter().enumerate() {
        let path = path.index(i);
        if !names.insert(pool.name.as_str()) {
            errors.push(FieldError::duplicate(&path.child("name"), pool.name.as_str()));
        }
        let old_pool = old.iter().find(|o| o.name == pool.name);
        validate_pool(pool, old_pool, &path, &mut claimed_devices, &mut errors);
    }
    errors
}

/// The pool was accepted before with the same, non-empty source
fn is_unchanged_source(pool: &LinstorStoragePool, old: &[LinstorStoragePool]) -> bool {
    pool.source.is_some()
        && old
            .iter()
            .find(|o| o.name == pool.name)
            .is_some_and(|o| o.source == pool.source)
}

fn validate_pool(
    pool: &LinstorStoragePool,
    old: Option<&LinstorStoragePool>,
    path: &Path,
    claimed_devices: &mut BTreeSet<String>,
    errors: &mut ErrorList,
) {
    if !POOL_NAME.is_match(&pool.name) {
        errors.push(FieldError::invalid(
            &path.child("name"),
            pool.name.as_str(),
            "Not a valid LINSTOR Storage Pool name",
        ));
    }

    let backends = pool.backends();
    if backends.is_empty() {
        errors.push(FieldError::required(path, MSG_EXACTLY_ONE_TYPE));
    }
    for backend in backends.iter().skip(1) {
        errors.push(FieldError::forbidden(
            &path.child(backend_field(backend.kind())),
            MSG_EXACTLY_ONE_TYPE,
        ));
    }

    let Some(backend) = backends.first().copied() else {
        return;
    };
    let kind = backend.kind();
    let backend_path = path.child(backend_field(kind));

    if let Some(old_kind) = old.and_then(LinstorStoragePool::provider_kind) {
        if old_kind != kind {
            errors.push(FieldError::forbidden(&backend_path, "Cannot change storage pool type"));
        }
    }

    match backend {
        PoolBackend::Lvm(lvm) => {
            validate_name(&lvm.volume_group, &LVM_NAME, &backend_path.child("volumeGroup"), "Not a valid VG name", errors);
            if let Some(old_lvm) = old.and_then(|o| o.lvm_pool.as_ref()) {
                if old_lvm.volume_group != lvm.volume_group {
                    errors.push(FieldError::forbidden(&backend_path.child("volumeGroup"), "Cannot change VG name"));
                }
            }
        }
        PoolBackend::LvmThin(thin) => {
            validate_name(&thin.volume_group, &LVM_NAME, &backend_path.child("volumeGroup"), "Not a valid VG name", errors);
            validate_name(&thin.thin_pool, &LVM_NAME, &backend_path.child("thinPool"), "Not a valid thinpool LV name", errors);
            if let Some(old_thin) = old.and_then(|o| o.lvm_thin_pool.as_ref()) {
                if old_thin.volume_group != thin.volume_group {
                    errors.push(FieldError::forbidden(&backend_path.child("volumeGroup"), "Cannot change VG name"));
                }
                if old_thin.thin_pool != thin.thin_pool {
                    errors.push(FieldError::forbidden(&backend_path.child("thinPool"), "Cannot change thinpool LV name"));
                }
            }
        }
        PoolBackend::Zfs(zfs) | PoolBackend::ZfsThin(zfs) => {
            validate_name(&zfs.z_pool, &ZPOOL_NAME, &backend_path.child("zPool"), "Not a valid zpool name", errors);
            let old_zfs = old.and_then(|o| match kind {
                ProviderKind::ZfsThin => o.zfs_thin_pool.as_ref(),
                _ => o.zfs_pool.as_ref(),
            });
            if let Some(old_zfs) = old_zfs {
                if old_zfs.z_pool != zfs.z_pool {
                    errors.push(FieldError::forbidden(&backend_path.child("zPool"), "Cannot change zpool name"));
                }
            }
        }
        PoolBackend::File(_) | PoolBackend::FileThin(_) => {
            if pool.source.is_some() {
                errors.push(FieldError::forbidden(
                    &path.child("source"),
                    format!("Storage Pool Type '{}' does not support setting a source", kind),
                ));
            }
            let directory = pool.pool_name();
            if !directory.starts_with('/') || clean_path(&directory) != directory {
                errors.push(FieldError::invalid(
                    &backend_path.child("directory"),
                    directory,
                    "Not an absolute path",
                ));
            }
            return;
        }
    }

    // Dropping the source of an existing pool is allowed: it only stops device setup
    if let Some(source) = &pool.source {
        let source_path = path.child("source");
        if let Some(old_pool) = old {
            if old_pool.source.as_ref() != Some(source) {
                errors.push(FieldError::forbidden(&source_path, "Cannot change source"));
            }
            return;
        }

        let Some(devices) = &source.host_devices else {
            errors.push(FieldError::required(
                &source_path.child("hostDevices"),
                "Must specify exactly 1 type of storage pool source",
            ));
            return;
        };

        for (j, device) in devices.iter().enumerate() {
            let device_path = source_path.child("hostDevices").index(j);
            if !device.starts_with(DEVICE_ROOT) {
                errors.push(FieldError::invalid(&device_path, device.as_str(), "Path not rooted in /dev"));
            }
            if clean_path(device) != *device {
                errors.push(FieldError::invalid(&device_path, device.as_str(), "Not an absolute device path"));
            }
            if !claimed_devices.insert(device.clone()) {
                errors.push(FieldError::duplicate(&device_path, device.as_str()));
            }
        }
    }
}

fn validate_name(value: &str, pattern: &Regex, path: &Path, message: &str, errors: &mut ErrorList) {
    if !value.is_empty() && !pattern.is_match(value) {
        errors.push(FieldError::invalid(path, value, message));
    }
}

fn backend_field(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Lvm => "lvmPool",
        ProviderKind::LvmThin => "lvmThinPool",
        ProviderKind::File => "filePool",
        ProviderKind::FileThin => "fileThinPool",
        ProviderKind::Zfs => "zfsPool",
        ProviderKind::ZfsThin => "zfsThinPool",
    }
}

/// Lexical path normalisation: collapses `//`, `.` and `..`, drops trailing `/`
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().map(|last| *last != "..").unwrap_or(false) {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FilePool, LvmPool, LvmThinPool, StoragePoolSource, ZfsPool};
    use crate::validation::ErrorType;

    fn path() -> Path {
        Path::new("spec").child("storagePools")
    }

    fn lvm(name: &str, vg: &str) -> LinstorStoragePool {
        LinstorStoragePool {
            name: name.into(),
            lvm_pool: Some(LvmPool {
                volume_group: vg.into(),
            }),
            ..Default::default()
        }
    }

    fn with_devices(mut pool: LinstorStoragePool, devices: &[&str]) -> LinstorStoragePool {
        pool.source = Some(StoragePoolSource {
            host_devices: Some(devices.iter().map(|d| d.to_string()).collect()),
        });
        pool
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/dev/sdb"), "/dev/sdb");
        assert_eq!(clean_path("/dev//sdb"), "/dev/sdb");
        assert_eq!(clean_path("/dev/../dev/sdb/"), "/dev/sdb");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("a/../.."), "..");
        assert_eq!(clean_path(""), ".");
    }

    #[test]
    fn test_vg_unchanged_across_updates() {
        let first = vec![lvm("pool1", "vg1")];
        assert!(validate_storage_pools(&first, &[], &path()).is_empty());
        assert!(validate_storage_pools(&first, &first, &path()).is_empty());

        let changed = vec![lvm("pool1", "vg2")];
        let errors = validate_storage_pools(&changed, &first, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::Forbidden);
        assert_eq!(errors[0].detail, "Cannot change VG name");
        assert_eq!(errors[0].field, "spec.storagePools[0].lvmPool.volumeGroup");
    }

    #[test]
    fn test_vg_unset_to_set_is_a_change() {
        let old = vec![lvm("pool1", "")];
        let errors = validate_storage_pools(&[lvm("pool1", "pool1")], &old, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "Cannot change VG name");
    }

    #[test]
    fn test_type_change_rejected() {
        let old = vec![lvm("pool1", "vg1")];
        let new = LinstorStoragePool {
            name: "pool1".into(),
            zfs_pool: Some(ZfsPool::default()),
            ..Default::default()
        };
        let errors = validate_storage_pools(&[new], &old, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "Cannot change storage pool type");
    }

    #[test]
    fn test_thin_pool_fields_compared_separately() {
        let thin = |vg: &str, lv: &str| LinstorStoragePool {
            name: "thin".into(),
            lvm_thin_pool: Some(LvmThinPool {
                volume_group: vg.into(),
                thin_pool: lv.into(),
            }),
            ..Default::default()
        };
        let old = vec![thin("vg", "lv")];
        let errors = validate_storage_pools(&[thin("vg2", "lv2")], &old, &path());
        let details: Vec<&str> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["Cannot change VG name", "Cannot change thinpool LV name"]);

        let errors = validate_storage_pools(&[thin("bad vg", "lv")], &[], &path());
        assert_eq!(errors[0].detail, "Not a valid VG name");
    }

    #[test]
    fn test_backend_count() {
        let none = LinstorStoragePool {
            name: "pool1".into(),
            ..Default::default()
        };
        let errors = validate_storage_pools(&[none], &[], &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::Required);

        let mut two = lvm("pool1", "");
        two.file_pool = Some(FilePool::default());
        two.zfs_pool = Some(ZfsPool::default());
        let errors = validate_storage_pools(&[two], &[], &path());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.error_type == ErrorType::Forbidden));
        assert_eq!(errors[0].field, "spec.storagePools[0].filePool");
        assert_eq!(errors[1].field, "spec.storagePools[0].zfsPool");
    }

    #[test]
    fn test_pool_name() {
        let too_long = "a".repeat(49);
        for bad in ["ab", "-pool", "pool-", "pool.1", too_long.as_str()] {
            let errors = validate_storage_pools(&[lvm(bad, "")], &[], &path());
            assert_eq!(errors.len(), 1, "{}", bad);
            assert_eq!(errors[0].detail, "Not a valid LINSTOR Storage Pool name");
        }
        let longest = "a".repeat(48);
        for good in ["abc", "pool_1-a", longest.as_str()] {
            assert!(validate_storage_pools(&[lvm(good, "")], &[], &path()).is_empty());
        }
    }

    #[test]
    fn test_duplicate_device_second_occurrence_only() {
        let pools = vec![
            with_devices(lvm("pool1", ""), &["/dev/sdb"]),
            with_devices(lvm("pool2", ""), &["/dev/sdc", "/dev/sdb"]),
        ];
        let errors = validate_storage_pools(&pools, &[], &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::Duplicate);
        assert_eq!(errors[0].field, "spec.storagePools[1].source.hostDevices[1]");
    }

    #[test]
    fn test_unchanged_pool_still_claims_devices() {
        let old = vec![with_devices(lvm("pool1", ""), &["/dev/sdb"])];
        let pools = vec![
            with_devices(lvm("pool1", ""), &["/dev/sdb"]),
            with_devices(lvm("pool2", ""), &["/dev/sdb"]),
        ];
        let errors = validate_storage_pools(&pools, &old, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.storagePools[1].source.hostDevices[0]");
    }

    #[test]
    fn test_unchanged_pool_claims_devices_regardless_of_order() {
        let old = vec![with_devices(lvm("pool1", ""), &["/dev/sdb"])];
        let pools = vec![
            with_devices(lvm("pool2", ""), &["/dev/sdb"]),
            with_devices(lvm("pool1", ""), &["/dev/sdb"]),
        ];
        let errors = validate_storage_pools(&pools, &old, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::Duplicate);
        assert_eq!(errors[0].field, "spec.storagePools[0].source.hostDevices[0]");
    }

    #[test]
    fn test_source_removal_accepted() {
        let old = vec![with_devices(lvm("pool1", ""), &["/dev/sdb"])];
        let new = vec![lvm("pool1", "")];
        assert!(validate_storage_pools(&new, &old, &path()).is_empty());

        // The released device may be claimed by another pool
        let new = vec![lvm("pool1", ""), with_devices(lvm("pool2", ""), &["/dev/sdb"])];
        assert!(validate_storage_pools(&new, &old, &path()).is_empty());
    }

    #[test]
    fn test_source_change_rejected() {
        let old = vec![with_devices(lvm("pool1", ""), &["/dev/sdb"])];
        let new = vec![with_devices(lvm("pool1", ""), &["/dev/sdb", "/dev/sdc"])];
        let errors = validate_storage_pools(&new, &old, &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "Cannot change source");
    }

    #[test]
    fn test_device_paths() {
        let pools = vec![with_devices(lvm("pool1", ""), &["/tmp/sdb", "/dev/../dev/sdc"])];
        let errors = validate_storage_pools(&pools, &[], &path());
        let details: Vec<&str> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["Path not rooted in /dev", "Not an absolute device path"]);

        let mut missing = lvm("pool1", "");
        missing.source = Some(StoragePoolSource { host_devices: None });
        let errors = validate_storage_pools(&[missing], &[], &path());
        assert_eq!(errors[0].error_type, ErrorType::Required);
    }

    #[test]
    fn test_file_pool_rules() {
        let mut file = LinstorStoragePool {
            name: "pool1".into(),
            file_thin_pool: Some(FilePool::default()),
            ..Default::default()
        };
        assert!(validate_storage_pools(&[file.clone()], &[], &path()).is_empty());

        file.file_thin_pool = Some(FilePool {
            directory: "relative/dir".into(),
        });
        file = with_devices(file, &["/dev/sdb"]);
        let errors = validate_storage_pools(&[file], &[], &path());
        let details: Vec<&str> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            details,
            vec![
                "Storage Pool Type 'FILE_THIN' does not support setting a source",
                "Not an absolute path",
            ]
        );
    }

    #[test]
    fn test_zpool_immutable() {
        let zfs = |zpool: &str| LinstorStoragePool {
            name: "pool1".into(),
            zfs_thin_pool: Some(ZfsPool {
                z_pool: zpool.into(),
            }),
            ..Default::default()
        };
        let old = vec![zfs("tank")];
        assert!(validate_storage_pools(&[zfs("tank")], &old, &path()).is_empty());
        let errors = validate_storage_pools(&[zfs("tank2")], &old, &path());
        assert_eq!(errors[0].detail, "Cannot change zpool name");
    }

    #[test]
    fn test_duplicate_pool_names() {
        let errors = validate_storage_pools(&[lvm("pool1", ""), lvm("pool1", "")], &[], &path());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::Duplicate);
    }
}
