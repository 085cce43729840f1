//! LINSTOR REST API types
//!
//! Only the fields the operator reads or writes are modelled; unknown fields
//! in responses are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::{LinstorStoragePool, PoolBackend};

pub const NODE_TYPE_SATELLITE: &str = "SATELLITE";
pub const CONNECTION_ONLINE: &str = "ONLINE";
pub const FLAG_EVACUATE: &str = "EVACUATE";
pub const DEFAULT_INTERFACE: &str = "default-ipv4";

/// Node property listing the property keys applied by the operator
pub const PROP_LAST_APPLIED: &str = "Aux/piraeus.io/last-applied";

pub const PROP_LVM_VG: &str = "StorDriver/LvmVg";
pub const PROP_THIN_POOL: &str = "StorDriver/ThinPool";
pub const PROP_ZPOOL: &str = "StorDriver/ZPool";
pub const PROP_ZPOOL_THIN: &str = "StorDriver/ZPoolThin";
pub const PROP_FILE_DIR: &str = "StorDriver/FileDir";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub rest_api_version: String,
    #[serde(default)]
    pub git_hash: String,
    #[serde(default)]
    pub build_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInterface {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_encryption_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub net_interfaces: Vec<NetInterface>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_status: String,
}

impl Node {
    /// A satellite registration reachable at `address`
    pub fn satellite(name: &str, address: &str, port: u16, encryption: &str) -> Self {
        Self {
            name: name.to_string(),
            node_type: NODE_TYPE_SATELLITE.to_string(),
            net_interfaces: vec![NetInterface {
                name: DEFAULT_INTERFACE.to_string(),
                address: address.to_string(),
                satellite_port: Some(port),
                satellite_encryption_type: Some(encryption.to_string()),
            }],
            ..Default::default()
        }
    }

    pub fn is_online(&self) -> bool {
        self.connection_status == CONNECTION_ONLINE
    }

    pub fn is_evacuating(&self) -> bool {
        self.flags.iter().any(|f| f == FLAG_EVACUATE)
    }

    /// Property keys recorded as applied by the operator
    pub fn last_applied_keys(&self) -> Vec<String> {
        self.props
            .get(PROP_LAST_APPLIED)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Property changes for a node, storage pool or the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropsModify {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub override_props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_props: Vec<String>,
}

impl PropsModify {
    pub fn is_empty(&self) -> bool {
        self.override_props.is_empty() && self.delete_props.is_empty()
    }

    /// Apply the changes to a property map
    pub fn apply_to(&self, props: &mut BTreeMap<String, String>) {
        for key in &self.delete_props {
            props.remove(key);
        }
        props.extend(self.override_props.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    pub storage_pool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    pub provider_kind: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl StoragePool {
    /// The LINSTOR pool for a configured pool: driver properties plus `props`
    pub fn from_spec(pool: &LinstorStoragePool, props: BTreeMap<String, String>) -> Self {
        let mut all = driver_properties(pool);
        all.extend(props);
        Self {
            storage_pool_name: pool.name.clone(),
            node_name: String::new(),
            provider_kind: pool
                .provider_kind()
                .map(|k| k.as_str().to_string())
                .unwrap_or_default(),
            props: all,
        }
    }
}

/// Driver properties locating the backing storage of a pool
pub fn driver_properties(pool: &LinstorStoragePool) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    match pool.backend() {
        Ok(PoolBackend::Lvm(_)) => {
            props.insert(PROP_LVM_VG.to_string(), pool.pool_name());
        }
        Ok(PoolBackend::LvmThin(_)) => {
            if let Some((vg, lv)) = pool.lvm_thin_names() {
                props.insert(PROP_LVM_VG.to_string(), vg);
                props.insert(PROP_THIN_POOL.to_string(), lv);
            }
        }
        Ok(PoolBackend::Zfs(_)) => {
            props.insert(PROP_ZPOOL.to_string(), pool.pool_name());
        }
        Ok(PoolBackend::ZfsThin(_)) => {
            props.insert(PROP_ZPOOL_THIN.to_string(), pool.pool_name());
        }
        Ok(PoolBackend::File(_)) | Ok(PoolBackend::FileThin(_)) => {
            props.insert(PROP_FILE_DIR.to_string(), pool.pool_name());
        }
        Err(_) => {}
    }
    props
}

/// Pool created on top of raw host devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalStorageCreate {
    pub provider_kind: String,
    pub device_paths: Vec<String>,
    pub pool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_storage_pool: Option<PhysicalStorageStoragePool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalStorageStoragePool {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinitionCreate {
    pub resource_definition: ResourceDefinition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub node_name: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCreate {
    pub resource: Resource,
}

/// One entry of an API error response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCallRc {
    #[serde(default)]
    pub ret_code: i64,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FilePool, LvmThinPool, ZfsPool};

    #[test]
    fn test_node_wire_format() {
        let node = Node::satellite("node-a", "10.0.0.147", 3366, "PLAIN");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "SATELLITE");
        assert_eq!(json["net_interfaces"][0]["name"], "default-ipv4");
        assert_eq!(json["net_interfaces"][0]["satellite_port"], 3366);
        assert!(json.get("connection_status").is_none());

        let parsed: Node = serde_json::from_value(serde_json::json!({
            "name": "node-a",
            "type": "SATELLITE",
            "flags": ["EVACUATE"],
            "connection_status": "ONLINE",
            "props": {"Aux/piraeus.io/last-applied": "[\"Aux/a\"]"},
            "uuid": "ignored"
        }))
        .unwrap();
        assert!(parsed.is_online());
        assert!(parsed.is_evacuating());
        assert_eq!(parsed.last_applied_keys(), vec!["Aux/a".to_string()]);
    }

    #[test]
    fn test_props_modify() {
        let mut props: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())].into();
        let modify = PropsModify {
            override_props: [("c".to_string(), "3".to_string())].into(),
            delete_props: vec!["a".into()],
        };
        modify.apply_to(&mut props);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(PropsModify::default().is_empty());
    }

    #[test]
    fn test_driver_properties() {
        let thin = LinstorStoragePool {
            name: "thin".into(),
            lvm_thin_pool: Some(LvmThinPool::default()),
            ..Default::default()
        };
        let pool = StoragePool::from_spec(&thin, [("Aux/x".to_string(), "y".to_string())].into());
        assert_eq!(pool.provider_kind, "LVM_THIN");
        assert_eq!(pool.props[PROP_LVM_VG], "linstor_thin");
        assert_eq!(pool.props[PROP_THIN_POOL], "thin");
        assert_eq!(pool.props["Aux/x"], "y");

        let zfs = LinstorStoragePool {
            name: "z".into(),
            zfs_thin_pool: Some(ZfsPool {
                z_pool: "tank".into(),
            }),
            ..Default::default()
        };
        assert_eq!(driver_properties(&zfs)[PROP_ZPOOL_THIN], "tank");

        let file = LinstorStoragePool {
            name: "f".into(),
            file_pool: Some(FilePool::default()),
            ..Default::default()
        };
        assert_eq!(driver_properties(&file)[PROP_FILE_DIR], "/var/lib/linstor-pools/f");
    }
}
