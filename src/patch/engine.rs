//! Applying patches to a manifest set

use serde_json::Value;
use tracing::debug;

use super::{
    strategic_merge, target_of, CompiledSelector, ParsedPatch, OPTION_ALLOW_KIND_CHANGE,
    OPTION_ALLOW_NAME_CHANGE,
};
use crate::crd::Patch;
use crate::error::{Error, Result};
use crate::manifests::{Manifest, ManifestSet};

/// Apply `patches` in order to every object of `set` matched by their target.
///
/// Each patch sees the result of the previous ones. A patch matching no
/// object is skipped. The set keeps its objects; only their content changes.
pub fn apply_patches(set: &mut ManifestSet, patches: &[Patch]) -> Result<()> {
    for (index, patch) in patches.iter().enumerate() {
        let parsed = ParsedPatch::parse(&patch.patch);
        if let ParsedPatch::Unparseable {
            merge_error,
            json_error,
        } = &parsed
        {
            return Err(Error::PatchParse(format!(
                "patch {}: not a strategic merge patch ({}) or JSON patch ({})",
                index, merge_error, json_error
            )));
        }
        let target = target_of(patch, &parsed)
            .ok_or_else(|| Error::PatchTarget(format!("patch {} has no target", index)))?;
        let selector = CompiledSelector::compile(&target)?;

        let mut matched = 0;
        for object in set.objects_mut().iter_mut() {
            if !selector.matches(object) {
                continue;
            }
            *object = apply_one(object, patch, &parsed)?;
            matched += 1;
        }
        debug!("Patch {} targeting {} matched {} resources", index, target, matched);
    }
    Ok(())
}

fn apply_one(object: &Manifest, patch: &Patch, parsed: &ParsedPatch) -> Result<Manifest> {
    let allow_name_change = patch.option(OPTION_ALLOW_NAME_CHANGE);
    let allow_kind_change = patch.option(OPTION_ALLOW_KIND_CHANGE);

    let patched = match parsed {
        ParsedPatch::JsonPatch(operations) => {
            let mut doc = object.as_value().clone();
            json_patch::patch(&mut doc, &operations.0).map_err(|e| Error::PatchApply {
                target: object.key().to_string(),
                reason: e.to_string(),
            })?;
            doc
        }
        ParsedPatch::StrategicMerge(resource) => {
            let mut resource = resource.clone();
            strip_identity(&mut resource, allow_name_change, allow_kind_change);
            strategic_merge(object.as_value(), &resource).map_err(|e| match e {
                Error::PatchApply { target, reason } => Error::PatchApply {
                    target: format!("{} ({})", object.key(), target),
                    reason,
                },
                other => other,
            })?
        }
        ParsedPatch::Unparseable { .. } => return Ok(object.clone()),
    };

    let patched = Manifest::from_value(patched).map_err(|e| Error::PatchApply {
        target: object.key().to_string(),
        reason: e.to_string(),
    })?;

    let renamed = patched.name() != object.name() || patched.namespace() != object.namespace();
    if renamed && !allow_name_change {
        return Err(Error::PatchApply {
            target: object.key().to_string(),
            reason: format!("name change to {} requires {}", patched.name(), OPTION_ALLOW_NAME_CHANGE),
        });
    }
    let rekinded = patched.kind() != object.kind() || patched.api_version() != object.api_version();
    if rekinded && !allow_kind_change {
        return Err(Error::PatchApply {
            target: object.key().to_string(),
            reason: format!("kind change to {} requires {}", patched.kind(), OPTION_ALLOW_KIND_CHANGE),
        });
    }
    Ok(patched)
}

/// Drop the fields of a strategic merge resource that identify its target,
/// unless the patch is allowed to change them.
fn strip_identity(resource: &mut Value, keep_name: bool, keep_kind: bool) {
    let Some(map) = resource.as_object_mut() else {
        return;
    };
    if !keep_kind {
        map.remove("apiVersion");
        map.remove("kind");
    }
    if !keep_name {
        if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("name");
            metadata.remove("namespace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Selector;
    use serde_json::json;

    fn satellite_set() -> ManifestSet {
        let mut set = ManifestSet::new();
        set.push(
            Manifest::from_value(json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "satellite", "namespace": "piraeus", "labels": {"app": "sat"}, "annotations": {}},
                "spec": {"containers": [
                    {"name": "linstor-satellite", "image": "server"},
                    {"name": "drbd-reactor", "image": "reactor"}
                ]}
            }))
            .unwrap(),
        );
        let ds = Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "linstor-satellite.node-a", "namespace": "piraeus"},
            "spec": {"selector": {"matchLabels": {"app": "sat"}}, "template": {"metadata": {"labels": {"app": "sat"}}}}
        }))
        .unwrap();
        let key = ds.key();
        set.push(ds);
        set.seed_pod_template("satellite", key);
        set
    }

    fn pod_target() -> Selector {
        Selector {
            kind: "Pod".into(),
            name: "satellite".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_json_patch_on_seed_pod_reaches_template() {
        let mut set = satellite_set();
        let patches = vec![Patch::with_target(
            r#"[{"op":"add","path":"/metadata/annotations/test1","value":"val1"}]"#,
            pod_target(),
        )];
        set.apply_patches(&patches).unwrap();
        set.promote_pod_templates().unwrap();

        let ds = set.get("DaemonSet", "linstor-satellite.node-a").unwrap();
        assert_eq!(
            ds.as_value()["spec"]["template"]["metadata"]["annotations"]["test1"],
            "val1"
        );
    }

    #[test]
    fn test_strategic_merge_deletes_single_container() {
        let mut set = satellite_set();
        let patches = vec![Patch::new(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: satellite
spec:
  containers:
  - name: drbd-reactor
    $patch: delete
"#,
        )];
        set.apply_patches(&patches).unwrap();
        set.promote_pod_templates().unwrap();

        let ds = set.get("DaemonSet", "linstor-satellite.node-a").unwrap();
        let containers = ds.as_value()["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["name"], "linstor-satellite");
        assert_eq!(containers[0]["image"], "server");
    }

    #[test]
    fn test_patches_apply_in_order() {
        let mut set = satellite_set();
        let patches = vec![
            Patch::with_target(r#"[{"op":"add","path":"/metadata/labels/step","value":"1"}]"#, pod_target()),
            Patch::with_target(r#"[{"op":"test","path":"/metadata/labels/step","value":"1"},{"op":"replace","path":"/metadata/labels/step","value":"2"}]"#, pod_target()),
        ];
        set.apply_patches(&patches).unwrap();
        assert_eq!(set.get("Pod", "satellite").unwrap().labels()["step"], "2");
    }

    #[test]
    fn test_unmatched_patch_is_noop() {
        let mut set = satellite_set();
        let before = set.keys();
        let patches = vec![Patch::new(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: linstor-controller\nspec:\n  replicas: 3\n",
        )];
        set.apply_patches(&patches).unwrap();
        assert_eq!(set.keys(), before);
    }

    #[test]
    fn test_invalid_patch_rejected() {
        let mut set = satellite_set();
        let no_target = vec![Patch::new(r#"[{"op":"add","path":"/a","value":1}]"#)];
        assert!(matches!(set.apply_patches(&no_target), Err(Error::PatchTarget(_))));

        let garbage = vec![Patch::with_target("{{{", pod_target())];
        assert!(matches!(set.apply_patches(&garbage), Err(Error::PatchParse(_))));
    }

    #[test]
    fn test_name_change_requires_option() {
        let mut set = satellite_set();
        let mut rename = Patch::with_target(
            r#"[{"op":"replace","path":"/metadata/name","value":"renamed"}]"#,
            pod_target(),
        );
        assert!(set.apply_patches(std::slice::from_ref(&rename)).is_err());

        rename.options.insert(OPTION_ALLOW_NAME_CHANGE.into(), true);
        let mut set = satellite_set();
        set.apply_patches(&[rename]).unwrap();
        assert!(set.get("Pod", "renamed").is_some());
    }

    #[test]
    fn test_failing_operation_is_error() {
        let mut set = satellite_set();
        let patches = vec![Patch::with_target(
            r#"[{"op":"remove","path":"/spec/doesNotExist"}]"#,
            pod_target(),
        )];
        assert!(matches!(set.apply_patches(&patches), Err(Error::PatchApply { .. })));
    }
}
