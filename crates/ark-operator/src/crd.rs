//! `ArkCluster` CRD manifest.

use serde_json::json;

use ark_model::{GROUP, V1};

/// Manifest for `arkclusters.mort.is`, suitable for `kubectl apply -f -`.
///
/// The spec schema is open: unknown fields are preserved so older operators
/// tolerate newer specs. Status is a subresource, so the controller's
/// conditional writes never race user edits of the spec.
pub fn manifest() -> String {
    let crd = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": format!("arkclusters.{GROUP}"),
        },
        "spec": {
            "group": GROUP,
            "scope": "Namespaced",
            "names": {
                "kind": "ArkCluster",
                "plural": "arkclusters",
                "singular": "arkcluster",
                "shortNames": ["ark"],
            },
            "versions": [{
                "name": V1,
                "served": true,
                "storage": true,
                "subresources": { "status": {} },
                "additionalPrinterColumns": [
                    {
                        "name": "State",
                        "type": "string",
                        "jsonPath": ".status.state",
                    },
                    {
                        "name": "Ready",
                        "type": "string",
                        "jsonPath": ".status.ready",
                    },
                    {
                        "name": "Active",
                        "type": "string",
                        "jsonPath": ".status.activeVolume",
                    },
                ],
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": {
                                "type": "object",
                                "x-kubernetes-preserve-unknown-fields": true,
                            },
                            "status": {
                                "type": "object",
                                "x-kubernetes-preserve-unknown-fields": true,
                            },
                        },
                    },
                },
            }],
        },
    });
    serde_yaml::to_string(&crd).expect("static manifest serializes")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manifest_shape() {
        let yaml = manifest();
        let parsed: serde_json::Value = serde_yaml::from_str(&yaml).expect("valid yaml");
        assert_eq!(parsed["metadata"]["name"], "arkclusters.mort.is");
        assert_eq!(parsed["spec"]["names"]["kind"], "ArkCluster");
        assert!(parsed["spec"]["versions"][0]["subresources"]["status"].is_object());
    }
}
