// ABOUTME: Kubernetes manifests for the application and its pull secret.
// ABOUTME: Built as JSON so kubectl can apply them from stdin.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use super::{DeploymentSpec, SecretPayload};
use crate::types::ResourceName;

/// Pod annotation carrying the artifact digest the pod was created from.
pub const ARTIFACT_ANNOTATION: &str = "shipline.dev/artifact-digest";
/// Pod annotation carrying the source revision.
pub const REVISION_ANNOTATION: &str = "shipline.dev/revision";

const MANAGED_BY: &str = "shipline";

/// Deployment (and NodePort service when a node port is set) for `spec`.
///
/// The artifact annotation lives on the pod template, so a new digest always
/// changes the template and starts a rolling replacement.
pub fn deployment_manifest(spec: &DeploymentSpec) -> Value {
    let labels = json!({
        "app": spec.app.as_str(),
        "app.kubernetes.io/managed-by": MANAGED_BY,
    });

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.app.as_str(),
            "namespace": spec.namespace.as_str(),
            "labels": labels,
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { "app": spec.app.as_str() } },
            "strategy": {
                "type": "RollingUpdate",
                "rollingUpdate": { "maxUnavailable": 0, "maxSurge": 1 },
            },
            "template": {
                "metadata": {
                    "labels": labels,
                    "annotations": {
                        ARTIFACT_ANNOTATION: spec.artifact.as_str(),
                        REVISION_ANNOTATION: spec.revision.as_str(),
                    },
                },
                "spec": {
                    "imagePullSecrets": [ { "name": spec.pull_secret.as_str() } ],
                    "containers": [ {
                        "name": spec.app.as_str(),
                        "image": spec.image.to_string(),
                        "imagePullPolicy": "IfNotPresent",
                        "ports": [ { "containerPort": spec.container_port } ],
                        "readinessProbe": {
                            "httpGet": { "path": "/health", "port": spec.container_port },
                            "periodSeconds": 5,
                        },
                    } ],
                },
            },
        },
    });

    let mut items = vec![deployment];
    if let Some(node_port) = spec.node_port {
        items.push(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": spec.app.as_str(),
                "namespace": spec.namespace.as_str(),
                "labels": labels,
            },
            "spec": {
                "type": "NodePort",
                "selector": { "app": spec.app.as_str() },
                "ports": [ {
                    "port": spec.container_port,
                    "targetPort": spec.container_port,
                    "nodePort": node_port,
                } ],
            },
        }));
    }

    list(items)
}

/// Namespace plus a `kubernetes.io/dockerconfigjson` secret.
///
/// The namespace is included so the secret can be written before the first
/// deployment ever reaches the target.
pub fn secret_manifest(namespace: &ResourceName, name: &ResourceName, payload: &SecretPayload) -> Value {
    list(vec![
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace.as_str() },
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/dockerconfigjson",
            "metadata": {
                "name": name.as_str(),
                "namespace": namespace.as_str(),
                "labels": { "app.kubernetes.io/managed-by": MANAGED_BY },
            },
            "data": {
                ".dockerconfigjson": BASE64.encode(payload.docker_config_json()),
            },
        }),
    ])
}

fn list(items: Vec<Value>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Digest, ImageRef, Revision, SecretString};

    fn spec(node_port: Option<u16>) -> DeploymentSpec {
        let digest = Digest::of(b"todo");
        DeploymentSpec {
            namespace: ResourceName::new("default").unwrap(),
            app: ResourceName::new("todo-app").unwrap(),
            image: ImageRef::parse("docker.io/me/todo-app:abc123")
                .unwrap()
                .with_digest(digest.clone()),
            artifact: digest,
            revision: Revision::new("abc123").unwrap(),
            replicas: 2,
            container_port: 5000,
            node_port,
            pull_secret: ResourceName::new("reg-cred").unwrap(),
        }
    }

    #[test]
    fn pod_template_pins_artifact_and_secret() {
        let manifest = deployment_manifest(&spec(None));
        let items = manifest["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);

        let template = &items[0]["spec"]["template"];
        assert_eq!(
            template["metadata"]["annotations"][ARTIFACT_ANNOTATION],
            Digest::of(b"todo").as_str()
        );
        assert_eq!(template["spec"]["imagePullSecrets"][0]["name"], "reg-cred");
        let image = template["spec"]["containers"][0]["image"].as_str().unwrap();
        assert!(image.ends_with(Digest::of(b"todo").as_str()));
        assert_eq!(items[0]["spec"]["replicas"], 2);
    }

    #[test]
    fn node_port_adds_service() {
        let manifest = deployment_manifest(&spec(Some(30080)));
        let items = manifest["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["kind"], "Service");
        assert_eq!(items[1]["spec"]["ports"][0]["nodePort"], 30080);
    }

    #[test]
    fn secret_manifest_is_dockerconfigjson() {
        let payload = SecretPayload {
            registry_host: "docker.io".to_string(),
            principal: "ci".to_string(),
            secret_material: SecretString::new("token"),
        };
        let manifest = secret_manifest(
            &ResourceName::new("prod").unwrap(),
            &ResourceName::new("reg-cred").unwrap(),
            &payload,
        );
        let secret = &manifest["items"][1];
        assert_eq!(manifest["items"][0]["kind"], "Namespace");
        assert_eq!(secret["type"], "kubernetes.io/dockerconfigjson");
        let encoded = secret["data"][".dockerconfigjson"].as_str().unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert!(decoded.contains("\"username\":\"ci\""));
    }
}
