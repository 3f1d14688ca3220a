use crate::cluster::{
    ApiHandle, ApiRequest, CORE_GROUP, Catalog, ClusterError, Connector, Handshake, Method,
    ResourceType, bounded,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::CONTENT_TYPE;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};

const JSON: &str = "application/json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Connects through `kube`: kubeconfig file, client, then catalog discovery
/// over `/apis` plus the core `v1` group.
pub struct KubeConnector {
    request_timeout: Duration,
}

impl KubeConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    async fn handshake(
        &self,
        config_file: &Path,
        context: Option<&str>,
    ) -> Result<Handshake, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(config_file).map_err(|err| {
            ClusterError::Handshake(format!("failed to read {}: {err}", config_file.display()))
        })?;
        let (contexts, current) = kube_contexts(&kubeconfig);
        let active_context = context.map(str::to_string).or(current);

        let options = KubeConfigOptions {
            context: active_context.clone(),
            cluster: None,
            user: None,
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|err| ClusterError::Handshake(err.to_string()))?;
        config.read_timeout = Some(self.request_timeout);
        let client = Client::try_from(config).map_err(|err| ClusterError::Handshake(err.to_string()))?;

        let catalog = discover(&client, self.request_timeout).await?;
        debug!("discovered {} api groups", catalog.len());
        Ok(Handshake {
            handle: Arc::new(KubeHandle { client }),
            catalog,
            contexts,
            active_context,
        })
    }
}

impl Connector for KubeConnector {
    fn connect<'a>(
        &'a self,
        config_file: &'a Path,
        context: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Handshake, ClusterError>> {
        self.handshake(config_file, context).boxed()
    }
}

/// Context names of a kubeconfig, sorted, plus its current context.
fn kube_contexts(kubeconfig: &Kubeconfig) -> (Vec<String>, Option<String>) {
    let mut contexts = kubeconfig
        .contexts
        .iter()
        .map(|named| named.name.clone())
        .collect::<Vec<_>>();
    contexts.sort();
    contexts.dedup();
    (contexts, kubeconfig.current_context.clone())
}

/// Every discovery call is bounded on its own; the walk over all groups is not.
async fn discover(client: &Client, limit: Duration) -> Result<Catalog, ClusterError> {
    let mut catalog = Catalog::new();
    let groups = bounded(limit, async {
        client.list_api_groups().await.map_err(handshake_error)
    })
    .await?;
    for group in groups.groups {
        for version in group.versions {
            let resources = bounded(limit, async {
                client
                    .list_api_group_resources(&version.group_version)
                    .await
                    .map_err(handshake_error)
            })
            .await;
            match resources {
                Ok(list) => {
                    catalog.insert(version.group_version, resource_types(list));
                }
                Err(err) => info!("no info for api group {}: {err}", version.group_version),
            }
        }
    }

    let core = bounded(limit, async {
        client
            .list_core_api_resources(CORE_GROUP)
            .await
            .map_err(handshake_error)
    })
    .await?;
    catalog.insert(CORE_GROUP.to_string(), resource_types(core));
    Ok(catalog)
}

fn handshake_error(err: kube::Error) -> ClusterError {
    ClusterError::Handshake(err.to_string())
}

/// Top-level resources of a group; subresources (`pods/log`) are skipped.
fn resource_types(list: APIResourceList) -> Vec<ResourceType> {
    list.resources
        .into_iter()
        .filter(|resource| !resource.name.contains('/'))
        .map(|resource| ResourceType {
            name: resource.name,
            kind: resource.kind,
            namespaced: resource.namespaced,
        })
        .collect()
}

struct KubeHandle {
    client: Client,
}

impl ApiHandle for KubeHandle {
    fn request(&self, request: ApiRequest) -> BoxFuture<'_, Result<Vec<u8>, ClusterError>> {
        async move {
            let request = build_request(request)?;
            self.client
                .request_text(request)
                .await
                .map(String::into_bytes)
                .map_err(service_error)
        }
        .boxed()
    }
}

fn build_request(request: ApiRequest) -> Result<http::Request<Vec<u8>>, ClusterError> {
    let (method, content_type) = match request.method {
        Method::Get => (http::Method::GET, None),
        Method::Post => (http::Method::POST, Some(JSON)),
        Method::Patch => (http::Method::PATCH, Some(MERGE_PATCH)),
        Method::Delete => (http::Method::DELETE, None),
    };
    let mut builder = http::Request::builder()
        .method(method)
        .uri(request.path);
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder
        .body(request.body.unwrap_or_default())
        .map_err(|err| ClusterError::InvalidBody(err.to_string()))
}

/// `kube` decodes the Status object of a failed call; the error body is that
/// object re-encoded as JSON, or its message if encoding fails.
fn service_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => ClusterError::Service {
            status: response.code,
            body: serde_json::to_string(&response)
                .unwrap_or_else(|_| response.message.to_string()),
        },
        other => ClusterError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{build_request, kube_contexts, resource_types, service_error};
    use crate::cluster::{ApiRequest, ClusterError, Method};
    use http::header::CONTENT_TYPE;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
    use kube::config::Kubeconfig;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: staging
clusters:
  - name: main
    cluster:
      server: https://127.0.0.1:6443
contexts:
  - name: staging
    context:
      cluster: main
      user: admin
  - name: dev
    context:
      cluster: main
      user: admin
users:
  - name: admin
    user:
      token: secret
"#;

    fn api_resource(name: &str, kind: &str, namespaced: bool) -> APIResource {
        APIResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced,
            ..APIResource::default()
        }
    }

    #[test]
    fn lists_sorted_contexts_and_current_one() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).expect("kubeconfig");
        let (contexts, current) = kube_contexts(&kubeconfig);
        assert_eq!(contexts, vec!["dev", "staging"]);
        assert_eq!(current.as_deref(), Some("staging"));
    }

    #[test]
    fn discovery_skips_subresources() {
        let list = APIResourceList {
            group_version: "v1".to_string(),
            resources: vec![
                api_resource("pods", "Pod", true),
                api_resource("pods/log", "Pod", true),
                api_resource("nodes", "Node", false),
            ],
        };
        let types = resource_types(list);
        let names = types.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["pods", "nodes"]);
        assert!(types[0].namespaced);
        assert!(!types[1].namespaced);
    }

    #[test]
    fn api_failures_keep_status_and_response_body() {
        let status = serde_json::from_value(serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": "pods \"web\" is forbidden",
            "reason": "Forbidden",
            "code": 403,
        }))
        .expect("status");
        let ClusterError::Service { status, body } = service_error(kube::Error::Api(status)) else {
            panic!("expected a service error");
        };
        assert_eq!(status, 403);
        let body: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(body["reason"], "Forbidden");
        assert_eq!(body["message"], "pods \"web\" is forbidden");
    }

    #[test]
    fn patch_requests_are_merge_patches() {
        let request = build_request(ApiRequest {
            method: Method::Patch,
            path: "/api/v1/namespaces/default/pods/web".to_string(),
            body: Some(b"{\"metadata\":{}}".to_vec()),
        })
        .expect("request");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(request.uri().path(), "/api/v1/namespaces/default/pods/web");
        assert_eq!(
            request.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/merge-patch+json")
        );

        let request = build_request(ApiRequest {
            method: Method::Get,
            path: "/api/v1/pods".to_string(),
            body: None,
        })
        .expect("request");
        assert!(request.headers().get(CONTENT_TYPE).is_none());
        assert!(request.body().is_empty());
    }
}
