use crate::config::ClusterConnection;
use crate::error::ClientError;
use anyhow::Context;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde_json::json;
use tracing::{debug, info};

static EKS_IMAGE_UPDATER_FIELD_MANAGER: &str = "eks-image-updater";
static UPDATED_AT_ANNOTATION: &str = "eks-image-updater/updatedAt";
static PREVIOUS_IMAGE_ANNOTATION: &str = "eks-image-updater/previousImage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerImage {
    pub container_name: String,
    pub image: String,
}

/// The containers of a deployment's pod template, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub containers: Vec<ContainerImage>,
}

impl DeploymentSpec {
    pub fn container(&self, name: &str) -> Option<&ContainerImage> {
        self.containers.iter().find(|c| c.container_name == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerImage> {
        self.containers.iter_mut().find(|c| c.container_name == name)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers
            .iter()
            .map(|c| c.container_name.clone())
            .collect()
    }
}

pub trait ClusterClient {
    /// Fails with [`ClientError::NotFound`] when the deployment does not exist.
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSpec, ClientError>;

    /// Persists the container images of `spec`. `previous_image` is recorded for audit.
    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        spec: &DeploymentSpec,
        previous_image: &str,
    ) -> Result<(), ClientError>;
}

pub struct KubeClusterClient {
    client: Client,
}

pub async fn create_client(connection: &ClusterConnection) -> anyhow::Result<KubeClusterClient> {
    info!("Initializing K8s client");
    let config = match connection {
        ClusterConnection::InCluster => {
            info!("Using in cluster kube config");
            Config::incluster().context("Failed to load in-cluster kube config")?
        }
        ClusterConnection::Kubeconfig { path, context } => {
            let options = KubeConfigOptions {
                context: context.clone(),
                ..Default::default()
            };
            match path {
                Some(path) => {
                    debug!("Using kube config file {}", path.display());
                    let kubeconfig = Kubeconfig::read_from(path).with_context(|| {
                        format!("Failed to read kube config {}", path.display())
                    })?;
                    Config::from_custom_kubeconfig(kubeconfig, &options)
                        .await
                        .context("Failed to load kube config")?
                }
                None => Config::from_kubeconfig(&options)
                    .await
                    .context("Failed to load default kube config")?,
            }
        }
    };

    let client = Client::try_from(config).context("Failed to build Kubernetes API client")?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(KubeClusterClient { client })
}

impl ClusterClient for KubeClusterClient {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSpec, ClientError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = deployments
            .get_opt(name)
            .await
            .map_err(classify_kube_error)?
            .ok_or_else(|| ClientError::NotFound(format!("deployment {}/{}", namespace, name)))?;

        let containers = deployment
            .spec
            .and_then(|spec| spec.template.spec)
            .map(|pod_spec| pod_spec.containers)
            .unwrap_or_default()
            .into_iter()
            .map(|container| ContainerImage {
                container_name: container.name,
                image: container.image.unwrap_or_default(),
            })
            .collect();

        Ok(DeploymentSpec { containers })
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        name: &str,
        spec: &DeploymentSpec,
        previous_image: &str,
    ) -> Result<(), ClientError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = image_patch(spec, previous_image, &Utc::now().to_rfc3339());

        debug!("Patching deployment {}/{} with patch {}", namespace, name, patch);

        deployments
            .patch(
                name,
                &PatchParams::apply(EKS_IMAGE_UPDATER_FIELD_MANAGER),
                &Patch::Strategic(&patch),
            )
            .await
            .map_err(classify_kube_error)?;
        Ok(())
    }
}

/// Strategic merge patch setting each container's image; containers merge by name.
fn image_patch(
    spec: &DeploymentSpec,
    previous_image: &str,
    updated_at: &str,
) -> serde_json::Value {
    let containers: Vec<_> = spec
        .containers
        .iter()
        .map(|c| json!({ "name": c.container_name, "image": c.image }))
        .collect();

    json!({
        "metadata": {
            "annotations": {
                UPDATED_AT_ANNOTATION: updated_at,
                PREVIOUS_IMAGE_ANNOTATION: previous_image,
            }
        },
        "spec": {
            "template": {
                "spec": {
                    "containers": containers
                }
            }
        }
    })
}

/// Transport failures, throttling (429) and server side errors (5xx) are worth retrying.
fn classify_kube_error(err: kube::Error) -> ClientError {
    match &err {
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            ClientError::Transient(Box::new(err))
        }
        kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
            ClientError::Transient(Box::new(err))
        }
        _ => ClientError::Permanent(Box::new(err)),
    }
}
