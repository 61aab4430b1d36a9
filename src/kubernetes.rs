use crate::error::{BoxError, SourceError};
use crate::logs::{LineVisitor, LogApi};
use crate::monitor::PodLister;
use crate::types::{PodSummary, Watermark};
use async_trait::async_trait;
use futures::io::{AsyncBufRead, AsyncBufReadExt};
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};

/// Cluster access through a kube client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSummary {
    pub cluster_ip: String,
    pub external_ips: Vec<String>,
    /// (protocol, port)
    pub ports: Vec<(String, i32)>,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn service_summary(&self, name: &str) -> anyhow::Result<ServiceSummary> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let svc = api.get(name).await?;
        let spec = svc
            .spec
            .ok_or_else(|| anyhow::anyhow!("Service {} has no spec", name))?;
        Ok(ServiceSummary {
            cluster_ip: spec.cluster_ip.unwrap_or_default(),
            external_ips: spec.external_ips.unwrap_or_default(),
            ports: spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| (p.protocol.unwrap_or_else(|| "TCP".to_string()), p.port))
                .collect(),
        })
    }

    /// Ready addresses per endpoint subset.
    pub async fn endpoint_addresses(&self, name: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let eps = api.get(name).await?;
        Ok(eps
            .subsets
            .unwrap_or_default()
            .into_iter()
            .map(|subset| {
                subset
                    .addresses
                    .unwrap_or_default()
                    .into_iter()
                    .map(|addr| addr.ip)
                    .collect()
            })
            .collect())
    }

    /// `name.namespace` for every service in the cluster.
    pub async fn service_hostnames(&self) -> anyhow::Result<Vec<String>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(|svc| match svc.namespace() {
                Some(ns) if !ns.is_empty() => format!("{}.{}", svc.name_any(), ns),
                _ => svc.name_any(),
            })
            .collect())
    }
}

pub fn summarize_pod(pod: &Pod) -> PodSummary {
    PodSummary {
        name: pod.name_any(),
        containers: pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default(),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        restarts: pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| (cs.name.clone(), cs.restart_count))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Hand every newline-terminated line of `reader` to `visitor`. Bytes that
/// are not UTF-8 are replaced rather than ending the stream.
pub async fn visit_lines<R>(reader: R, visitor: &mut dyn LineVisitor) -> Result<(), SourceError>
where
    R: AsyncBufRead,
{
    let mut reader = std::pin::pin!(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| SourceError::Read(Box::new(e)))?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        visitor.visit(line.trim_end_matches(['\n', '\r']));
    }
}

#[async_trait]
impl PodLister for KubeCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, BoxError> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items.iter().map(summarize_pod).collect())
    }
}

#[async_trait]
impl LogApi for KubeCluster {
    async fn stream_log(
        &self,
        pod: &str,
        container: &str,
        since: Option<Watermark>,
        visitor: &mut dyn LineVisitor,
    ) -> Result<(), SourceError> {
        let lp = LogParams {
            container: Some(container.to_string()),
            timestamps: true,
            since_time: since,
            ..Default::default()
        };

        let api = self.pods(&self.namespace);
        let reader = api
            .log_stream(pod, &lp)
            .await
            .map_err(|e| SourceError::Open(Box::new(e)))?;

        visit_lines(reader, visitor).await
    }
}
