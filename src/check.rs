use crate::config::MonitorConfig;
use crate::kubernetes::{KubeCluster, ServiceSummary};
use crate::logs::LogTailer;
use crate::monitor::PodLister;
use crate::sink::EventSink;
use crate::types::Source;
use crate::watermark::WatermarkStore;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Outcome of resolving one service name.
#[derive(Debug)]
pub struct DnsProbe {
    pub host: String,
    pub addrs: Result<Vec<std::net::IpAddr>, std::io::Error>,
    pub elapsed: Duration,
}

pub async fn probe(host: &str) -> DnsProbe {
    let start = Instant::now();
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map(|it| it.map(|sa| sa.ip()).collect());
    DnsProbe {
        host: host.to_string(),
        addrs,
        elapsed: start.elapsed(),
    }
}

pub fn format_external_ips(ips: &[String]) -> String {
    if ips.is_empty() {
        "<none>".to_string()
    } else {
        ips.join(",")
    }
}

pub fn format_ports(ports: &[(String, i32)]) -> String {
    ports
        .iter()
        .map(|(proto, port)| format!("{}/{}", proto, port))
        .collect::<Vec<_>>()
        .join(",")
}

fn describe_service(name: &str, svc: &ServiceSummary) -> String {
    format!(
        "Found {} Service: CLUSTER-IP: {}, EXTERNAL-IP: {}, PORT(S): {}",
        name,
        svc.cluster_ip,
        format_external_ips(&svc.external_ips),
        format_ports(&svc.ports)
    )
}

/// Point-in-time diagnosis: pods, one pass over their logs, service, endpoints
/// and optionally DNS resolution of every service.
pub async fn run_check(
    cluster: &KubeCluster,
    config: &MonitorConfig,
    tailer: &LogTailer,
    sink: &dyn EventSink,
    service: &str,
    dns: bool,
) -> anyhow::Result<()> {
    info!("Checking that DNS pods are up...");
    let pods = cluster
        .list_pods(&config.namespace, &config.selector)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list pods: {}", e))?;
    if pods.is_empty() {
        warn!("No DNS pods are running!");
    } else {
        info!("Total DNS pods: {}", pods.len());
    }

    info!("Parsing DNS logs for suspicious lines...");
    let store = WatermarkStore::new();
    for pod in &pods {
        for container in &config.containers {
            if !pod.containers.is_empty() && !pod.runs_container(container) {
                continue;
            }
            let source = Source::log(&pod.name, container);
            let report = tailer.tail(&source, &store, sink).await;
            if let Some(e) = report.error {
                error!(source = %source, error = %e, "Failed to read logs");
            }
        }
    }

    info!("Checking {} Service...", service);
    match cluster.service_summary(service).await {
        Ok(svc) => info!("{}", describe_service(service, &svc)),
        Err(e) => warn!(error = %e, "{} Service not found!", service),
    }

    info!("Verifying that endpoints for {} are exposed...", service);
    match cluster.endpoint_addresses(service).await {
        Ok(subsets) => {
            for addrs in subsets {
                info!("Found endpoints: {}", addrs.join(","));
            }
        }
        Err(e) => warn!(error = %e, "{} endpoints not found!", service),
    }

    if dns {
        for host in cluster.service_hostnames().await? {
            let probe = probe(&host).await;
            match probe.addrs {
                Ok(addrs) => info!("{}: {:?} -- took {:?}", probe.host, addrs, probe.elapsed),
                Err(e) => error!("{}: {} -- took {:?}", probe.host, e, probe.elapsed),
            }
        }
    }

    Ok(())
}
