use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the process-wide Prometheus recorder and its own `GET /metrics`
/// listener (spec.md 4.6/6). Every `metrics::counter!`/`histogram!`/
/// `gauge!` call site across the crate writes through whatever recorder is
/// installed here; there is no `MetricsSink` handle threaded through
/// components -- it is an ambient capability, not a dependency (spec.md 9,
/// "no cyclic ownership").
pub fn install_recorder(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(port, "prometheus metrics exporter installed");
    Ok(())
}
