//! Parsing of `kurtosis enclave inspect` output.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::kurtosis::{EnclaveService, EnclaveServicePort};

struct ServiceLineRegexes {
    new_service: Regex,
    none_port_service: Regex,
    continue_service: Regex,
}

fn regexes() -> &'static ServiceLineRegexes {
    static REGEXES: OnceLock<ServiceLineRegexes> = OnceLock::new();
    REGEXES.get_or_init(|| ServiceLineRegexes {
        new_service: Regex::new(
            r"^([a-f0-9]{12})\s+(\S+)\s+(\S+):\s(\d+\S+)\s->\s(\S+)\s+(\S+)\s*$",
        )
        .expect("valid new service regex"),
        none_port_service: Regex::new(r"^([a-f0-9]{12})\s+(\S+)\s+(<none>)\s+(\S+)")
            .expect("valid none port regex"),
        continue_service: Regex::new(r"^\s+(\S+):\s+(\d+\S+)\s+->\s+(\S+)")
            .expect("valid continued port regex"),
    })
}

/// Parses the services section of `kurtosis enclave inspect` output into
/// [`EnclaveService`] values.
///
/// Example of all service line edge cases handled:
///
/// ```text
/// 0: ========================================== User Services ==========================================
/// 1: 7d28bc07285f   l1-engine-0                                      rpc: 8545/tcp -> http://127.0.0.1:56766       RUNNING
/// 2:                                                                 ws: 8546/tcp -> 127.0.0.1:56767
/// 3: cd490f70070c   driver-0                                         <none>                                        RUNNING
/// ```
///
/// Parse normal service lines (line 1), some services have multiple ports (line 2) or
/// no ports (line 3).
pub fn parse_services_from_enclave_inspect(raw_output: &str) -> Vec<EnclaveService> {
    let re = regexes();
    let mut services: Vec<EnclaveService> = Vec::new();

    for line in raw_output.lines() {
        // if we match a new service line, return new enclave service entry
        if let Some(caps) = re.new_service.captures(line) {
            services.push(EnclaveService {
                uuid: caps[1].to_string(),
                name: caps[2].to_string(),
                status: caps[6].to_string(),
                ports: vec![EnclaveServicePort {
                    name: caps[3].to_string(),
                    protocol: caps[4].to_string(),
                    url: strip_scheme(&caps[5]),
                }],
            });
            continue;
        }

        // if we match a none port service, return new enclave service entry with no ports
        if let Some(caps) = re.none_port_service.captures(line) {
            services.push(EnclaveService {
                uuid: caps[1].to_string(),
                name: caps[2].to_string(),
                status: caps[4].to_string(),
                ports: vec![],
            });
            continue;
        }

        // if we match a continued service port line, append it to the last service
        if let Some(caps) = re.continue_service.captures(line) {
            if let Some(last_service) = services.last_mut() {
                last_service.ports.push(EnclaveServicePort {
                    name: caps[1].to_string(),
                    protocol: caps[2].to_string(),
                    url: strip_scheme(&caps[3]),
                });
            }
        }
    }

    services
}

/// Removes any "scheme://" prefix from url.
fn strip_scheme(url: &str) -> String {
    match url.split_once("://") {
        Some((_, rest)) => rest.to_string(),
        None => url.to_string(),
    }
}

/// Log enclave services at debug level.
pub fn pprint_services(services: &[EnclaveService]) {
    for service in services {
        let ports: Vec<String> = service
            .ports
            .iter()
            .map(|p| format!("{}@{}", p.name, p.url))
            .collect();
        debug!(
            service = %service.name,
            status = %service.status,
            ports = ?ports,
            "indexed enclave service"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT_OUTPUT: &str = "\
Name:            rollup-hive
UUID:            edf36e4a6b1f
Status:          RUNNING

========================================== User Services ==========================================
UUID           Name          Ports                                       Status
7d28bc07285f   l1-engine-0   rpc: 8545/tcp -> http://127.0.0.1:56766     RUNNING
                             ws: 8546/tcp -> 127.0.0.1:56767
                             engine-rpc: 8551/tcp -> 127.0.0.1:56768
cd490f70070c   driver-0      <none>                                      RUNNING
93e319e73408   l2-engine-0   rpc: 8545/tcp -> http://127.0.0.1:56741     RUNNING
";

    #[test]
    fn parses_multi_port_and_portless_services() {
        let services = parse_services_from_enclave_inspect(INSPECT_OUTPUT);
        assert_eq!(services.len(), 3);

        let l1 = &services[0];
        assert_eq!(l1.uuid, "7d28bc07285f");
        assert_eq!(l1.name, "l1-engine-0");
        assert_eq!(l1.status, "RUNNING");
        let names: Vec<&str> = l1.ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rpc", "ws", "engine-rpc"]);
        assert_eq!(l1.ports[0].url, "127.0.0.1:56766");
        assert_eq!(l1.ports[1].private_port(), Some(8546));

        assert_eq!(services[1].name, "driver-0");
        assert!(services[1].ports.is_empty());
        assert_eq!(services[2].ports[0].url, "127.0.0.1:56741");
    }

    #[test]
    fn endpoint_keeps_private_and_public_ports() {
        let services = parse_services_from_enclave_inspect(INSPECT_OUTPUT);
        let endpoint = services[0].to_endpoint();
        assert_eq!(endpoint.name, "l1-engine-0");
        assert_eq!(endpoint.port("ws").unwrap().public_addr, "127.0.0.1:56767");
        assert_eq!(endpoint.port("engine-rpc").unwrap().private_port, 8551);
    }

    #[test]
    fn orphan_port_line_is_ignored() {
        let services = parse_services_from_enclave_inspect("    ws: 8546/tcp -> 127.0.0.1:1\n");
        assert!(services.is_empty());
    }
}
