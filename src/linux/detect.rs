use crate::error::{OxideError, Result};
use crate::utils::{
    config::OxideConfig,
    net::network_of,
    tools::{command_line, Shell},
};
use ipnetwork::Ipv4Network;
use log::{debug, info, warn};
use serde::Serialize;
use std::{fmt::Display, net::Ipv4Addr};

const DOCKER_BRIDGE: &str = "docker0";
const BUILTIN_DOCKER_NETWORKS: [&str; 3] = ["bridge", "host", "none"];
const SUBNET_TEMPLATE: &str = "{{range .IPAM.Config}}{{.Subnet}} {{end}}";

/// What the host's network looks like right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkFacts {
    pub interface: String,
    pub address: Ipv4Network,
    pub network: Ipv4Network,
    pub tailscale_address: Option<Ipv4Addr>,
    pub docker_bridge_network: Option<Ipv4Network>,
    pub custom_docker_networks: Vec<Ipv4Network>,
}

impl NetworkFacts {
    /// Every network that gets allow rules, LAN first.
    pub fn allowed_networks(&self) -> Vec<Ipv4Network> {
        let mut out = vec![self.network];
        out.extend(self.docker_bridge_network);
        out.extend(self.custom_docker_networks.iter().copied());
        out
    }
}

impl Display for NetworkFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Interface:        {}", self.interface)?;
        writeln!(f, "Address:          {}", self.address)?;
        writeln!(f, "LAN network:      {}", self.network)?;
        match self.tailscale_address {
            Some(ip) => writeln!(f, "Tailscale:        {}", ip)?,
            None => writeln!(f, "Tailscale:        not detected")?,
        }
        match self.docker_bridge_network {
            Some(net) => writeln!(f, "Docker bridge:    {}", net)?,
            None => writeln!(f, "Docker bridge:    not detected")?,
        }
        if self.custom_docker_networks.is_empty() {
            write!(f, "Docker networks:  none")
        } else {
            let nets: Vec<String> = self
                .custom_docker_networks
                .iter()
                .map(|n| n.to_string())
                .collect();
            write!(f, "Docker networks:  {}", nets.join(", "))
        }
    }
}

/// Token following `dev` in `ip route` output.
pub fn parse_route_get(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dev" {
            return tokens.next().map(|dev| dev.to_owned());
        }
    }
    None
}

/// Interface of the first default route in `ip route show default` output.
pub fn parse_default_route(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.trim_start().starts_with("default"))
        .and_then(parse_route_get)
}

/// IPv4 subnets from `docker network inspect`, IPv6 ones skipped.
pub fn parse_subnets(output: &str) -> Vec<Ipv4Network> {
    output
        .split_whitespace()
        .filter_map(|token| token.parse::<Ipv4Network>().ok())
        .map(network_of)
        .collect()
}

fn route_interface(shell: &Shell, config: &OxideConfig) -> Result<String> {
    let probe = config.probe_address.to_string();
    match shell.run("ip", &["-4", "route", "get", &probe], None) {
        Ok(out) if out.success => {
            if let Some(dev) = parse_route_get(&out.stdout) {
                debug!("Route to {} leaves through {}", probe, dev);
                return Ok(dev);
            }
        }
        Ok(out) => debug!("ip route get {} failed: {}", probe, out.stderr.trim()),
        Err(e) => debug!("ip route get {} failed: {}", probe, e),
    }

    warn!("Could not probe a route to {}, trying the default route", probe);
    let out = shell.run("ip", &["-4", "route", "show", "default"], None)?;
    if !out.success {
        return Err(OxideError::NoRouteInterface);
    }
    parse_default_route(&out.stdout).ok_or(OxideError::NoRouteInterface)
}

fn interface_address(shell: &Shell, interface: &str) -> Result<Option<Ipv4Network>> {
    Ok(shell
        .host()
        .interfaces()?
        .into_iter()
        .filter(|addr| addr.name == interface && !addr.ip.is_loopback())
        .find_map(|addr| addr.cidr()))
}

fn service_active(shell: &Shell, service: &str) -> bool {
    match shell.run("systemctl", &["is-active", service], None) {
        Ok(out) => out.stdout.trim() == "active",
        Err(e) => {
            debug!("systemctl is-active {}: {}", service, e);
            false
        }
    }
}

fn detect_tailscale(shell: &Shell, config: &OxideConfig) -> Option<Ipv4Addr> {
    if !service_active(shell, "tailscaled") {
        debug!("tailscaled is not active");
        return None;
    }
    let out = match shell.run("tailscale", &["ip", "-4"], Some(config.mesh_timeout())) {
        Ok(out) if out.success => out,
        Ok(out) => {
            warn!("tailscale ip -4 failed: {}", out.stderr.trim());
            return None;
        }
        Err(e) => {
            warn!("Tailscale query failed: {}", e);
            return None;
        }
    };
    let ip = out
        .stdout
        .lines()
        .find_map(|line| line.trim().parse::<Ipv4Addr>().ok())?;
    if !config.mesh_range.contains(ip) {
        warn!(
            "Tailscale address {} is outside {}, ignoring it",
            ip, config.mesh_range
        );
        return None;
    }
    Some(ip)
}

fn docker_networks(shell: &Shell) -> Vec<Ipv4Network> {
    let args = ["network", "ls", "--format", "{{.Name}}"];
    let names = match shell.privileged("docker", &args) {
        Ok(out) if out.success => out.stdout,
        Ok(out) => {
            warn!("{} failed: {}", command_line("docker", &args), out.stderr.trim());
            return Vec::new();
        }
        Err(e) => {
            warn!("Could not list Docker networks: {}", e);
            return Vec::new();
        }
    };

    let mut networks: Vec<Ipv4Network> = Vec::new();
    for name in names
        .lines()
        .map(str::trim)
        .filter(|n| !n.is_empty() && !BUILTIN_DOCKER_NETWORKS.contains(n))
    {
        match shell.privileged("docker", &["network", "inspect", "--format", SUBNET_TEMPLATE, name]) {
            Ok(out) if out.success => {
                for subnet in parse_subnets(&out.stdout) {
                    if !networks.contains(&subnet) {
                        debug!("Docker network {} uses {}", name, subnet);
                        networks.push(subnet);
                    }
                }
            }
            Ok(out) => warn!("Could not inspect Docker network {}: {}", name, out.stderr.trim()),
            Err(e) => warn!("Could not inspect Docker network {}: {}", name, e),
        }
    }
    networks
}

fn detect_docker(shell: &Shell) -> Result<(Option<Ipv4Network>, Vec<Ipv4Network>)> {
    if !service_active(shell, "docker") {
        debug!("docker is not active");
        return Ok((None, Vec::new()));
    }
    let bridge = interface_address(shell, DOCKER_BRIDGE)?.map(network_of);
    if bridge.is_none() {
        warn!("Docker is running but {} has no IPv4 address", DOCKER_BRIDGE);
    }
    Ok((bridge, docker_networks(shell)))
}

/// Read the host's network state. Nothing here changes the system.
pub fn detect(shell: &Shell, config: &OxideConfig, interface: Option<&str>) -> Result<NetworkFacts> {
    let interface = match interface {
        Some(name) => {
            debug!("Using interface {} as given", name);
            name.to_owned()
        }
        None => route_interface(shell, config)?,
    };
    let address = interface_address(shell, &interface)?
        .ok_or_else(|| OxideError::NoIpv4Address(interface.clone()))?;
    let network = network_of(address);
    info!("{} has {} on {}", interface, address, network);

    let tailscale_address = detect_tailscale(shell, config);
    let (docker_bridge_network, custom_docker_networks) = detect_docker(shell)?;

    Ok(NetworkFacts {
        interface,
        address,
        network,
        tailscale_address,
        docker_bridge_network,
        custom_docker_networks,
    })
}
