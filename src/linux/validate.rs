use crate::error::{OxideError, Result};
use crate::os::detect::NetworkFacts;
use crate::utils::{net::is_trusted, tools::Prompt};
use log::{info, warn};

/// Refuse facts that would produce a broken or surprising rule set.
///
/// Runs before any firewall command. A LAN network equal to the Docker bridge
/// is fatal; networks outside the private and link-local ranges need the
/// operator's explicit yes.
pub fn validate(facts: &NetworkFacts, prompt: &dyn Prompt) -> Result<()> {
    if facts.docker_bridge_network == Some(facts.network) {
        return Err(OxideError::NetworkConflict(facts.network));
    }
    for custom in &facts.custom_docker_networks {
        if *custom == facts.network {
            warn!(
                "Docker network {} is the same as the LAN network, its rules will be duplicates",
                custom
            );
        }
    }

    for net in facts.allowed_networks() {
        if is_trusted(net) {
            continue;
        }
        warn!("{} is not a private or link-local network", net);
        if !prompt.confirm(&format!("Allow all inbound traffic from {}", net))? {
            return Err(OxideError::UntrustedNetwork(net));
        }
        info!("Operator accepted {}", net);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::ScriptedPrompt;
    use ipnetwork::Ipv4Network;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn cidr(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    fn facts(lan: &str, bridge: Option<&str>) -> NetworkFacts {
        NetworkFacts {
            interface: "wlan0".to_owned(),
            address: cidr(lan),
            network: crate::utils::net::network_of(cidr(lan)),
            tailscale_address: Some(Ipv4Addr::new(100, 100, 1, 1)),
            docker_bridge_network: bridge.map(cidr),
            custom_docker_networks: Vec::new(),
        }
    }

    #[test]
    fn private_networks_pass_silently() {
        let prompt = ScriptedPrompt::answering(&[]);
        validate(&facts("192.168.1.41/24", Some("172.17.0.0/16")), &prompt).unwrap();
        assert!(prompt.asked().is_empty());
    }

    #[test]
    fn bridge_equal_to_lan_is_fatal() {
        let prompt = ScriptedPrompt::answering(&[]);
        match validate(&facts("172.17.0.5/16", Some("172.17.0.0/16")), &prompt) {
            Err(OxideError::NetworkConflict(net)) => assert_eq!(net, cidr("172.17.0.0/16")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn conflict_wins_over_prompting() {
        let prompt = ScriptedPrompt::answering(&[]);
        let result = validate(&facts("203.0.113.9/24", Some("203.0.113.0/24")), &prompt);
        assert!(matches!(result, Err(OxideError::NetworkConflict(_))));
        assert!(prompt.asked().is_empty());
    }

    #[test]
    fn public_network_declined() {
        let prompt = ScriptedPrompt::answering(&[false]);
        match validate(&facts("203.0.113.9/24", None), &prompt) {
            Err(OxideError::UntrustedNetwork(net)) => assert_eq!(net, cidr("203.0.113.0/24")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(prompt.asked().len(), 1);
    }

    #[test]
    fn public_network_accepted() {
        let prompt = ScriptedPrompt::answering(&[true]);
        validate(&facts("203.0.113.9/24", Some("172.17.0.0/16")), &prompt).unwrap();
        assert_eq!(
            prompt.asked(),
            vec!["Allow all inbound traffic from 203.0.113.0/24".to_owned()]
        );
    }

    #[test]
    fn untrusted_custom_docker_network_prompts() {
        let mut f = facts("10.0.0.4/8", None);
        f.custom_docker_networks.push(cidr("100.90.0.0/16"));
        let prompt = ScriptedPrompt::answering(&[false]);
        assert!(matches!(
            validate(&f, &prompt),
            Err(OxideError::UntrustedNetwork(_))
        ));
    }
}
