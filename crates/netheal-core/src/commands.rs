//! Command classification
//!
//! Recon may only run read-only commands and remediation may only run
//! state-changing ones; both are checked here rather than trusted to the
//! oracle.

use once_cell::sync::Lazy;
use regex::Regex;

const READ_ONLY_VERBS: &[&str] = &[
    "show", "display", "ping", "traceroute", "tracert", "tracepath", "mtr", "more", "cat",
    "head", "tail", "less", "grep", "uname", "uptime", "hostname", "whoami", "netstat", "ss",
    "arp", "dig", "nslookup", "host", "dmesg", "journalctl", "packet-tracer",
];

/// `ip <object>` forms that only read
static IP_READ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ip(\s+-\S+)*\s+(a|addr|address|l|link|r|route|n|neigh|rule)(\s+(show|list|ls|get)\b.*)?$")
        .expect("ip read pattern")
});

static FIREWALL_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(iptables|ip6tables)\b.*\s(-L|-S|--list)\b|^nft\s+list\b")
        .expect("firewall list pattern")
});

/// Default routes, in IOS, ASA and Linux syntax
static DEFAULT_ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(no\s+)?(ip\s+route\s+0\.0\.0\.0\s+0\.0\.0\.0|route\s+\S+\s+0\.0\.0\.0\s+0\.0\.0\.0|ipv6\s+route\s+::/0|ip\s+(-\d\s+)?route\s+(add|del|delete|replace|change)\s+(default|0\.0\.0\.0/0)|route\s+(add|del)\s+default)",
    )
    .expect("default route pattern")
});

/// Output sent to a file: shell redirection, `tee`, or IOS `| redirect` / `| append`
static WRITES_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r">|\|\s*(tee|redirect|append)\b").expect("file write pattern")
});

static MGMT_INTERFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^interface\s+(management\S*|mgmt\S*|ma\d\S*)\s*$")
        .expect("management interface pattern")
});

static MGMT_LINUX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdev\s+(mgmt\S*|management\S*)\b").expect("management device pattern")
});

static NAMES_MGMT_PLANE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)management[\s-](plane|interface|network|vrf|route)|\bmgmt\b")
        .expect("management plane pattern")
});

fn normalize(command: &str) -> String {
    let mut text = command.trim().to_ascii_lowercase();
    for prefix in ["sudo ", "do "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start().to_string();
        }
    }
    text
}

/// Diagnostic command that changes nothing on the device
#[must_use]
pub fn is_read_only(command: &str) -> bool {
    let text = normalize(command);
    let Some(verb) = text.split_whitespace().next() else {
        return true;
    };
    if WRITES_FILE.is_match(&text) {
        return false;
    }
    if verb == "route" || verb == "ifconfig" {
        // bare or flag-only forms list; `route add ...` / `ifconfig eth1 up` do not
        return text.split_whitespace().nth(1).map_or(true, |arg| arg.starts_with('-'));
    }
    READ_ONLY_VERBS.contains(&verb) || IP_READ.is_match(&text) || FIREWALL_LIST.is_match(&text)
}

/// Default route change
#[must_use]
pub fn is_default_route_change(command: &str) -> bool {
    DEFAULT_ROUTE.is_match(command.trim())
}

/// `interface <management>` line that opens a management-interface block
#[must_use]
pub fn opens_management_interface(command: &str) -> bool {
    MGMT_INTERFACE.is_match(command.trim())
}

/// Linux command aimed at a management interface
#[must_use]
pub fn targets_management_device(command: &str) -> bool {
    MGMT_LINUX.is_match(command)
}

/// The text blames the management plane itself
#[must_use]
pub fn names_management_plane(text: &str) -> bool {
    NAMES_MGMT_PLANE.is_match(text)
}

/// Line that leaves an interface configuration block
#[must_use]
pub fn closes_block(command: &str) -> bool {
    let text = normalize(command);
    text == "exit" || text == "end" || text.starts_with("interface ")
}

/// Comma- or newline-separated list from an oracle answer
#[must_use]
pub fn parse_command_list(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(|c| c.trim().trim_matches(|ch: char| ch == '`' || ch == '"' || ch == '\'').trim())
        .filter(|c| !c.is_empty() && !c.starts_with("```"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_only_commands() {
        for cmd in [
            "show ip interface brief",
            "do show run",
            "ping 10.10.10.2",
            "ip addr",
            "ip -4 route show",
            "ip link",
            "iptables -L -n",
            "route -n",
            "sudo cat /etc/hosts",
        ] {
            assert!(is_read_only(cmd), "{cmd}");
        }
        for cmd in [
            "no shutdown",
            "interface Gi0/1",
            "configure terminal",
            "ip route 10.0.0.0 255.0.0.0 10.1.1.1",
            "ip link set eth1 up",
            "ip addr add 10.10.10.5/24 dev eth1",
            "route add -net 10.0.0.0/8 gw 10.1.1.1",
            "iptables -F",
            "cat <<EOF > /etc/network/interfaces",
            "grep -v eth1 /etc/hosts >> /tmp/hosts",
            "echo up | tee /sys/class/net/eth1/operstate",
            "show running-config | redirect flash:backup.cfg",
        ] {
            assert!(!is_read_only(cmd), "{cmd}");
        }
    }

    #[test]
    fn test_management_plane_detection() {
        assert!(is_default_route_change("ip route 0.0.0.0 0.0.0.0 192.168.100.254"));
        assert!(is_default_route_change("route management 0.0.0.0 0.0.0.0 192.168.100.254"));
        assert!(is_default_route_change("ip route add default via 192.168.100.254"));
        assert!(!is_default_route_change("ip route 10.20.20.0 255.255.255.0 10.10.10.1"));

        assert!(opens_management_interface("interface Management0/0"));
        assert!(opens_management_interface("interface mgmt0"));
        assert!(!opens_management_interface("interface GigabitEthernet0/1"));

        assert!(targets_management_device("ip link set dev mgmt0 down"));
        assert!(names_management_plane("The management plane default route is missing"));
        assert!(!names_management_plane("Gi0/1 is administratively down"));
    }

    #[test]
    fn test_parse_command_list() {
        assert_eq!(
            parse_command_list(" show ip route, `show ip int brief` ,, show logging\n"),
            vec!["show ip route", "show ip int brief", "show logging"]
        );
        assert!(parse_command_list(" , ").is_empty());
    }
}
