//! Curated port lists used by the phased port test.

/// A port to probe together with the service label it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub port: u16,
    pub service: String,
}

impl PortSpec {
    pub fn new(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            service: service.into(),
        }
    }
}

/// Ports probed first on every test: the services most LAN devices expose.
pub const PRIORITY_PORTS: &[(u16, &str)] = &[
    (22, "SSH"),
    (80, "HTTP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (3389, "RDP"),
    (53, "DNS"),
    (139, "NETBIOS"),
    (161, "SNMP"),
    (8080, "HTTP-ALT"),
];

/// Second phase of a fast test. Some entries repeat priority ports; they are
/// probed again and the open-port report deduplicates by port.
pub const SECONDARY_PORTS: &[(u16, &str)] = &[
    // file transfer / legacy
    (20, "FTP-DATA"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "TELNET"),
    (69, "TFTP"),
    (115, "SFTP"),
    (989, "FTPS-DATA"),
    (990, "FTPS"),
    (873, "RSYNC"),
    // web / proxy
    (80, "HTTP"),
    (81, "HTTP-ALT"),
    (443, "HTTPS"),
    (8000, "HTTP-ALT"),
    (8008, "HTTP-ALT"),
    (8080, "HTTP-PROXY"),
    (8081, "HTTP-ALT"),
    (8088, "HTTP-ALT"),
    (8443, "HTTPS-ALT"),
    (8888, "HTTP-ALT"),
    // dns / dhcp / time
    (53, "DNS"),
    (67, "DHCP-SRV"),
    (68, "DHCP-CLI"),
    (123, "NTP"),
    // mail
    (25, "SMTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (465, "SMTPS"),
    (587, "SMTP-SUB"),
    (993, "IMAPS"),
    (995, "POP3S"),
    // windows / ad / smb
    (88, "KERBEROS"),
    (135, "RPC-EPMAP"),
    (137, "NETBIOS-NS"),
    (138, "NETBIOS-DGM"),
    (139, "NETBIOS-SSN"),
    (389, "LDAP"),
    (445, "SMB"),
    (464, "KPASSWD"),
    (636, "LDAPS"),
    (3268, "GC-LDAP"),
    (3269, "GC-LDAPS"),
    // remote access
    (5900, "VNC"),
    (5901, "VNC-ALT"),
    (5938, "TeamViewer"),
    (3389, "RDP"),
    (22, "SSH"),
    (2222, "SSH-ALT"),
    (5800, "VNC-WEB"),
    // printing
    (515, "LPD"),
    (631, "IPP"),
    // network management
    (161, "SNMP"),
    (162, "SNMP-TRAP"),
    (514, "SYSLOG"),
    (179, "BGP"),
    // databases
    (1433, "MSSQL"),
    (1434, "MSSQL-BROWSER"),
    (1521, "ORACLE"),
    (2049, "NFS"),
    (27017, "MongoDB"),
    (3306, "MySQL"),
    (5432, "PostgreSQL"),
    (6379, "Redis"),
    (11211, "Memcached"),
    (9200, "Elastic"),
    (9300, "Elastic-Transport"),
    // brokers / iot
    (1883, "MQTT"),
    (8883, "MQTT-TLS"),
    (5672, "AMQP"),
    (15672, "RabbitMQ-UI"),
    (9092, "Kafka"),
    (9093, "Kafka-SSL"),
    // voip
    (5060, "SIP"),
    (5061, "SIPS"),
    (1720, "H.323"),
    // vpn / tunneling
    (500, "IKE"),
    (1701, "L2TP"),
    (1723, "PPTP"),
    (4500, "IPSEC-NAT-T"),
    (1194, "OpenVPN"),
    (51820, "WireGuard"),
    // virtualization / remote management
    (902, "VMware"),
    (903, "VMware-ALT"),
    (9443, "vSphere-ALT"),
    (5985, "WinRM-HTTP"),
    (5986, "WinRM-HTTPS"),
    // containers
    (2375, "Docker"),
    (2376, "Docker-TLS"),
    (6443, "Kubernetes-API"),
    (9418, "GIT"),
    // media
    (554, "RTSP"),
    (1935, "RTMP"),
    // other
    (111, "RPC"),
    (2048, "DLS-MON"),
    (6667, "IRC"),
];

pub fn priority_ports() -> Vec<PortSpec> {
    to_specs(PRIORITY_PORTS)
}

pub fn secondary_ports() -> Vec<PortSpec> {
    to_specs(SECONDARY_PORTS)
}

/// Every TCP port, labelled `PORT-<n>`.
pub fn all_ports() -> Vec<PortSpec> {
    (1..=u16::MAX)
        .map(|p| PortSpec::new(p, format!("PORT-{p}")))
        .collect()
}

fn to_specs(list: &[(u16, &str)]) -> Vec<PortSpec> {
    list.iter().map(|&(p, name)| PortSpec::new(p, name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_list_covers_common_services() {
        let p = priority_ports();
        assert_eq!(p.len(), 9);
        assert!(p.iter().any(|s| s.port == 22 && s.service == "SSH"));
        assert!(p.iter().any(|s| s.port == 443));
    }

    #[test]
    fn full_range_is_complete() {
        let all = all_ports();
        assert_eq!(all.len(), 65_535);
        assert_eq!(all.first().map(|s| s.port), Some(1));
        assert_eq!(all.last().map(|s| s.port), Some(65_535));
        assert_eq!(all[79].service, "PORT-80");
    }

    #[test]
    fn secondary_ports_are_nonzero() {
        let s = secondary_ports();
        assert!(s.len() > 80);
        assert!(s.iter().all(|p| p.port != 0));
    }
}
