use crate::diagnostics::Diagnostics;
use crate::models::dto::{ConnectionDTO, SnapshotDTO, StatsDTO};
use crate::table::FlowTable;

/// Flows (most recent first) plus packet diagnostics. Read-only.
pub fn export_snapshot(table: &FlowTable, diagnostics: &Diagnostics) -> SnapshotDTO {
    let flows = table.snapshot();
    SnapshotDTO {
        connections: flows.iter().map(ConnectionDTO::from).collect(),
        diagnostics: diagnostics.to_dto(),
    }
}

pub fn stats(table: &FlowTable, diagnostics: &Diagnostics) -> StatsDTO {
    StatsDTO {
        connections: table.len(),
        packets: diagnostics.to_dto(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::{FlowKey, Protocol};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::Value;
    use std::net::IpAddr;

    fn key(remote: &str, remote_port: u16, protocol: Protocol) -> FlowKey {
        FlowKey {
            local_ip: "10.0.0.5".parse::<IpAddr>().unwrap(),
            remote_ip: remote.parse::<IpAddr>().unwrap(),
            local_port: 51000,
            remote_port,
            protocol,
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let table = FlowTable::new();
        let diagnostics = Diagnostics::new();
        let now = Utc::now();

        let k = key("93.184.216.34", 443, Protocol::Tcp);
        table.update_at(k, true, 200, now);
        table.update_at(k, false, 800, now + Duration::seconds(1));
        table.set_domain(&k, "example.org".to_string());
        diagnostics.record(Some(Protocol::Tcp), now);
        diagnostics.record(Some(Protocol::Tcp), now + Duration::seconds(1));

        let json = serde_json::to_value(export_snapshot(&table, &diagnostics)).unwrap();

        let conn = &json["connections"][0];
        assert_eq!(conn["srcAddr"], "10.0.0.5");
        assert_eq!(conn["srcPort"], 51000);
        assert_eq!(conn["dstAddr"], "93.184.216.34");
        assert_eq!(conn["dstPort"], 443);
        assert_eq!(conn["protocol"], "TCP");
        assert_eq!(conn["service"], "HTTPS");
        assert_eq!(conn["bytes"], 1000);
        assert_eq!(conn["packets"], 2);
        assert_eq!(conn["domain"], "example.org");
        assert_eq!(conn["country"], "Unknown");
        assert_eq!(conn["asn"], "Unknown");
        assert_eq!(conn["active"], true);
        assert!(conn["id"].is_u64());
        let first_seen = DateTime::parse_from_rfc3339(conn["firstSeen"].as_str().unwrap()).unwrap();
        let last_seen = DateTime::parse_from_rfc3339(conn["lastSeen"].as_str().unwrap()).unwrap();
        assert_eq!(last_seen - first_seen, Duration::seconds(1));

        let diag = &json["diagnostics"];
        assert_eq!(diag["total_packets"], 2);
        assert_eq!(diag["tcp_packets"], 2);
        assert_eq!(diag["udp_packets"], 0);
        assert_eq!(diag["icmp_packets"], 0);
        assert_eq!(diag["other_packets"], 0);
        assert!(diag["last_packet_time"].is_string());
    }

    #[test]
    fn test_empty_snapshot() {
        let json = serde_json::to_value(export_snapshot(&FlowTable::new(), &Diagnostics::new())).unwrap();
        assert_eq!(json["connections"], Value::Array(vec![]));
        assert_eq!(json["diagnostics"]["last_packet_time"], Value::Null);
    }

    #[test]
    fn test_connections_ordered_by_last_seen() {
        let table = FlowTable::new();
        let now = Utc::now();
        table.update_at(key("1.1.1.1", 53, Protocol::Udp), true, 1, now - Duration::seconds(5));
        table.update_at(key("8.8.8.8", 0, Protocol::Icmp), true, 1, now);
        table.update_at(key("9.9.9.9", 22, Protocol::Tcp), true, 1, now - Duration::seconds(60));

        let snapshot = export_snapshot(&table, &Diagnostics::new());
        let order: Vec<&str> = snapshot.connections.iter().map(|c| c.dst_addr.as_str()).collect();
        assert_eq!(order, vec!["8.8.8.8", "1.1.1.1", "9.9.9.9"]);
        assert_eq!(snapshot.connections[0].service, "ICMP");
        assert_eq!(snapshot.connections[1].service, "DNS");
    }

    #[test]
    fn test_export_does_not_mutate() {
        let table = FlowTable::new();
        let diagnostics = Diagnostics::new();
        table.update(key("1.1.1.1", 53, Protocol::Udp), true, 64);

        let first = export_snapshot(&table, &diagnostics);
        let second = export_snapshot(&table, &diagnostics);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stats() {
        let table = FlowTable::new();
        let diagnostics = Diagnostics::new();
        table.update(key("1.1.1.1", 53, Protocol::Udp), true, 64);
        diagnostics.record(Some(Protocol::Udp), Utc::now());
        diagnostics.record(None, Utc::now());

        let json = serde_json::to_value(stats(&table, &diagnostics)).unwrap();
        assert_eq!(json["connections"], 1);
        assert_eq!(json["packets"]["other_packets"], 1);
        assert_eq!(json["packets"]["total_packets"], 2);
    }
}
