//! Flow rules installed on every chain network.

use serde_json::{json, Value};

/// IPv4 ethertype.
const ETHERTYPE_IPV4: u16 = 0x0800;
/// ARP ethertype.
const ETHERTYPE_ARP: u16 = 0x0806;

/// The constant rule set: drop anything that is not IPv4 or ARP, accept web
/// traffic, break on SYN without ACK, accept ICMP and IGMP, accept the rest.
pub fn default_rules() -> Value {
    json!([
        {"type": "MATCH_ETHERTYPE", "not": true, "or": false, "etherType": ETHERTYPE_IPV4},
        {"type": "MATCH_ETHERTYPE", "not": true, "or": false, "etherType": ETHERTYPE_ARP},
        {"type": "ACTION_DROP"},
        {"type": "MATCH_IP_PROTOCOL", "not": false, "or": false, "ipProtocol": 6},
        {"type": "MATCH_IP_DEST_PORT_RANGE", "not": false, "or": false, "start": 80, "end": 80},
        {"type": "ACTION_ACCEPT"},
        {"type": "MATCH_IP_PROTOCOL", "not": false, "or": false, "ipProtocol": 6},
        {"type": "MATCH_IP_DEST_PORT_RANGE", "not": false, "or": false, "start": 443, "end": 443},
        {"type": "ACTION_ACCEPT"},
        {"type": "MATCH_CHARACTERISTICS", "not": false, "or": false, "mask": "0000000000000002"},
        {"type": "MATCH_CHARACTERISTICS", "not": true, "or": false, "mask": "0000000000000010"},
        {"type": "ACTION_BREAK"},
        {"type": "MATCH_IP_PROTOCOL", "not": false, "or": false, "ipProtocol": 1},
        {"type": "ACTION_ACCEPT"},
        {"type": "MATCH_IP_PROTOCOL", "not": false, "or": false, "ipProtocol": 2},
        {"type": "ACTION_ACCEPT"},
        {"type": "ACTION_ACCEPT"}
    ])
}
