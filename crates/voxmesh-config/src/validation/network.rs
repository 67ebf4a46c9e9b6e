//! Signaling, ICE server and relay validators.

use super::helpers::validate_range;
use crate::schema::VoxmeshConfig;

pub(super) fn validate_signaling(errors: &mut Vec<String>, config: &VoxmeshConfig) {
    let s = &config.signaling;
    if !(s.url.starts_with("ws://") || s.url.starts_with("wss://")) {
        errors.push(format!(
            "signaling.url = {} must start with ws:// or wss://",
            s.url
        ));
    }
    validate_range(
        errors,
        "signaling.heartbeat_interval_secs",
        s.heartbeat_interval_secs,
        5,
        120,
    );
    validate_range(
        errors,
        "signaling.connect_timeout_secs",
        s.connect_timeout_secs,
        1,
        60,
    );
    if s.reconnect_delay_secs == 0 {
        errors.push("signaling.reconnect_delay_secs must be at least 1".into());
    }
    if s.max_reconnect_delay_secs < s.reconnect_delay_secs {
        errors.push(format!(
            "signaling.max_reconnect_delay_secs = {} is below reconnect_delay_secs = {}",
            s.max_reconnect_delay_secs, s.reconnect_delay_secs
        ));
    }
}

pub(super) fn validate_ice_servers(errors: &mut Vec<String>, config: &VoxmeshConfig) {
    for (i, server) in config.rtc.ice_servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("rtc.ice_servers[{i}] has no urls"));
        }
        for url in &server.urls {
            let known = ["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known {
                errors.push(format!("rtc.ice_servers[{i}] url {url} has unknown scheme"));
            }
        }
        let is_turn = server.urls.iter().any(|u| u.starts_with("turn"));
        if is_turn && (server.username.is_none() || server.credential.is_none()) {
            errors.push(format!(
                "rtc.ice_servers[{i}] is a TURN server and needs username and credential"
            ));
        }
    }
}

pub(super) fn validate_relay(errors: &mut Vec<String>, config: &VoxmeshConfig) {
    validate_range(
        errors,
        "relay.max_peers",
        config.relay.max_peers as u64,
        2,
        32,
    );
    validate_range(
        errors,
        "relay.handshake_timeout_secs",
        config.relay.handshake_timeout_secs,
        1,
        120,
    );
}
