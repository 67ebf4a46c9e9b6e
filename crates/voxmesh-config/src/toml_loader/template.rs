//! Default TOML config template with inline documentation comments.

pub(crate) fn default_config_toml() -> &'static str {
    r##"# voxmesh configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[signaling]
# url = "ws://127.0.0.1:8080/ws"
# heartbeat_interval_secs = 25   # 5-120
# connect_timeout_secs = 15      # 1-60
# reconnect_delay_secs = 1
# max_reconnect_delay_secs = 30

[rtc]
# Replace the list to use your own STUN/TURN servers:
# [[rtc.ice_servers]]
# urls = ["turn:turn.example.com:3478"]
# username = "user"
# credential = "secret"

[negotiation]
# timeout_secs = 15   # 1-120
# retry_limit = 1     # 0-3

[media]
# audio = true
# video = false
# start_muted = false

[relay]
# port = 8080
# max_peers = 8                 # 2-32
# handshake_timeout_secs = 10

[logging]
# level = "INFO"   # TRACE, DEBUG, INFO, WARNING, ERROR
"##
}
