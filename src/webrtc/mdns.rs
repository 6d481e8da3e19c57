use webrtc::ice::mdns::MulticastDnsMode;

/// Environment variable overriding the configured mDNS mode
pub const MDNS_MODE_ENV: &str = "STREAMCASTER_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

/// Resolve the mDNS mode: environment first, then config, then QueryOnly
pub fn mdns_mode(configured: &str) -> MulticastDnsMode {
    std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
        .or_else(|| parse_mdns_mode(configured))
        .unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn mdns_host_name(instance_id: &str) -> String {
    format!("streamcaster-{instance_id}.local")
}
