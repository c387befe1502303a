use std::net::{IpAddr, Ipv4Addr};

pub const GRPC_SERVER_HOST: &str = "GRPC_SERVER_HOST";

pub const GRPC_SERVER_PORT: &str = "GRPC_SERVER_PORT";

pub const KAFKA_BOOTSTRAP_SERVERS: &str = "KAFKA_BOOTSTRAP_SERVERS";

const DEFAULT_PORT: u16 = 50051;

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));

const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

const DEFAULT_CLIENT_ID: &str = "telemetry-broker";

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

pub fn get_default_addr() -> IpAddr {
    DEFAULT_ADDR
}

pub fn get_default_bootstrap_servers() -> String {
    DEFAULT_BOOTSTRAP_SERVERS.to_string()
}

/// Client id reported to the log cluster, the host name when the environment provides one
pub fn get_default_client_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string())
}

/// Read a process environment variable, treating blank values as unset
pub fn get_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
