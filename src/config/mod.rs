use std::sync::OnceLock;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<ServerConfig> = OnceLock::new();

pub fn init() {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::raw().only(&["database_url"]))
        .merge(Env::prefixed("APP_").global());

    let config = match raw_config.extract::<ServerConfig>() {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    };
    if config.database_url.is_empty() {
        eprintln!("DATABASE_URL is not set");
        std::process::exit(1);
    }
    crate::config::CONFIG
        .set(config)
        .expect("config should be set");
}

pub fn get() -> &'static ServerConfig {
    CONFIG.get().expect("config should be set")
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_http_port")]
    pub listen_http_port: u16,
    #[serde(default = "default_listen_https_port")]
    pub listen_https_port: u16,
    pub domain: Option<String>,
    pub database_url: String,
    pub log: LogConfig,
    pub tls: Option<TlsConfig>,
    #[serde(default = "default_serve_dir")]
    pub serve_dir: String,
    #[serde(default = "default_avatars_dir")]
    pub avatars_dir: String,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Tuning for the WebSocket fan-out core. A bare `config.toml` with just
/// `database_url` still boots: every field here defaults.
#[derive(Deserialize, Clone, Debug)]
pub struct RealtimeConfig {
    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,
    #[serde(default = "default_write_deadline_secs")]
    pub write_deadline_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_close_grace_secs")]
    pub close_grace_secs: u64,
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,
    #[serde(default = "default_dispatcher_workers")]
    pub dispatcher_workers: usize,
    #[serde(default = "default_dispatcher_queue_capacity")]
    pub dispatcher_queue_capacity: usize,
    #[serde(default = "default_per_connection_rate")]
    pub per_connection_rate: u32,
    #[serde(default = "default_per_connection_burst")]
    pub per_connection_burst: u32,
    #[serde(default = "default_presence_rate")]
    pub presence_rate: u32,
    #[serde(default = "default_typing_rate")]
    pub typing_rate: u32,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_abuse_close_threshold")]
    pub abuse_close_threshold: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            read_deadline_secs: default_read_deadline_secs(),
            write_deadline_secs: default_write_deadline_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            close_grace_secs: default_close_grace_secs(),
            ring_buffer_capacity: default_ring_buffer_capacity(),
            dispatcher_workers: default_dispatcher_workers(),
            dispatcher_queue_capacity: default_dispatcher_queue_capacity(),
            per_connection_rate: default_per_connection_rate(),
            per_connection_burst: default_per_connection_burst(),
            presence_rate: default_presence_rate(),
            typing_rate: default_typing_rate(),
            max_frame_bytes: default_max_frame_bytes(),
            abuse_close_threshold: default_abuse_close_threshold(),
        }
    }
}

fn default_read_deadline_secs() -> u64 {
    60
}
fn default_write_deadline_secs() -> u64 {
    10
}
fn default_heartbeat_interval_secs() -> u64 {
    25
}
fn default_close_grace_secs() -> u64 {
    2
}
fn default_ring_buffer_capacity() -> usize {
    256
}
fn default_dispatcher_workers() -> usize {
    16
}
fn default_dispatcher_queue_capacity() -> usize {
    1024
}
fn default_per_connection_rate() -> u32 {
    50
}
fn default_per_connection_burst() -> u32 {
    100
}
fn default_presence_rate() -> u32 {
    5
}
fn default_typing_rate() -> u32 {
    2
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}
fn default_abuse_close_threshold() -> u32 {
    10
}

#[derive(Deserialize, Clone, Debug)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[allow(dead_code)]
pub fn default_false() -> bool {
    false
}
#[allow(dead_code)]
pub fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_listen_http_port() -> u16 {
    8080
}

fn default_listen_https_port() -> u16 {
    8443
}

fn default_serve_dir() -> String {
    "/www".into()
}

fn default_avatars_dir() -> String {
    "/www/avatars".into()
}
