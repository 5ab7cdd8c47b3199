//! `INFO` reply parser (part of C1). The underlying Redis driver hands back
//! the whole reply as one string (section headers `# Name`, then `key:value`
//! lines, blank lines between sections); turning that into a typed record is
//! this crate's own work, grounded in the original system's per-section
//! `redis:"..."`-tagged structs (see `SPEC_FULL.md` §4.1).
//!
//! Each section keeps the fields the node/pod logic actually reasons about
//! typed, and folds everything else into a raw `BTreeMap` fallback so nothing
//! is silently dropped.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoServer {
    pub redis_version: String,
    pub redis_mode: String,
    pub os: String,
    pub process_id: i64,
    pub tcp_port: u16,
    pub uptime_in_seconds: u64,
    pub config_file: String,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoClients {
    pub connected_clients: i64,
    pub blocked_clients: i64,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoMemory {
    pub used_memory: i64,
    pub used_memory_human: String,
    pub used_memory_rss: i64,
    pub used_memory_peak: i64,
    pub mem_fragmentation_ratio: f64,
    pub mem_allocator: String,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoPersistence {
    pub loading: bool,
    pub rdb_changes_since_last_save: i64,
    pub rdb_bgsave_in_progress: bool,
    pub rdb_last_bgsave_status: String,
    pub aof_enabled: bool,
    pub aof_rewrite_in_progress: bool,
    pub aof_last_bgrewrite_status: String,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoStats {
    pub total_connections_received: i64,
    pub total_commands_processed: i64,
    pub instantaneous_ops_per_sec: i64,
    pub expired_keys: i64,
    pub evicted_keys: i64,
    pub keyspace_hits: i64,
    pub keyspace_misses: i64,
    pub raw: BTreeMap<String, String>,
}

/// One replica entry from the `replication` section's dynamically-numbered
/// `slave0`, `slave1`, … keys (`ip=...,port=...,state=...,offset=...,lag=...`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoSlave {
    pub ip: String,
    pub port: u16,
    pub state: String,
    pub offset: i64,
    pub lag: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoReplication {
    pub role: String,
    pub connected_slaves: i64,
    pub master_repl_offset: i64,
    pub master_host: String,
    pub master_port: u16,
    pub master_link_status: String,
    pub slave_priority: i64,
    pub slave_read_only: bool,
    pub slaves: Vec<InfoSlave>,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoCpu {
    pub used_cpu_sys: f64,
    pub used_cpu_user: f64,
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoKeyspace {
    /// `db0` → `{keys, expires, avg_ttl}`.
    pub databases: BTreeMap<String, BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedisInfoAll {
    pub server: InfoServer,
    pub clients: InfoClients,
    pub memory: InfoMemory,
    pub persistence: InfoPersistence,
    pub stats: InfoStats,
    pub replication: InfoReplication,
    pub cpu: InfoCpu,
    pub keyspace: InfoKeyspace,
    /// Sections the parser doesn't model at all (e.g. `commandstats`),
    /// kept verbatim so nothing is lost.
    pub other_sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// Parse the raw `INFO` reply string into a [`RedisInfoAll`].
pub fn parse_info(raw: &str) -> RedisInfoAll {
    let mut info = RedisInfoAll::default();
    let mut current_section: Option<String> = None;

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix("# ") {
            current_section = Some(name.to_lowercase());
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(section) = current_section.as_deref() else {
            continue;
        };
        apply_field(&mut info, section, key, value);
    }

    info
}

fn apply_field(info: &mut RedisInfoAll, section: &str, key: &str, value: &str) {
    match section {
        "server" => apply_server(&mut info.server, key, value),
        "clients" => apply_clients(&mut info.clients, key, value),
        "memory" => apply_memory(&mut info.memory, key, value),
        "persistence" => apply_persistence(&mut info.persistence, key, value),
        "stats" => apply_stats(&mut info.stats, key, value),
        "replication" => apply_replication(&mut info.replication, key, value),
        "cpu" => apply_cpu(&mut info.cpu, key, value),
        "keyspace" => apply_keyspace(&mut info.keyspace, key, value),
        other => {
            info.other_sections
                .entry(other.to_owned())
                .or_default()
                .insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_server(server: &mut InfoServer, key: &str, value: &str) {
    match key {
        "redis_version" => server.redis_version = value.to_owned(),
        "redis_mode" => server.redis_mode = value.to_owned(),
        "os" => server.os = value.to_owned(),
        "process_id" => server.process_id = value.parse().unwrap_or_default(),
        "tcp_port" => server.tcp_port = value.parse().unwrap_or_default(),
        "uptime_in_seconds" => server.uptime_in_seconds = value.parse().unwrap_or_default(),
        "config_file" => server.config_file = value.to_owned(),
        _ => {
            server.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_clients(clients: &mut InfoClients, key: &str, value: &str) {
    match key {
        "connected_clients" => clients.connected_clients = value.parse().unwrap_or_default(),
        "blocked_clients" => clients.blocked_clients = value.parse().unwrap_or_default(),
        _ => {
            clients.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_memory(memory: &mut InfoMemory, key: &str, value: &str) {
    match key {
        "used_memory" => memory.used_memory = value.parse().unwrap_or_default(),
        "used_memory_human" => memory.used_memory_human = value.to_owned(),
        "used_memory_rss" => memory.used_memory_rss = value.parse().unwrap_or_default(),
        "used_memory_peak" => memory.used_memory_peak = value.parse().unwrap_or_default(),
        "mem_fragmentation_ratio" => {
            memory.mem_fragmentation_ratio = value.parse().unwrap_or_default()
        }
        "mem_allocator" => memory.mem_allocator = value.to_owned(),
        _ => {
            memory.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_persistence(persistence: &mut InfoPersistence, key: &str, value: &str) {
    match key {
        "loading" => persistence.loading = value == "1",
        "rdb_changes_since_last_save" => {
            persistence.rdb_changes_since_last_save = value.parse().unwrap_or_default()
        }
        "rdb_bgsave_in_progress" => persistence.rdb_bgsave_in_progress = value == "1",
        "rdb_last_bgsave_status" => persistence.rdb_last_bgsave_status = value.to_owned(),
        "aof_enabled" => persistence.aof_enabled = value == "1",
        "aof_rewrite_in_progress" => persistence.aof_rewrite_in_progress = value == "1",
        "aof_last_bgrewrite_status" => persistence.aof_last_bgrewrite_status = value.to_owned(),
        _ => {
            persistence.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_stats(stats: &mut InfoStats, key: &str, value: &str) {
    match key {
        "total_connections_received" => {
            stats.total_connections_received = value.parse().unwrap_or_default()
        }
        "total_commands_processed" => {
            stats.total_commands_processed = value.parse().unwrap_or_default()
        }
        "instantaneous_ops_per_sec" => {
            stats.instantaneous_ops_per_sec = value.parse().unwrap_or_default()
        }
        "expired_keys" => stats.expired_keys = value.parse().unwrap_or_default(),
        "evicted_keys" => stats.evicted_keys = value.parse().unwrap_or_default(),
        "keyspace_hits" => stats.keyspace_hits = value.parse().unwrap_or_default(),
        "keyspace_misses" => stats.keyspace_misses = value.parse().unwrap_or_default(),
        _ => {
            stats.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_replication(replication: &mut InfoReplication, key: &str, value: &str) {
    if let Some(rest) = key.strip_prefix("slave") {
        if rest.chars().all(|c| c.is_ascii_digit()) {
            replication.slaves.push(parse_slave_line(value));
            return;
        }
    }
    match key {
        "role" => replication.role = value.to_owned(),
        "connected_slaves" => replication.connected_slaves = value.parse().unwrap_or_default(),
        "master_repl_offset" => {
            replication.master_repl_offset = value.parse().unwrap_or_default()
        }
        "master_host" => replication.master_host = value.to_owned(),
        "master_port" => replication.master_port = value.parse().unwrap_or_default(),
        "master_link_status" => replication.master_link_status = value.to_owned(),
        "slave_priority" => replication.slave_priority = value.parse().unwrap_or_default(),
        "slave_read_only" => replication.slave_read_only = value == "1",
        _ => {
            replication.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

/// Parses a `slaveN` value of the form `ip=10.0.0.2,port=6379,state=online,offset=123,lag=0`.
fn parse_slave_line(value: &str) -> InfoSlave {
    let mut slave = InfoSlave::default();
    for field in value.split(',') {
        let Some((k, v)) = field.split_once('=') else {
            continue;
        };
        match k {
            "ip" => slave.ip = v.to_owned(),
            "port" => slave.port = v.parse().unwrap_or_default(),
            "state" => slave.state = v.to_owned(),
            "offset" => slave.offset = v.parse().unwrap_or_default(),
            "lag" => slave.lag = v.parse().unwrap_or_default(),
            _ => {}
        }
    }
    slave
}

fn apply_cpu(cpu: &mut InfoCpu, key: &str, value: &str) {
    match key {
        "used_cpu_sys" => cpu.used_cpu_sys = value.parse().unwrap_or_default(),
        "used_cpu_user" => cpu.used_cpu_user = value.parse().unwrap_or_default(),
        _ => {
            cpu.raw.insert(key.to_owned(), value.to_owned());
        }
    }
}

fn apply_keyspace(keyspace: &mut InfoKeyspace, key: &str, value: &str) {
    let mut fields = BTreeMap::new();
    for field in value.split(',') {
        let Some((k, v)) = field.split_once('=') else {
            continue;
        };
        fields.insert(k.to_owned(), v.parse().unwrap_or_default());
    }
    keyspace.databases.insert(key.to_owned(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Server
redis_version:7.2.4
redis_mode:standalone
os:Linux
process_id:1
tcp_port:6379
uptime_in_seconds:120
config_file:/etc/redis/redis.conf

# Clients
connected_clients:3
blocked_clients:0

# Memory
used_memory:1048576
used_memory_human:1.00M
mem_fragmentation_ratio:1.02
mem_allocator:jemalloc

# Persistence
loading:0
aof_enabled:1
rdb_last_bgsave_status:ok

# Replication
role:master
connected_slaves:2
master_repl_offset:4242
slave0:ip=10.0.0.2,port=6379,state=online,offset=4242,lag=0
slave1:ip=10.0.0.3,port=6379,state=online,offset=4200,lag=1

# CPU
used_cpu_sys:10.5
used_cpu_user:5.2

# Keyspace
db0:keys=12,expires=1,avg_ttl=0
";

    #[test]
    fn parses_server_section() {
        let info = parse_info(SAMPLE);
        assert_eq!(info.server.redis_version, "7.2.4");
        assert_eq!(info.server.uptime_in_seconds, 120);
    }

    #[test]
    fn parses_replication_slave_list() {
        let info = parse_info(SAMPLE);
        assert_eq!(info.replication.role, "master");
        assert_eq!(info.replication.slaves.len(), 2);
        assert_eq!(info.replication.slaves[0].ip, "10.0.0.2");
        assert_eq!(info.replication.slaves[1].lag, 1);
    }

    #[test]
    fn parses_memory_and_persistence() {
        let info = parse_info(SAMPLE);
        assert_eq!(info.memory.used_memory, 1_048_576);
        assert!(info.persistence.aof_enabled);
    }

    #[test]
    fn unrecognized_section_is_kept_raw() {
        let raw = "# Commandstats\ncmdstat_get:calls=5,usec=10\n";
        let info = parse_info(raw);
        assert_eq!(
            info.other_sections
                .get("commandstats")
                .and_then(|s| s.get("cmdstat_get"))
                .map(String::as_str),
            Some("calls=5,usec=10")
        );
    }

    #[test]
    fn keyspace_parses_db_counts() {
        let info = parse_info(SAMPLE);
        assert_eq!(info.keyspace.databases["db0"]["keys"], 12);
    }
}
