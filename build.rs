use std::fmt::Write as _;
use std::path::PathBuf;

// Compile-time pool sizing, overridable through environment variables at
// build time, e.g. `TRICKLE_MCAST_BUFF_NUM=16 cargo build`.
static CONFIGS: &[(&str, usize)] = &[
    // Sliding-window pool: how many unique (seed, parametrization) sources
    // of simultaneous multicast traffic the node supports.
    ("WINS", 4),
    // Packet buffer pool, shared across all seeds.
    ("BUFF_NUM", 8),
    // Per-buffer capacity. IPv6 minimum link MTU.
    ("BUFF_SIZE", 1280),
    // Sequence values a single decoded ICMPv6 list entry can hold.
    ("MAX_SEQS", 8),
];

fn main() {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());

    let mut data = String::new();

    for (name, default) in CONFIGS {
        let env_name = format!("TRICKLE_MCAST_{name}");
        println!("cargo:rerun-if-env-changed={env_name}");

        let value = match std::env::var(&env_name) {
            Ok(value) => value
                .parse::<usize>()
                .unwrap_or_else(|_| panic!("{env_name} must be a positive integer.")),
            Err(_) => *default,
        };

        writeln!(data, "pub const {name}: usize = {value};").unwrap();
    }

    std::fs::write(out_dir.join("config.rs"), data).unwrap();
}
