/// Allowlist of sanctioned pandapipes callables
///
/// The allow-list is a checked-in data file regenerated offline
/// (scripts/gen_allowlist.py) rather than introspected from a live import,
/// so validator behavior is stable, testable, and diffable across library
/// releases.
use std::collections::HashSet;
use std::sync::OnceLock;

/// Name of the sanctioned domain library.
pub const LIBRARY_NAME: &str = "pandapipes";
/// Conventional two-letter import alias.
pub const LIBRARY_ALIAS: &str = "pp";
/// The only dunder attribute user code may touch.
pub const VERSION_ATTR: &str = "__version__";
/// Call that constructs the network object and may carry `fluid=`.
pub const NETWORK_CTOR: &str = "create_empty_network";

const ALLOWED_CALLS_DATA: &str = include_str!("../../data/allowed_calls.txt");

static ALLOWED_CALLS: OnceLock<HashSet<&'static str>> = OnceLock::new();

/// Read-only set of sanctioned top-level callables.
///
/// Parsed once on first use; safe for unsynchronized concurrent reads.
pub fn allowed_calls() -> &'static HashSet<&'static str> {
    ALLOWED_CALLS.get_or_init(|| {
        ALLOWED_CALLS_DATA
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    })
}

/// Whether `name` is a sanctioned library callable.
pub fn is_allowed_call(name: &str) -> bool {
    allowed_calls().contains(name)
}

/// Component kind created by a recognized constructor call, if any.
pub fn component_kind(func: &str) -> Option<&'static str> {
    Some(match func {
        "create_junction" | "create_junctions" => "junction",
        "create_pipe"
        | "create_pipes"
        | "create_pipe_from_parameters"
        | "create_pipes_from_parameters"
        | "create_pipe_from_std_type"
        | "create_pipes_from_std_type" => "pipe",
        "create_sink" | "create_sinks" => "sink",
        "create_source" | "create_sources" => "source",
        "create_ext_grid" => "ext_grid",
        "create_valve" | "create_valves" => "valve",
        "create_compressor" => "compressor",
        "create_pump" | "create_pump_from_parameters" | "create_pump_from_std_type" => "pump",
        "create_heat_exchanger" => "heat_exchanger",
        _ => return None,
    })
}
