//! ALPS launcher support, from aprun 6.6.

use super::Family;

pub const FAMILY: Family = Family {
    names: &["aprun"],
    options: OPTIONS,
    reserved_directories: &[],
};

const OPTIONS: &[(&str, usize)] = &[
    (":", 0),
    ("-B", 0),
    ("-C", 0),
    ("-D", 0),
    ("-E", 1),
    ("-F", 1),
    ("-L", 1),
    ("-N", 1),
    ("-P", 0),
    ("-R", 1),
    ("-S", 1),
    ("-T", 0),
    ("-Z", 1),
    ("-a", 1),
    ("-b", 0),
    ("-d", 1),
    ("-e", 1),
    ("-j", 1),
    ("-l", 1),
    ("-m", 1),
    ("-n", 1),
    ("-p", 1),
    ("-q", 0),
    ("-r", 1),
    ("-t", 1),
    ("-z", 0),
    ("--access-mode", 1),
    ("--architecture", 1),
    ("--batch-args", 0),
    ("--bypass-app-transfer", 0),
    ("--cc", 1),
    ("--cp", 1),
    ("--cpu-binding", 1),
    ("--cpu-binding-file", 1),
    ("--cpu-time-limit", 1),
    ("--cpus-per-cu", 1),
    ("--cpus-per-pe", 1),
    ("--environment-override", 1),
    ("--exclude-node-list", 1),
    ("--exclude-node-list-file", 1),
    ("--help", 0),
    ("--memory-per-pe", 1),
    ("--mpmd-env", 1),
    ("--node-list", 1),
    ("--node-list-file", 1),
    ("--p-governor", 1),
    ("--p-state", 1),
    ("--pes", 1),
    ("--pes-per-node", 1),
    ("--pes-per-numa-node", 1),
    ("--protection-domain", 1),
    ("--quiet", 0),
    ("--reconnect", 0),
    ("--relaunch", 1),
    ("--specialized-cpus", 1),
    ("--ss", 0),
    ("--strict-memory-containment", 0),
    ("--sync-output", 0),
    ("--version", 0),
    ("--wdir", 1),
    ("--zone-sort", 0),
    ("--zone-sort-secs", 1),
];
