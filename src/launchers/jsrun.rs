//! LSF/jsrun launcher support (Summit-class systems).

use super::Family;

pub const FAMILY: Family = Family {
    names: &["jsrun"],
    options: OPTIONS,
    reserved_directories: &[],
};

const OPTIONS: &[(&str, usize)] = &[
    ("-A", 1),
    ("-D", 1),
    ("-E", 1),
    ("-F", 1),
    ("-H", 1),
    ("-I", 1),
    ("-J", 1),
    ("-K", 1),
    ("-L", 1),
    ("-M", 1),
    ("-P", 1),
    ("-S", 1),
    ("-U", 1),
    ("-V", 0),
    ("-X", 1),
    ("-Z", 1),
    ("-a", 1),
    ("-b", 1),
    ("-c", 1),
    ("-d", 1),
    ("-e", 1),
    ("-f", 1),
    ("-g", 1),
    ("-h", 1),
    ("-i", 0),
    ("-k", 1),
    ("-l", 1),
    ("-m", 1),
    ("-n", 1),
    ("-o", 1),
    ("-p", 1),
    ("-r", 1),
    ("-t", 1),
    ("-x", 1),
    ("-?", 0),
    ("--help", 0),
    ("--immediate", 0),
    ("--usage", 0),
    ("--version", 0),
];
