//! SLURM support, from srun 20.02.

use super::Family;

pub const FAMILY: Family = Family {
    names: &["srun"],
    options: OPTIONS,
    // PMI credential and spool directories srun expects to reach from every
    // rank.
    reserved_directories: &["/var/spool/slurm", "/var/spool/slurmd"],
};

const OPTIONS: &[(&str, usize)] = &[
    // Parallel run options
    ("-A", 1),
    ("-B", 1),
    ("-C", 1),
    ("-E", 0),
    ("-G", 1),
    ("-H", 0),
    ("-I", 0),
    ("-J", 1),
    ("-K", 0),
    ("-L", 1),
    ("-M", 1),
    ("-N", 1),
    ("-O", 0),
    ("-Q", 0),
    ("-S", 1),
    ("-T", 1),
    ("-V", 0),
    ("-W", 1),
    ("-X", 0),
    ("-Z", 0),
    ("-b", 1),
    ("-c", 1),
    ("-d", 1),
    ("-e", 1),
    ("-i", 1),
    ("-k", 0),
    ("-l", 0),
    ("-m", 1),
    ("-n", 1),
    ("-o", 1),
    ("-p", 1),
    ("-q", 1),
    ("-r", 1),
    ("-s", 0),
    ("-t", 1),
    ("-u", 0),
    ("-v", 0),
    ("-w", 1),
    ("-x", 1),
    ("--compress", 0),
    ("--contiguous", 0),
    ("--disable-status", 0),
    ("--exclusive", 0),
    ("--help", 0),
    ("--immediate", 0),
    ("--multi-prog", 0),
    ("--nice", 0),
    ("--no-allocate", 0),
    ("--overcommit", 0),
    ("--propagate", 0),
    ("--pty", 0),
    ("--quiet", 0),
    ("--quit-on-interrupt", 0),
    ("--reboot", 0),
    ("--resv-ports", 0),
    ("--spread-job", 0),
    ("--unbuffered", 0),
    ("--usage", 0),
    ("--use-min-nodes", 0),
    ("--verbose", 0),
    ("--version", 0),
];
