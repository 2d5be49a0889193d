//! Helpers for building input streams in tests and demos.

use std::fmt::Write;

/// Regions cycled through by [`sample_stream`].
const REGIONS: [&str; 3] = ["us-east", "us-west", "eu-central"];

/// Build a well-formed input stream: a cpu/mem header and
/// `points_per_host` observations per host per table, timestamps
/// strictly increasing within each host.
pub fn sample_stream(hosts: usize, points_per_host: usize) -> String {
    let mut out = String::from(
        "tags,hostname string,region string\ncpu,usage_user,usage_idle\nmem,free,used\n\n",
    );
    for p in 0..points_per_host {
        for h in 0..hosts {
            let region = REGIONS[h % REGIONS.len()];
            let ts = (p as i64) * 1_000_000_000;
            let _ = write!(
                out,
                "tags,hostname=host_{h},region={region}\ncpu,{ts},{}.0,{}.0\n",
                p % 100,
                (p + h) % 100,
            );
            let _ = write!(
                out,
                "tags,hostname=host_{h},region={region}\nmem,{ts},{}.0,{}.0\n",
                (p + 1) % 100,
                (p + h + 1) % 100,
            );
        }
    }
    out
}

/// Expected point count for [`sample_stream`] parameters.
pub fn sample_stream_points(hosts: usize, points_per_host: usize) -> u64 {
    (hosts * points_per_host * 2) as u64
}
