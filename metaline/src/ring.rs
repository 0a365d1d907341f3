//! Ketama consistent hash ring.
//!
//! Compatible with the widely deployed ketama scheme: each server
//! contributes 160 points derived from MD5 digests of `"{identity}-{i}"`,
//! and a key maps to the server owning the first point at or after
//! MD5(routing token), wrapping around. For a fixed server set the mapping
//! is a pure function of the routing token, and adding or removing a server
//! remaps only ~1/N of keys.

mod md5;

use crate::config::ServerAddress;

/// Points contributed by each server.
const POINTS_PER_SERVER: usize = 160;
/// Each MD5 digest yields four 32-bit points.
const POINTS_PER_DIGEST: usize = 4;

/// Immutable consistent hash ring over a server set.
///
/// Lookups are lock-free; the ring is rebuilt, never mutated.
#[derive(Clone, Debug)]
pub(crate) struct Ring {
    /// Sorted (hash point, server index) pairs.
    points: Box<[(u32, u16)]>,
    server_count: u16,
}

impl Ring {
    /// Build a ring from the servers' string identities.
    ///
    /// # Panics
    ///
    /// Panics if `servers` is empty.
    pub fn build(servers: &[ServerAddress]) -> Self {
        assert!(!servers.is_empty(), "ring requires at least one server");

        let mut points = Vec::with_capacity(servers.len() * POINTS_PER_SERVER);
        for (index, server) in servers.iter().enumerate() {
            let identity = server.to_string();
            for i in 0..POINTS_PER_SERVER / POINTS_PER_DIGEST {
                let digest = md5::digest(format!("{identity}-{i}").as_bytes());
                for chunk in digest.chunks_exact(4) {
                    let point = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    points.push((point, index as u16));
                }
            }
        }
        points.sort_unstable();

        Ring {
            points: points.into_boxed_slice(),
            server_count: servers.len() as u16,
        }
    }

    /// Map a routing token to a server index in `0..server_count`.
    #[inline]
    pub fn route(&self, routing_token: &[u8]) -> usize {
        if self.server_count <= 1 {
            return 0;
        }
        let digest = md5::digest(routing_token);
        let hash = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let idx = self.points.partition_point(|&(point, _)| point < hash);
        let idx = if idx == self.points.len() { 0 } else { idx };
        self.points[idx].1 as usize
    }

    #[cfg(test)]
    fn point_count(&self) -> usize {
        self.points.len()
    }
}
