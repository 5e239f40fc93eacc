use sha2::{Digest, Sha256};

/// Deterministic partition assignment: first four bytes of
/// `SHA256(node_id|trace_id|source)` interpreted big-endian, mod the
/// partition count. Retries of the same business key land on the same
/// partition, preserving per-partition ordering.
pub fn partition_for(node_id: &str, trace_id: &str, source: &str, partition_count: u32) -> u32 {
    let key = format!("{}|{}|{}", node_id, trace_id, source);
    let digest = Sha256::digest(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % partition_count.max(1)
}
