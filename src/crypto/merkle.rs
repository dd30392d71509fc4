//! Merkle root computation for block transaction lists
//!
//! Verification is full recomputation: rebuild the root from the
//! transaction list and compare it with the stored one.

use super::hash::sha256_hex;

/// Calculate the merkle root from a list of hex-encoded leaf digests.
///
/// Adjacent digests are concatenated as hex text and hashed; an odd level
/// duplicates its last digest.
pub fn calculate_merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return sha256_hex(b"");
    }

    let mut current_level: Vec<String> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for chunk in current_level.chunks(2) {
            let right = chunk.get(1).unwrap_or(&chunk[0]);
            let mut combined = String::with_capacity(chunk[0].len() + right.len());
            combined.push_str(&chunk[0]);
            combined.push_str(right);
            next_level.push(sha256_hex(combined.as_bytes()));
        }

        current_level = next_level;
    }

    current_level.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merkle_root_single() {
        let leaves = vec![sha256_hex(b"tx1")];
        assert_eq!(calculate_merkle_root(&leaves), leaves[0]);
    }

    #[test]
    fn test_merkle_root_two() {
        let h1 = sha256_hex(b"tx1");
        let h2 = sha256_hex(b"tx2");
        let root = calculate_merkle_root(&[h1.clone(), h2.clone()]);
        assert_eq!(root, sha256_hex(format!("{}{}", h1, h2).as_bytes()));
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let h1 = sha256_hex(b"tx1");
        let h2 = sha256_hex(b"tx2");
        let h3 = sha256_hex(b"tx3");
        let odd = calculate_merkle_root(&[h1.clone(), h2.clone(), h3.clone()]);
        let padded = calculate_merkle_root(&[h1, h2, h3.clone(), h3]);
        assert_eq!(odd, padded);
    }

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(calculate_merkle_root(&[]), sha256_hex(b""));
    }
}
