use std::path::{Path, PathBuf};

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::models::HashType;

pub const JOBS_DIR: &str = "jobs";
/// Reservation marker holding the literal job id.
pub const JID_FILE: &str = "jid";
pub const NOCACHE_FILE: &str = "nocache";
pub const LOAD_P: &str = ".load.p";
pub const MINIONS_P: &str = ".minions.p";
pub const ENDTIME_FILE: &str = "endtime";
pub const RETURN_P: &str = "return.p";
pub const OUT_P: &str = "out.p";

const SHARD_LEN: usize = 2;

impl HashType {
    pub fn hex_digest(&self, data: &[u8]) -> String {
        match self {
            HashType::Sha224 => hex::encode(Sha224::digest(data)),
            HashType::Sha256 => hex::encode(Sha256::digest(data)),
            HashType::Sha384 => hex::encode(Sha384::digest(data)),
            HashType::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

/// Maps job ids onto `<root>/jobs/<shard>/<leaf>`.
#[derive(Debug, Clone)]
pub struct JidIndex {
    jobs_root: PathBuf,
    hash_type: HashType,
}

impl JidIndex {
    pub fn new(cachedir: &Path, hash_type: HashType) -> Self {
        Self {
            jobs_root: cachedir.join(JOBS_DIR),
            hash_type,
        }
    }

    pub fn jobs_root(&self) -> &Path {
        &self.jobs_root
    }

    /// Directory for a job id. Pure: depends only on the id and digest.
    pub fn jid_dir(&self, jid: &str) -> PathBuf {
        let digest = self.hash_type.hex_digest(jid.as_bytes());
        let (shard, leaf) = digest.split_at(SHARD_LEN);
        self.jobs_root.join(shard).join(leaf)
    }

    pub fn worker_dir(&self, jid: &str, worker: &str) -> PathBuf {
        self.jid_dir(jid).join(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_dir_layout() {
        let index = JidIndex::new(Path::new("/cache"), HashType::Sha256);
        let digest = HashType::Sha256.hex_digest(b"20261014090102000123");
        let expected = PathBuf::from("/cache/jobs")
            .join(&digest[..2])
            .join(&digest[2..]);
        assert_eq!(index.jid_dir("20261014090102000123"), expected);
    }

    #[test]
    fn test_jid_dir_is_deterministic() {
        let a = JidIndex::new(Path::new("/cache"), HashType::Sha512);
        let b = JidIndex::new(Path::new("/cache"), HashType::Sha512);
        assert_eq!(a.jid_dir("job-1"), b.jid_dir("job-1"));
        assert_ne!(a.jid_dir("job-1"), a.jid_dir("job-2"));
    }

    #[test]
    fn test_hash_type_changes_path() {
        let sha256 = JidIndex::new(Path::new("/cache"), HashType::Sha256);
        let sha384 = JidIndex::new(Path::new("/cache"), HashType::Sha384);
        assert_ne!(sha256.jid_dir("job-1"), sha384.jid_dir("job-1"));
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(HashType::Sha224.hex_digest(b"x").len(), 56);
        assert_eq!(HashType::Sha256.hex_digest(b"x").len(), 64);
        assert_eq!(HashType::Sha384.hex_digest(b"x").len(), 96);
        assert_eq!(HashType::Sha512.hex_digest(b"x").len(), 128);
    }

    #[test]
    fn test_known_sha256_digest() {
        assert_eq!(
            HashType::Sha256.hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let index = JidIndex::new(Path::new("/c"), HashType::Sha256);
        assert_eq!(
            index.jid_dir("abc"),
            PathBuf::from("/c/jobs/ba/7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_worker_dir_nested_under_jid_dir() {
        let index = JidIndex::new(Path::new("/cache"), HashType::Sha256);
        assert_eq!(index.worker_dir("j", "w1"), index.jid_dir("j").join("w1"));
    }
}
