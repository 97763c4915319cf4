use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Provably-fair draws: server_seed (secret until the round crashes) keys an
// HMAC-SHA256 over "client_seed:round_id"; the digest is cut into 4-byte
// big-endian words mapped onto [0, 1).

pub type HmacSha256 = Hmac<Sha256>;

/// Bytes of entropy behind every server seed.
pub const SERVER_SEED_BYTES: usize = 32;

/// Fresh server seed from the OS CSPRNG, hex encoded.
pub fn generate_server_seed() -> String {
    let mut bytes = [0u8; SERVER_SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of `input`, hex encoded. This is the commitment function.
pub fn derive_hash_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

pub fn derive_floats(hmac_bytes: &[u8], count: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(count);
    let mut buffer = hmac_bytes.to_vec();
    let mut i = 0usize;
    while out.len() < count {
        if i + 4 > buffer.len() {
            // stretch deterministically by hashing what we had
            buffer = Sha256::digest(&buffer).to_vec();
            i = 0;
            continue;
        }
        let v = u32::from_be_bytes([buffer[i], buffer[i + 1], buffer[i + 2], buffer[i + 3]]);
        out.push(v as f64 / (u32::MAX as f64 + 1.0));
        i += 4;
    }
    out
}

#[derive(Debug, Clone)]
pub struct ProvablyFairRng {
    pub server_seed: String, // secret
    pub client_seed: String,
    pub nonce: u64,
}

impl ProvablyFairRng {
    pub fn new(server_seed: impl Into<String>, client_seed: impl Into<String>, nonce: u64) -> Self {
        Self {
            server_seed: server_seed.into(),
            client_seed: client_seed.into(),
            nonce,
        }
    }

    pub fn server_seed_hash_hex(&self) -> String {
        derive_hash_hex(self.server_seed.as_bytes())
    }

    pub fn hmac_bytes(&self) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(self.server_seed.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}:{}", self.client_seed, self.nonce).as_bytes());
        let res = mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&res);
        out
    }

    pub fn next_floats(&self, count: usize) -> Vec<f64> {
        derive_floats(&self.hmac_bytes(), count)
    }

    /// The single uniform draw a round's crash point is sampled from.
    pub fn uniform(&self) -> f64 {
        self.next_floats(1)[0]
    }
}

/// Secret material and the uniform draw for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSeed {
    pub server_seed: String,
    pub client_seed: String,
    pub uniform: f64,
}

/// Where the engine gets each round's seed from.
pub trait SeedSource: Send {
    fn draw(&mut self, round_id: u64) -> RoundSeed;
}

/// Production source: a fresh CSPRNG server seed per round, salted with a
/// public client seed and the round id.
#[derive(Debug, Clone)]
pub struct HmacSeedSource {
    client_seed: String,
}

impl HmacSeedSource {
    pub fn new(client_seed: impl Into<String>) -> Self {
        Self {
            client_seed: client_seed.into(),
        }
    }

    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }
}

impl SeedSource for HmacSeedSource {
    fn draw(&mut self, round_id: u64) -> RoundSeed {
        let server_seed = generate_server_seed();
        let uniform = ProvablyFairRng::new(server_seed.as_str(), self.client_seed.as_str(), round_id).uniform();
        RoundSeed {
            server_seed,
            client_seed: self.client_seed.clone(),
            uniform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let rng1 = ProvablyFairRng::new("server", "client", 1);
        let rng2 = ProvablyFairRng::new("server", "client", 1);
        assert_eq!(rng1.server_seed_hash_hex(), rng2.server_seed_hash_hex());
        assert_eq!(rng1.hmac_bytes().to_vec(), rng2.hmac_bytes().to_vec());
        assert_eq!(rng1.next_floats(5), rng2.next_floats(5));
    }

    #[test]
    fn nonce_changes_draw() {
        let a = ProvablyFairRng::new("server", "client", 1).uniform();
        let b = ProvablyFairRng::new("server", "client", 2).uniform();
        assert_ne!(a, b);
    }

    #[test]
    fn floats_stay_in_unit_interval_past_one_digest() {
        let floats = ProvablyFairRng::new("s", "c", 9).next_floats(20);
        assert_eq!(floats.len(), 20);
        assert!(floats.iter().all(|f| (0.0..1.0).contains(f)));
    }

    #[test]
    fn big_endian_words_map_to_unit_interval() {
        let half = [0x80, 0, 0, 0];
        assert_eq!(derive_floats(&half, 1), vec![0.5]);
        assert_eq!(derive_floats(&[0, 0, 0, 0], 1), vec![0.0]);
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            derive_hash_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn generated_seeds_are_fresh_hex() {
        let a = generate_server_seed();
        let b = generate_server_seed();
        assert_eq!(a.len(), SERVER_SEED_BYTES * 2);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn hmac_source_draw_is_reproducible_from_revealed_seed() {
        let mut source = HmacSeedSource::new("public-salt");
        let seed = source.draw(17);
        assert_eq!(seed.client_seed, "public-salt");
        let again = ProvablyFairRng::new(seed.server_seed.as_str(), "public-salt", 17).uniform();
        assert_eq!(seed.uniform, again);
    }
}
