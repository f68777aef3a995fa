//! Boarding codes: generation, parsing and slow salted hashing.

use rand::{rngs::OsRng, Rng};
use relay_shared::Masked;

use crate::{CoreError, CoreResult};

pub const OTP_DIGITS: usize = 6;
const OTP_SPACE: u32 = 1_000_000;

/// bcrypt accepts costs in this range.
const MIN_HASH_COST: u32 = 4;
const MAX_HASH_COST: u32 = 31;

/// Uniformly random, zero-padded six-digit code.
pub fn generate_code() -> Masked<String> {
    let n: u32 = OsRng.gen_range(0..OTP_SPACE);
    Masked(format!("{:0width$}", n, width = OTP_DIGITS))
}

/// Accepts exactly six ASCII digits, ignoring surrounding whitespace.
pub fn parse_code(raw: &str) -> CoreResult<Masked<String>> {
    let code = raw.trim();
    if code.len() != OTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::validation("code must be 6 digits"));
    }
    Ok(Masked(code.to_string()))
}

/// bcrypt hashing run on the blocking pool so the async workers never stall
/// on the key schedule.
#[derive(Debug, Clone, Copy)]
pub struct OtpHasher {
    cost: u32,
}

impl Default for OtpHasher {
    fn default() -> Self {
        Self { cost: bcrypt::DEFAULT_COST }
    }
}

impl OtpHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost: cost.clamp(MIN_HASH_COST, MAX_HASH_COST) }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub async fn hash(&self, code: &Masked<String>) -> CoreResult<String> {
        let plain = code.expose().clone();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
            .await
            .map_err(|e| CoreError::InternalError(format!("hashing task failed: {}", e)))?
            .map_err(|e| CoreError::InternalError(format!("otp hashing failed: {}", e)))
    }

    pub async fn verify(&self, code: &Masked<String>, hash: &str) -> CoreResult<bool> {
        let plain = code.expose().clone();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
            .await
            .map_err(|e| CoreError::InternalError(format!("verification task failed: {}", e)))?
            .map_err(|e| CoreError::InternalError(format!("stored otp hash unreadable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.expose().len(), 6);
            assert!(parse_code(code.expose()).is_ok());
        }
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code(" 004211 ").unwrap().into_inner(), "004211");
        assert!(parse_code("12345").is_err());
        assert!(parse_code("1234567").is_err());
        assert!(parse_code("12a456").is_err());
        assert!(parse_code("１２３４５６").is_err());
    }

    #[tokio::test]
    async fn test_hash_round_trip() {
        let hasher = OtpHasher::new(4);
        let code = Masked("381920".to_string());
        let hash = hasher.hash(&code).await.unwrap();

        assert!(!hash.contains("381920"));
        assert!(hasher.verify(&code, &hash).await.unwrap());
        assert!(!hasher.verify(&Masked("381921".to_string()), &hash).await.unwrap());
    }

    #[test]
    fn test_cost_is_clamped() {
        assert_eq!(OtpHasher::new(1).cost(), 4);
        assert_eq!(OtpHasher::new(12).cost(), 12);
    }
}
