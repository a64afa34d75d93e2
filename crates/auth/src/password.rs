//! Password hashing (bcrypt).

pub use bcrypt::DEFAULT_COST;

/// Hash a plaintext password for storage.
pub fn hash_password(plain: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plain, cost)
}

/// Compare a plaintext password with a stored hash.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_only_the_hashed_password() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }
}
