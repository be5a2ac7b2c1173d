//! Temporary credentials for provisioned accounts.
//!
//! Passwords are stored as `sha256$<salt>$<hex>`. The cleartext temporary
//! password is returned exactly once from the provisioning call, together
//! with a forced-change flag on the account.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 8-character temporary password from UUID entropy.
pub fn generate_temp_password() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..8].to_string()
}

pub fn hash_password(cleartext: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = salted_digest(&salt, cleartext);
    format!("sha256${}${}", salt, digest)
}

fn salted_digest(salt: &str, cleartext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(cleartext.as_bytes());
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_passwords_are_eight_chars_and_unique() {
        let a = generate_temp_password();
        let b = generate_temp_password();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn hashes_are_salted() {
        let h1 = hash_password("secret");
        let h2 = hash_password("secret");
        assert!(h1.starts_with("sha256$"));
        assert_ne!(h1, h2);
        let parts: Vec<&str> = h1.split('$').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 64);
        // Same salt, same cleartext must reproduce the digest.
        assert_eq!(salted_digest(parts[1], "secret"), parts[2]);
        assert_ne!(salted_digest(parts[1], "other"), parts[2]);
    }
}
