//! Random hex-token name generation for projects and jails.
//!
//! Kept out of the core proper (spec §1): it's a free function the
//! reconciler and project call directly when no explicit name is given.

use rand::RngCore;

/// Number of random bytes backing a generated name, hex-encoded to 10
/// characters — wide enough to make collisions practically impossible for
/// one invocation while staying short enough to read in logs.
const TOKEN_BYTES: usize = 5;

/// Generate a hex token that is not purely numeric (appjail/jail names are
/// frequently used in places that would otherwise coerce an all-digit
/// string to a number).
pub fn generate() -> String {
    loop {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        if !token.chars().all(|c| c.is_ascii_digit()) {
            return token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_non_numeric_hex_token() {
        for _ in 0..100 {
            let name = generate();
            assert_eq!(name.len(), TOKEN_BYTES * 2);
            assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(!name.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
