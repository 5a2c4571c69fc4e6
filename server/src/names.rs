//! Player names: validation, op/whitelist files and name verification.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::io;
use std::path::Path;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 16;
pub const SALT_LENGTH: usize = 32;

/// 2 to 16 characters of ASCII letters, digits, `_` or `.`.
pub fn is_valid_name(name: &str) -> bool {
    (MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Random alphanumeric salt shared with the directory service.
pub fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect()
}

/// The key a verified client sends: `md5(salt + name)` as lowercase hex.
pub fn verification_key(salt: &str, name: &str) -> String {
    let digest = Md5::digest(format!("{}{}", salt, name).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Checks a client's verification key. The key is left-padded with zeros to
/// 32 digits and compared without regard to case.
pub fn verify_name(salt: &str, name: &str, key: &str) -> bool {
    let padded = format!("{:0>32}", key);
    verification_key(salt, name).eq_ignore_ascii_case(&padded)
}

/// Case-insensitive set of player names, one per line in its file.
#[derive(Debug, Default)]
pub struct NameList {
    names: RwLock<HashSet<String>>,
}

impl NameList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::new();
        for name in names {
            list.add(name.as_ref());
        }
        list
    }

    /// Reads a list file. A missing file yields an empty list.
    pub fn load(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::from_names(
                text.lines().map(str::trim).filter(|line| !line.is_empty()),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().contains(&name.to_ascii_lowercase())
    }

    /// Returns `false` if the name was already present.
    pub fn add(&self, name: &str) -> bool {
        self.names.write().insert(name.to_ascii_lowercase())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.names.write().remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("Notch"));
        assert!(is_valid_name("a_b.c"));
        assert!(is_valid_name("ab"));
        assert!(is_valid_name("sixteen_chars_xx"));
        assert!(!is_valid_name("a"));
        assert!(!is_valid_name("seventeen_chars_x"));
        assert!(!is_valid_name("bad name"));
        assert!(!is_valid_name("bad&name"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_salt_shape() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_LENGTH);
        assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(salt, generate_salt());
    }

    #[test]
    fn test_verify_name() {
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert!(verify_name("a", "bc", "900150983cd24fb0d6963f7d28e17f72"));
        assert!(verify_name("ab", "c", "900150983CD24FB0D6963F7D28E17F72"));
        assert!(!verify_name("a", "bd", "900150983cd24fb0d6963f7d28e17f72"));
        assert!(!verify_name("a", "bc", ""));
    }

    #[test]
    fn test_short_keys_are_zero_padded() {
        // find a name whose digest starts with a zero nibble
        let name = (0..10_000)
            .map(|i| format!("p{}", i))
            .find(|name| {
                let digest = Md5::digest(format!("s{}", name).as_bytes());
                digest[0] < 0x10
            })
            .unwrap();
        let digest = Md5::digest(format!("s{}", name).as_bytes());
        let full: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let trimmed = full.trim_start_matches('0');
        assert!(verify_name("s", &name, trimmed));
    }

    #[test]
    fn test_name_list_is_case_insensitive() {
        let list = NameList::from_names(["Alice", "bob"]);
        assert!(list.contains("alice"));
        assert!(list.contains("BOB"));
        assert!(!list.contains("carol"));
        assert!(!list.add("ALICE"));
        assert!(list.remove("Bob"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_missing_list_file_is_empty() {
        let list = NameList::load(Path::new("/no/such/ops.txt")).unwrap();
        assert!(list.is_empty());
    }
}
