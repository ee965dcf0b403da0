//! One-time codes for privileged commands
//!
//! Admin command sequences carry a numeric one-time code which must
//! be present in a pool of unused codes on disk. A code is removed
//! from the pool the moment it validates, so it can never authorize
//! a second dispatch.
//!
//! The pool is a plain text file: one code per line, sorted and
//! deduplicated, no header. These codes are a basic guard against
//! casual misuse by unauthorized operators, not a hardened
//! credential system, and the plain file format reflects that. All
//! mutation goes through [`OtpStore`], which rewrites the whole file
//! under the process's single-writer discipline.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

#[cfg(not(test))]
use log::{debug, info};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

/// Length of every one-time code, in digits
///
/// The admin matcher carves this many characters out of a candidate
/// sequence, and the generator emits codes of exactly this length.
/// Both sides share this one definition.
pub const OTP_LENGTH: usize = 4;

/// Number of unused codes the pool is topped up to
pub const DEFAULT_POOL_SIZE: usize = 100;

/// The on-disk pool of unused one-time codes
///
/// ```no_run
/// use dtmfrx::OtpStore;
///
/// let store = OtpStore::new("/var/lib/dtmfbridge/otps.txt");
/// let (all, fresh) = store.generate_pool().unwrap();
/// assert_eq!(100, all.len());
/// println!("{} newly generated codes", fresh.len());
/// ```
#[derive(Clone, Debug)]
pub struct OtpStore {
    path: PathBuf,
    target_count: usize,
}

impl OtpStore {
    /// Store backed by the pool file at `path`
    ///
    /// The file does not need to exist yet; an absent file is an
    /// empty pool.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            target_count: DEFAULT_POOL_SIZE,
        }
    }

    /// Set the number of unused codes to keep on hand
    pub fn with_target_count(mut self, target_count: usize) -> Self {
        self.target_count = target_count;
        self
    }

    /// Path of the pool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All codes which are still valid (unused), sorted
    pub fn valid_codes(&self) -> io::Result<BTreeSet<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(err),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Top the pool up to its target count
    ///
    /// Existing unused codes are kept. Enough new codes are
    /// generated to reach the target count, the merged pool is
    /// written back, and both the full pool and the newly generated
    /// subset are returned. Calling this twice without consuming any
    /// codes is a no-op the second time.
    pub fn generate_pool(&self) -> io::Result<(BTreeSet<String>, BTreeSet<String>)> {
        let existing = self.valid_codes()?;
        if !existing.is_empty() {
            debug!("re-using {} existing unused codes from disk", existing.len());
        }

        let needed = self.target_count.saturating_sub(existing.len());
        debug!("generating {} new codes", needed);

        let mut rng = rand::rng();
        let mut fresh = BTreeSet::new();
        while fresh.len() < needed {
            let code = random_code(&mut rng);
            if !existing.contains(&code) {
                fresh.insert(code);
            }
        }

        let mut all = existing;
        all.extend(fresh.iter().cloned());
        self.persist(&all)?;

        Ok((all, fresh))
    }

    /// Validate a code, revoking it on success
    ///
    /// Returns true and removes `code` from the pool if it was
    /// present. Returns false, without touching the pool, otherwise.
    /// A code can therefore validate at most once.
    pub fn validate(&self, code: &str) -> io::Result<bool> {
        let mut codes = self.valid_codes()?;

        if codes.remove(code) {
            self.persist(&codes)?;
            info!("OTP {} has been successfully validated and revoked", mask(code));
            Ok(true)
        } else {
            info!("OTP {} is not valid", mask(code));
            Ok(false)
        }
    }

    // Overwrite the pool file with the given codes
    fn persist(&self, codes: &BTreeSet<String>) -> io::Result<()> {
        let mut content = codes.iter().cloned().collect::<Vec<String>>().join("\n");
        content.push('\n');
        std::fs::write(&self.path, content)
    }
}

// Mask a code down to its first two digits for logging
fn mask(code: &str) -> String {
    code.chars()
        .enumerate()
        .map(|(i, chr)| if i < 2 { chr } else { '*' })
        .collect()
}

// One candidate code via rejection sampling
//
// Rejected outright: a leading zero, and any digit equal to its left
// neighbor (a repeated digit reads as a single held key once the
// receive loop debounces it).
fn random_code<R: Rng>(rng: &mut R) -> String {
    loop {
        let digits: Vec<u8> = (0..OTP_LENGTH).map(|_| rng.random_range(0..=9u8)).collect();

        let leading_zero = digits[0] == 0;
        let adjacent_repeat = digits.windows(2).any(|pair| pair[0] == pair[1]);
        if leading_zero || adjacent_repeat {
            continue;
        }

        return digits.iter().map(|d| char::from(b'0' + d)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, OtpStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = OtpStore::new(dir.path().join("otps.txt"));
        (dir, store)
    }

    #[test]
    fn test_random_code_shape() {
        let mut rng = rand::rng();

        for _i in 0..200 {
            let code = random_code(&mut rng);
            let digits: Vec<char> = code.chars().collect();

            assert_eq!(OTP_LENGTH, digits.len());
            assert!(digits.iter().all(char::is_ascii_digit));
            assert_ne!('0', digits[0]);
            assert!(digits.windows(2).all(|pair| pair[0] != pair[1]));
        }
    }

    #[test]
    fn test_mask() {
        assert_eq!("12**", mask("1234"));
        assert_eq!("98**", mask("9876"));
    }

    #[test]
    fn test_generate_pool_tops_up() {
        let (_dir, store) = temp_store();
        let store = store.with_target_count(100);

        let (all, fresh) = store.generate_pool().unwrap();
        assert_eq!(100, all.len());
        assert_eq!(100, fresh.len());

        // idempotent without consumption
        let (again, fresh) = store.generate_pool().unwrap();
        assert_eq!(all, again);
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_generate_pool_replaces_consumed_codes() {
        let (_dir, store) = temp_store();
        let store = store.with_target_count(10);

        let (all, _) = store.generate_pool().unwrap();
        let spent = all.iter().next().unwrap().clone();
        assert!(store.validate(&spent).unwrap());

        let (topped, fresh) = store.generate_pool().unwrap();
        assert_eq!(10, topped.len());
        assert_eq!(1, fresh.len());
        assert!(!topped.contains(&spent) || fresh.contains(&spent));
    }

    #[test]
    fn test_validate_is_single_use() {
        let (_dir, store) = temp_store();
        let store = store.with_target_count(5);

        let (all, _) = store.generate_pool().unwrap();
        let code = all.iter().next().unwrap().clone();

        assert!(store.validate(&code).unwrap());
        assert!(!store.validate(&code).unwrap());
        assert_eq!(4, store.valid_codes().unwrap().len());
    }

    #[test]
    fn test_validate_unknown_code() {
        let (_dir, store) = temp_store();
        let store = store.with_target_count(5);
        store.generate_pool().unwrap();

        let before = store.valid_codes().unwrap();
        assert!(!store.validate("0000").unwrap());
        assert_eq!(before, store.valid_codes().unwrap());
    }

    #[test]
    fn test_missing_file_is_an_empty_pool() {
        let (_dir, store) = temp_store();
        assert!(store.valid_codes().unwrap().is_empty());
    }
}
