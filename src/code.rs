//! One-time confirmation codes sent by email.

use rand::{Rng, rngs::OsRng};

use crate::user::User;

const CODE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// Issue and check 6-digit confirmation codes.
///
/// Codes live on the [`User`] record. Issuing overwrites any pending code so
/// only the latest one is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeIssuer;

impl CodeIssuer {
    /// Attach a fresh code to `user` and return it for dispatch.
    pub fn issue(&self, user: &mut User) -> String {
        let code = OsRng.gen_range(CODE_RANGE).to_string();
        user.confirmation_code = Some(code.clone());
        code
    }

    /// Compare `submitted` with the pending code. Never clears it.
    pub fn check(&self, user: &User, submitted: &str) -> bool {
        user.confirmation_code.as_deref() == Some(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_code() {
        let mut user = User::default();
        let code = CodeIssuer.issue(&mut user);

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(CODE_RANGE.contains(&code.parse::<u32>().unwrap()));
        assert_eq!(user.confirmation_code.as_deref(), Some(code.as_str()));
    }

    #[test]
    fn test_latest_code_wins() {
        let mut user = User::default();
        let first = CodeIssuer.issue(&mut user);
        let mut second = CodeIssuer.issue(&mut user);
        while second == first {
            second = CodeIssuer.issue(&mut user);
        }

        assert!(!CodeIssuer.check(&user, &first));
        assert!(CodeIssuer.check(&user, &second));
        // Checking does not consume.
        assert!(CodeIssuer.check(&user, &second));
    }

    #[test]
    fn test_check_without_code() {
        let user = User::default();

        assert!(!CodeIssuer.check(&user, ""));
        assert!(!CodeIssuer.check(&user, "123456"));
    }
}
