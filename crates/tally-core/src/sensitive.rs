use std::fmt;

use zeroize::Zeroize;

/// Holds secret material (seeds, passphrases, decrypted secret values).
///
/// `Debug` and `Display` never print the value, and the value is wiped on drop.
#[derive(Clone, Eq, PartialEq)]
pub struct Sensitive<T: Zeroize>(pub T);

impl<T: Zeroize> Sensitive<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Moves the value out, leaving a default behind to be wiped.
    pub fn into_inner(mut self) -> T
    where
        T: Default,
    {
        std::mem::take(&mut self.0)
    }
}

impl<T: Zeroize> Drop for Sensitive<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
