//! Turns a derived seed into a site password that satisfies a character
//! class policy. Fully deterministic in the seed, so the same record always
//! reproduces the same password.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = br##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

/// Longest password a rule spec may ask for.
pub const MAX_LENGTH: u32 = 255;

#[derive(Debug, Eq, PartialEq)]
pub enum RuleError {
    /// A class letter other than `u`, `l`, `d`, or `s`.
    UnknownClass(char),
    /// No character classes were selected.
    NoClasses,
    /// The requested length cannot fit one character of every selected
    /// class, or exceeds [`MAX_LENGTH`].
    BadLength,
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownClass(c) => write!(f, "unknown character class {c:?}"),
            Self::NoClasses => write!(f, "no character classes selected"),
            Self::BadLength => write!(f, "invalid password length"),
        }
    }
}

impl std::error::Error for RuleError {}

/// A validated password policy: which character classes to draw from and
/// how long the result must be.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleSpec {
    classes: Vec<CharClass>,
    length: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CharClass {
    Upper,
    Lower,
    Digits,
    Symbols,
}

impl CharClass {
    fn alphabet(&self) -> &'static [u8] {
        match self {
            Self::Upper => UPPER,
            Self::Lower => LOWER,
            Self::Digits => DIGITS,
            Self::Symbols => SYMBOLS,
        }
    }
}

impl RuleSpec {
    /// Parses a class string like `"uld"` (upper, lower, digits; `s` adds
    /// symbols) plus a target length. Repeated class letters are allowed
    /// and ignored.
    pub fn parse(classes: &str, length: u32) -> Result<Self, RuleError> {
        let mut parsed = Vec::with_capacity(4);
        for c in classes.chars() {
            let class = match c {
                'u' => CharClass::Upper,
                'l' => CharClass::Lower,
                'd' => CharClass::Digits,
                's' => CharClass::Symbols,
                other => return Err(RuleError::UnknownClass(other)),
            };
            if !parsed.contains(&class) {
                parsed.push(class);
            }
        }
        if parsed.is_empty() {
            return Err(RuleError::NoClasses);
        }
        if length < parsed.len() as u32 || length > MAX_LENGTH {
            return Err(RuleError::BadLength);
        }
        Ok(Self {
            classes: parsed,
            length,
        })
    }

    /// The class string this spec was parsed from, normalized.
    pub fn classes(&self) -> String {
        self.classes
            .iter()
            .map(|class| match class {
                CharClass::Upper => 'u',
                CharClass::Lower => 'l',
                CharClass::Digits => 'd',
                CharClass::Symbols => 's',
            })
            .collect()
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Derives the password for this spec from a seed. Guarantees at least
    /// one character of every selected class.
    pub fn derive(&self, seed: &[u8; 64]) -> String {
        let mut rng = ChaCha20Rng::from_seed(seed[..32].try_into().unwrap());

        let union: Vec<u8> = self
            .classes
            .iter()
            .flat_map(|class| class.alphabet().iter().copied())
            .collect();

        let mut password = Vec::with_capacity(self.length as usize);
        for class in &self.classes {
            let alphabet = class.alphabet();
            password.push(alphabet[rng.gen_range(0..alphabet.len())]);
        }
        while password.len() < self.length as usize {
            password.push(union[rng.gen_range(0..union.len())]);
        }
        password.shuffle(&mut rng);

        String::from_utf8(password).expect("alphabets are ascii")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_unknown_classes() {
        assert_eq!(
            RuleSpec::parse("asdf", 20),
            Err(RuleError::UnknownClass('a'))
        );
    }

    #[test]
    fn test_parse_rejects_empty_classes() {
        assert_eq!(RuleSpec::parse("", 20), Err(RuleError::NoClasses));
    }

    #[test]
    fn test_parse_rejects_bad_lengths() {
        assert_eq!(RuleSpec::parse("ulsd", 3), Err(RuleError::BadLength));
        assert_eq!(RuleSpec::parse("ul", 0), Err(RuleError::BadLength));
        assert_eq!(RuleSpec::parse("ul", MAX_LENGTH + 1), Err(RuleError::BadLength));
    }

    #[test]
    fn test_parse_ignores_repeated_classes() {
        assert_eq!(
            RuleSpec::parse("uull", 10).unwrap(),
            RuleSpec::parse("ul", 10).unwrap()
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let spec = RuleSpec::parse("ulsd", 20).unwrap();
        let seed = [7u8; 64];
        assert_eq!(spec.derive(&seed), spec.derive(&seed));
    }

    #[test]
    fn test_derive_differs_by_seed() {
        let spec = RuleSpec::parse("ulsd", 20).unwrap();
        assert_ne!(spec.derive(&[1u8; 64]), spec.derive(&[2u8; 64]));
    }

    #[test]
    fn test_derive_honors_length_and_classes() {
        let spec = RuleSpec::parse("ulsd", 4).unwrap();
        let password = spec.derive(&[9u8; 64]);
        assert_eq!(password.len(), 4);
        assert!(password.bytes().any(|b| UPPER.contains(&b)));
        assert!(password.bytes().any(|b| LOWER.contains(&b)));
        assert!(password.bytes().any(|b| DIGITS.contains(&b)));
        assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn test_derive_draws_only_from_selected_classes() {
        let spec = RuleSpec::parse("d", 32).unwrap();
        let password = spec.derive(&[3u8; 64]);
        assert!(password.bytes().all(|b| DIGITS.contains(&b)));
    }
}
