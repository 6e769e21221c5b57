//! Human-readable verification codes printed on stamped documents.
//!
//! Codes look like `DOC-2026-7QK2ZB`. The random tail is drawn from the OS
//! CSPRNG over `[A-Z0-9]`, so a single year holds 36^6 (about 2.2e9) codes.
//! Uniqueness is not guaranteed by the generator itself; callers check every
//! candidate against durable storage and loop until one is free.
use rand::Rng;
use rand::rngs::OsRng;
use std::fmt;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts a code typed in by a verifier. Surrounding whitespace and
    /// lowercase are tolerated.
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let mut parts = code.splitn(3, '-');
        let (prefix, year, suffix) = (parts.next()?, parts.next()?, parts.next()?);

        let prefix_ok = !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_alphanumeric());
        let year_ok = year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit());
        let suffix_ok = suffix.len() == SUFFIX_LEN && suffix.bytes().all(|b| ALPHABET.contains(&b));

        (prefix_ok && year_ok && suffix_ok).then_some(Self(code))
    }
}

impl fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<C> minicbor::Encode<C> for VerificationCode {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for VerificationCode {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Self(d.str()?.to_owned()))
    }
}

#[derive(Debug, Clone)]
pub struct VerificationCodeGenerator {
    prefix: String,
}

impl VerificationCodeGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_ascii_uppercase(),
        }
    }

    pub fn generate(&self, year: i32) -> VerificationCode {
        let mut rng = OsRng;
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();

        VerificationCode(format!("{}-{:04}-{}", self.prefix, year, suffix))
    }

    /// Generates candidates until `is_taken` reports a free one, giving up
    /// with `None` after `max_attempts`.
    ///
    /// A collision is never accepted. The checker decides what "taken"
    /// means, normally a lookup in the durable code index inside the
    /// creating transaction.
    pub fn generate_unique<F, E>(
        &self,
        year: i32,
        max_attempts: u32,
        mut is_taken: F,
    ) -> Result<Option<VerificationCode>, E>
    where
        F: FnMut(&VerificationCode) -> Result<bool, E>,
    {
        for _ in 0..max_attempts {
            let candidate = self.generate(year);
            if !is_taken(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl Default for VerificationCodeGenerator {
    fn default() -> Self {
        Self::new("DOC")
    }
}
