//! Share <-> word list serialization ("mnemonic" share format).
//!
//! Одно слово на байт: onset (старший полубайт) + rime (младший полубайт),
//! 32 байта доли + 1 байт контрольной суммы (первый байт SHA-256) = 33 слова.

use sha2::{Digest, Sha256};

use crate::error::{SdkError, SdkResult};

const ONSETS: [&str; 16] = [
    "b", "d", "f", "g", "h", "j", "k", "l", "m", "n", "p", "r", "s", "t", "v", "z",
];
const RIMES: [&str; 16] = [
    "ab", "ad", "ag", "al", "am", "an", "ap", "ar", "at", "ek", "el", "en", "et", "ix", "od", "up",
];

pub const SHARE_BYTES: usize = 32;
pub const WORD_COUNT: usize = SHARE_BYTES + 1;

fn word(b: u8) -> String {
    format!("{}{}", ONSETS[(b >> 4) as usize], RIMES[(b & 0x0f) as usize])
}

fn byte(w: &str) -> Option<u8> {
    if w.len() != 3 || !w.is_ascii() {
        return None;
    }
    let hi = ONSETS.iter().position(|o| *o == &w[..1])?;
    let lo = RIMES.iter().position(|r| *r == &w[1..])?;
    Some(((hi as u8) << 4) | lo as u8)
}

fn checksum(bytes: &[u8]) -> u8 {
    Sha256::digest(bytes)[0]
}

/// Space-separated words for a 32-byte share.
pub fn encode(share: &[u8; SHARE_BYTES]) -> String {
    let mut words: Vec<String> = share.iter().map(|b| word(*b)).collect();
    words.push(word(checksum(share)));
    words.join(" ")
}

pub fn decode(phrase: &str) -> SdkResult<[u8; SHARE_BYTES]> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() != WORD_COUNT {
        return Err(SdkError::Encoding(format!(
            "mnemonic must have {} words, got {}",
            WORD_COUNT,
            words.len()
        )));
    }
    let mut out = [0u8; SHARE_BYTES];
    for (i, w) in words[..SHARE_BYTES].iter().enumerate() {
        out[i] = byte(&w.to_ascii_lowercase())
            .ok_or_else(|| SdkError::Encoding(format!("unknown mnemonic word '{w}'")))?;
    }
    let sum = byte(&words[SHARE_BYTES].to_ascii_lowercase())
        .ok_or_else(|| SdkError::Encoding("unknown checksum word".into()))?;
    if sum != checksum(&out) {
        return Err(SdkError::Encoding("mnemonic checksum mismatch".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_has_a_distinct_word() {
        let mut seen = std::collections::BTreeSet::new();
        for b in 0..=255u8 {
            let w = word(b);
            assert_eq!(byte(&w), Some(b));
            assert!(seen.insert(w));
        }
    }

    #[test]
    fn checksum_catches_swapped_words() {
        let mut share = [0u8; SHARE_BYTES];
        share[0] = 1;
        share[1] = 2;
        let phrase = encode(&share);
        assert_eq!(decode(&phrase).unwrap(), share);
        let mut words: Vec<&str> = phrase.split(' ').collect();
        words.swap(0, 1);
        assert!(decode(&words.join(" ")).is_err());
    }
}
