//! Order-preserving rank code.
//!
//! A dictionary owns a sorted alphabet of up to `MAX_DICTIONARY_ALPHABET`
//! frequent bytes. Every input byte emits one fixed-width code:
//!
//! ```text
//! alphabet:  s0      s1      s2
//! codes:   0  1   2  3   4  5   6
//!          │  │   │  │   │  │   └─ gap: byte > s2, followed by 8 raw bits
//!          │  │   │  └───┼──┴──── alphabet bytes are odd codes
//!          │  │   └──────┴─────── gaps between alphabet bytes
//!          │  └── s0
//!          └── gap: byte < s0, followed by 8 raw bits
//! ```
//!
//! Codes follow byte order, and bytes sharing a gap code are told apart by
//! their raw bits, so the MSB-first bit string compares like the input.
//! With an empty alphabet the code width is zero and every byte is written
//! raw, which is the identity encoding.

use eyre::{bail, ensure, eyre, Result};

use super::DictionaryId;
use crate::config::MAX_DICTIONARY_ALPHABET;

#[derive(Clone, PartialEq, Eq)]
pub struct Dictionary {
    id: DictionaryId,
    alphabet: Vec<u8>,
    codes: [u16; 256],
    width: u32,
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("id", &self.id)
            .field("alphabet", &self.alphabet.len())
            .field("width", &self.width)
            .finish()
    }
}

fn code_width(alphabet_len: usize) -> u32 {
    if alphabet_len == 0 {
        0
    } else {
        u32::BITS - ((2 * alphabet_len) as u32).leading_zeros()
    }
}

impl Dictionary {
    /// Builds a dictionary from a strictly increasing alphabet.
    pub fn new(id: DictionaryId, alphabet: &[u8]) -> Result<Self> {
        ensure!(
            alphabet.len() <= MAX_DICTIONARY_ALPHABET,
            "alphabet of {} symbols exceeds maximum of {}",
            alphabet.len(),
            MAX_DICTIONARY_ALPHABET
        );
        ensure!(
            alphabet.windows(2).all(|w| w[0] < w[1]),
            "dictionary alphabet must be strictly increasing"
        );

        let mut codes = [0u16; 256];
        for (byte, code) in codes.iter_mut().enumerate() {
            let rank = alphabet.partition_point(|&a| (a as usize) < byte);
            let member = alphabet.get(rank).is_some_and(|&a| a as usize == byte);
            *code = (2 * rank + usize::from(member)) as u16;
        }

        Ok(Self {
            id,
            alphabet: alphabet.to_vec(),
            codes,
            width: code_width(alphabet.len()),
        })
    }

    pub fn identity(id: DictionaryId) -> Self {
        Self {
            id,
            alphabet: Vec::new(),
            codes: [0u16; 256],
            width: 0,
        }
    }

    /// Picks the alphabet that minimizes the total encoded size of
    /// `samples`. Falls back to the identity encoding when nothing helps.
    pub fn train(id: DictionaryId, samples: &[&[u8]]) -> Result<Self> {
        let mut frequency = [0u64; 256];
        let mut total = 0u64;
        for sample in samples {
            for &b in sample.iter() {
                frequency[b as usize] += 1;
            }
            total += sample.len() as u64;
        }

        let mut candidates: Vec<u8> = (0..=255u8).filter(|&b| frequency[b as usize] > 0).collect();
        candidates.sort_by(|&a, &b| {
            frequency[b as usize]
                .cmp(&frequency[a as usize])
                .then(a.cmp(&b))
        });

        let mut best_len = 0;
        let mut best_cost = total * 8;
        let mut covered = 0u64;
        for (i, &b) in candidates.iter().take(MAX_DICTIONARY_ALPHABET).enumerate() {
            covered += frequency[b as usize];
            let len = i + 1;
            let cost = total * code_width(len) as u64 + (total - covered) * 8;
            if cost < best_cost {
                best_cost = cost;
                best_len = len;
            }
        }

        let mut alphabet = candidates[..best_len].to_vec();
        alphabet.sort_unstable();
        Self::new(id, &alphabet)
    }

    pub fn id(&self) -> DictionaryId {
        self.id
    }

    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// Width of one code in bits.
    pub fn code_width(&self) -> u32 {
        self.width
    }

    pub fn is_identity(&self) -> bool {
        self.alphabet.is_empty()
    }

    /// Upper bound on the encoded size, in bytes, of a key of `decoded_len`
    /// bytes.
    pub fn max_encoding_size(&self, decoded_len: usize) -> usize {
        let per_byte = if self.is_identity() { 8 } else { self.width as usize + 8 };
        (decoded_len * per_byte).div_ceil(8)
    }

    /// Upper bound on the decoded size of an encoding of `length_in_bits`.
    pub fn max_decoding_size(&self, length_in_bits: usize) -> usize {
        if self.is_identity() {
            length_in_bits / 8
        } else {
            length_in_bits / self.width as usize
        }
    }

    /// Exact encoded length in bits, without encoding.
    pub fn estimate_encoded_bits(&self, decoded: &[u8]) -> usize {
        decoded
            .iter()
            .map(|&b| {
                let escape = self.codes[b as usize] & 1 == 0;
                self.width as usize + if escape { 8 } else { 0 }
            })
            .sum()
    }

    /// Encodes `decoded` into `out` and returns the length in bits.
    ///
    /// `out` must hold `max_encoding_size(decoded.len())` bytes; unused
    /// trailing bits are zero.
    pub fn encode(&self, decoded: &[u8], out: &mut [u8]) -> Result<usize> {
        let needed = self.max_encoding_size(decoded.len());
        ensure!(
            out.len() >= needed,
            "encode buffer of {} bytes too small, need {}",
            out.len(),
            needed
        );
        out[..needed].fill(0);

        let mut writer = BitWriter::new(&mut out[..needed]);
        for &b in decoded {
            let code = self.codes[b as usize];
            writer.write(code as u32, self.width);
            if code & 1 == 0 {
                writer.write(b as u32, 8);
            }
        }
        Ok(writer.position)
    }

    /// Decodes `length_in_bits` bits of `encoded` into `out`, returning the
    /// decoded length.
    pub fn decode(&self, encoded: &[u8], length_in_bits: usize, out: &mut [u8]) -> Result<usize> {
        ensure!(
            length_in_bits <= encoded.len() * 8,
            "encoded key claims {} bits but holds {} bytes",
            length_in_bits,
            encoded.len()
        );

        let mut reader = BitReader::new(encoded, length_in_bits);
        let mut written = 0;
        while reader.remaining() > 0 {
            let code = reader.read(self.width)?;
            let byte = if code & 1 == 1 {
                self.alphabet
                    .get((code >> 1) as usize)
                    .copied()
                    .ok_or_else(|| eyre!("invalid code {} for {}", code, self.id))?
            } else {
                let raw = reader.read(8)? as u8;
                if self.codes[raw as usize] as u32 != code {
                    bail!(
                        "escaped byte {:#04x} does not belong to gap code {} of {}",
                        raw,
                        code,
                        self.id
                    );
                }
                raw
            };

            ensure!(
                written < out.len(),
                "decode buffer of {} bytes too small",
                out.len()
            );
            out[written] = byte;
            written += 1;
        }
        Ok(written)
    }
}

struct BitWriter<'a> {
    out: &'a mut [u8],
    position: usize,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, position: 0 }
    }

    /// Caller guarantees capacity via `max_encoding_size`.
    fn write(&mut self, value: u32, width: u32) {
        for shift in (0..width).rev() {
            if (value >> shift) & 1 == 1 {
                self.out[self.position / 8] |= 0x80 >> (self.position % 8);
            }
            self.position += 1;
        }
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    end: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8], end: usize) -> Self {
        Self {
            data,
            position: 0,
            end,
        }
    }

    fn remaining(&self) -> usize {
        self.end - self.position
    }

    fn read(&mut self, width: u32) -> Result<u32> {
        ensure!(
            self.remaining() >= width as usize,
            "encoded key truncated at bit {}",
            self.position
        );
        let mut value = 0u32;
        for _ in 0..width {
            let bit = (self.data[self.position / 8] >> (7 - self.position % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.position += 1;
        }
        Ok(value)
    }
}
