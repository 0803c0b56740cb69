//! HPACK encoder (RFC 7541 §6, §5), grounded on the donor's
//! `HPACKEncoder::encode`/`encode_integer`/`encode_string`.

use crate::hpack::dynamic_table::DynamicTable;
use crate::hpack::huffman;
use crate::hpack::static_table;

pub struct Encoder {
    table: DynamicTable,
}

pub struct HeaderToEncode<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub sensitive: bool,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
        }
    }

    pub fn set_max_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Encodes `headers` in order, appending to `out`. Sensitive headers
    /// always use the never-indexed literal representation regardless
    /// of whether a matching entry already exists in either table.
    pub fn encode(&mut self, headers: &[HeaderToEncode<'_>], out: &mut Vec<u8>) {
        for h in headers {
            if h.sensitive {
                self.encode_never_indexed(h.name, h.value, out);
                continue;
            }

            if let Some(index) = static_table::find(h.name, Some(h.value)) {
                encode_integer(index as u64, 7, 0x80, out);
                continue;
            }
            if let Some(index) = self.table.find(h.name, Some(h.value)) {
                let full_index = static_table::SIZE + 1 + index;
                encode_integer(full_index as u64, 7, 0x80, out);
                continue;
            }

            // Literal with incremental indexing; name may still be
            // indexed even if the value isn't.
            let name_index = static_table::find(h.name, None).or_else(|| self.table.find(h.name, None).map(|i| static_table::SIZE + 1 + i));

            match name_index {
                Some(idx) => encode_integer(idx as u64, 6, 0x40, out),
                None => {
                    out.push(0x40);
                    encode_string(h.name, out);
                }
            }
            encode_string(h.value, out);
            let _ = self.table.add(h.name, h.value);
        }
    }

    fn encode_never_indexed(&self, name: &str, value: &str, out: &mut Vec<u8>) {
        let name_index = static_table::find(name, None).or_else(|| self.table.find(name, None).map(|i| static_table::SIZE + 1 + i));
        match name_index {
            Some(idx) => encode_integer(idx as u64, 4, 0x10, out),
            None => {
                out.push(0x10);
                encode_string(name, out);
            }
        }
        encode_string(value, out);
    }
}

/// Encodes `value` with an N-bit prefix, ORing `pattern_bits` into the
/// first byte's upper bits (RFC 7541 §5.1).
pub fn encode_integer(value: u64, prefix_bits: u8, pattern_bits: u8, out: &mut Vec<u8>) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.push(pattern_bits | value as u8);
        return;
    }

    out.push(pattern_bits | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.push(((remaining % 128) | 128) as u8);
        remaining /= 128;
    }
    out.push(remaining as u8);
}

/// Encodes a string literal, using Huffman when it's strictly shorter
/// than the raw representation.
pub fn encode_string(s: &str, out: &mut Vec<u8>) {
    let bits = huffman::encoded_len_bits(s.as_bytes());
    let huffman_len = (bits + 7) / 8;

    if huffman_len < s.len() {
        encode_integer(huffman_len as u64, 7, 0x80, out);
        huffman::encode(s.as_bytes(), out);
    } else {
        encode_integer(s.len() as u64, 7, 0x00, out);
        out.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::decoder::Decoder;

    #[test]
    fn small_integer_fits_in_prefix() {
        let mut out = Vec::new();
        encode_integer(10, 5, 0x00, &mut out);
        assert_eq!(out, vec![10]);
    }

    #[test]
    fn large_integer_uses_continuation_bytes() {
        let mut out = Vec::new();
        encode_integer(1337, 5, 0x00, &mut out);
        assert_eq!(out, vec![31, 154, 10]);
    }

    #[test]
    fn round_trips_through_decoder() {
        let mut encoder = Encoder::new(4096);
        let headers = vec![HeaderToEncode { name: "x-custom", value: "hello-world", sensitive: false }];
        let mut out = Vec::new();
        encoder.encode(&headers, &mut out);

        let mut decoder = Decoder::new(4096, 8192);
        let decoded = decoder.decode(&out, 100).unwrap();
        assert_eq!(decoded[0].name, "x-custom");
        assert_eq!(decoded[0].value, "hello-world");
    }

    #[test]
    fn indexed_static_method_get_round_trips() {
        let mut encoder = Encoder::new(4096);
        let headers = vec![HeaderToEncode { name: ":method", value: "GET", sensitive: false }];
        let mut out = Vec::new();
        encoder.encode(&headers, &mut out);
        assert_eq!(out, vec![0x82]);
    }
}
