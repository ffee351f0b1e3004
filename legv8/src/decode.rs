//! Maps a raw 32-bit instruction word to a codec entry and its decoded fields.

use crate::codec::{self, CodecEntry};
use crate::constants::{self, b, cb, d, i_fmt, iw, r};
use crate::Word;

/// The operand fields of a decoded instruction, named after their home format. Only
/// the fields relevant to the matched entry's format are meaningful; the rest are
/// left at the zero default.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fields {
    pub rd: u8,
    pub rn: u8,
    pub rm: u8,
    pub shamt: u8,
    pub op: u8,
    pub imm: i64,
    pub address: i64,
}

/// A fully decoded instruction: the codec entry it matched plus its operand fields.
#[derive(Clone, Copy, Debug)]
pub struct Decoded {
    pub entry: &'static CodecEntry,
    pub fields: Fields,
}

/// Decodes one instruction word, returning `None` if no codec entry claims it.
pub fn decode(word: Word) -> Option<Decoded> {
    let prefix = constants::extract(word, r::OPCODE_OFFSET, r::OPCODE_WIDTH) as u16;
    let shamt_probe = constants::extract(word, r::SHAMT_OFFSET, r::SHAMT_WIDTH) as u8;
    let rt_probe = constants::extract(word, cb::RT_OFFSET, cb::RT_WIDTH) as u8;

    let entry = codec::table().decode_prefix(prefix, shamt_probe, rt_probe)?;
    let fields = decode_fields(word, entry);
    Some(Decoded { entry, fields })
}

fn decode_fields(word: Word, entry: &CodecEntry) -> Fields {
    match entry.format {
        codec::Format::R => Fields {
            rd: constants::extract(word, r::RD_OFFSET, r::RD_WIDTH) as u8,
            rn: constants::extract(word, r::RN_OFFSET, r::RN_WIDTH) as u8,
            rm: constants::extract(word, r::RM_OFFSET, r::RM_WIDTH) as u8,
            shamt: constants::extract(word, r::SHAMT_OFFSET, r::SHAMT_WIDTH) as u8,
            ..Default::default()
        },
        codec::Format::I => Fields {
            rd: constants::extract(word, i_fmt::RD_OFFSET, i_fmt::RD_WIDTH) as u8,
            rn: constants::extract(word, i_fmt::RN_OFFSET, i_fmt::RN_WIDTH) as u8,
            imm: constants::sign_extend(
                constants::extract(word, i_fmt::IMM_OFFSET, i_fmt::IMM_WIDTH),
                i_fmt::IMM_WIDTH,
            ),
            ..Default::default()
        },
        codec::Format::D => Fields {
            rd: constants::extract(word, d::RD_OFFSET, d::RD_WIDTH) as u8,
            rn: constants::extract(word, d::RN_OFFSET, d::RN_WIDTH) as u8,
            op: constants::extract(word, d::OP_OFFSET, d::OP_WIDTH) as u8,
            address: constants::extract(word, d::ADDRESS_OFFSET, d::ADDRESS_WIDTH) as i64,
            ..Default::default()
        },
        codec::Format::B => Fields {
            address: constants::sign_extend(
                constants::extract(word, b::ADDRESS_OFFSET, b::ADDRESS_WIDTH),
                b::ADDRESS_WIDTH,
            ),
            ..Default::default()
        },
        codec::Format::Cb => Fields {
            rd: constants::extract(word, cb::RT_OFFSET, cb::RT_WIDTH) as u8,
            address: constants::sign_extend(
                constants::extract(word, cb::ADDRESS_OFFSET, cb::ADDRESS_WIDTH),
                cb::ADDRESS_WIDTH,
            ),
            ..Default::default()
        },
        codec::Format::Iw => Fields {
            rd: constants::extract(word, iw::RD_OFFSET, iw::RD_WIDTH) as u8,
            imm: constants::extract(word, iw::IMM_OFFSET, iw::IMM_WIDTH) as i64,
            shamt: constants::extract(word, iw::SHAMT_OFFSET, iw::SHAMT_WIDTH) as u8,
            ..Default::default()
        },
    }
}

/// Packs a word for the given format and fields. The inverse of [`decode_fields`];
/// used by the assembler's encoder and by decode round-trip tests.
pub fn encode(entry: &CodecEntry, fields: &Fields) -> Word {
    let mut word: u32 = 0;
    let put = |word: &mut u32, value: u32, offset: u32, width: u32| {
        let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        *word |= (value & mask) << offset;
    };

    match entry.format {
        codec::Format::R => {
            put(&mut word, fields.rd as u32, r::RD_OFFSET, r::RD_WIDTH);
            put(&mut word, fields.rn as u32, r::RN_OFFSET, r::RN_WIDTH);
            put(&mut word, fields.shamt as u32, r::SHAMT_OFFSET, r::SHAMT_WIDTH);
            put(&mut word, fields.rm as u32, r::RM_OFFSET, r::RM_WIDTH);
            put(&mut word, entry.opcode as u32, r::OPCODE_OFFSET, r::OPCODE_WIDTH);
        }
        codec::Format::I => {
            put(&mut word, fields.rd as u32, i_fmt::RD_OFFSET, i_fmt::RD_WIDTH);
            put(&mut word, fields.rn as u32, i_fmt::RN_OFFSET, i_fmt::RN_WIDTH);
            put(&mut word, fields.imm as u32, i_fmt::IMM_OFFSET, i_fmt::IMM_WIDTH);
            put(&mut word, entry.opcode as u32, i_fmt::OPCODE_OFFSET, i_fmt::OPCODE_WIDTH);
        }
        codec::Format::D => {
            put(&mut word, fields.rd as u32, d::RD_OFFSET, d::RD_WIDTH);
            put(&mut word, fields.rn as u32, d::RN_OFFSET, d::RN_WIDTH);
            put(&mut word, fields.op as u32, d::OP_OFFSET, d::OP_WIDTH);
            put(&mut word, fields.address as u32, d::ADDRESS_OFFSET, d::ADDRESS_WIDTH);
            put(&mut word, entry.opcode as u32, d::OPCODE_OFFSET, d::OPCODE_WIDTH);
        }
        codec::Format::B => {
            put(&mut word, fields.address as u32, b::ADDRESS_OFFSET, b::ADDRESS_WIDTH);
            put(&mut word, entry.opcode as u32, b::OPCODE_OFFSET, b::OPCODE_WIDTH);
        }
        codec::Format::Cb => {
            let rt = match entry.discriminator {
                codec::Discriminator::Rt(v) => v as u32,
                _ => fields.rd as u32,
            };
            put(&mut word, rt, cb::RT_OFFSET, cb::RT_WIDTH);
            put(&mut word, fields.address as u32, cb::ADDRESS_OFFSET, cb::ADDRESS_WIDTH);
            put(&mut word, entry.opcode as u32, cb::OPCODE_OFFSET, cb::OPCODE_WIDTH);
        }
        codec::Format::Iw => {
            put(&mut word, fields.rd as u32, iw::RD_OFFSET, iw::RD_WIDTH);
            put(&mut word, fields.imm as u32, iw::IMM_OFFSET, iw::IMM_WIDTH);
            put(&mut word, fields.shamt as u32, iw::SHAMT_OFFSET, iw::SHAMT_WIDTH);
            put(&mut word, entry.opcode as u32, iw::OPCODE_OFFSET, iw::OPCODE_WIDTH);
        }
    }

    if let codec::Discriminator::Shamt(v) = entry.discriminator {
        put(&mut word, v as u32, r::SHAMT_OFFSET, r::SHAMT_WIDTH);
    }

    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Tag;

    fn round_trip(mnemonic: &str, fields: Fields) -> Decoded {
        let entry = codec::table().by_mnemonic(mnemonic).unwrap();
        let word = encode(entry, &fields);
        decode(word).expect("encoded word must decode")
    }

    #[test]
    fn every_codec_tag_round_trips_on_a_zero_word() {
        for entry in codec::table().entries() {
            let fields = Fields::default();
            let word = encode(entry, &fields);
            let decoded = decode(word).unwrap_or_else(|| panic!("{:?} failed to decode", entry.tag));
            assert_eq!(decoded.entry.tag, entry.tag);
        }
    }

    #[test]
    fn r_format_fields_round_trip() {
        let fields = Fields { rd: 3, rn: 5, rm: 7, ..Default::default() };
        let decoded = round_trip("ADD", fields);
        assert_eq!(decoded.fields.rd, 3);
        assert_eq!(decoded.fields.rn, 5);
        assert_eq!(decoded.fields.rm, 7);
    }

    #[test]
    fn i_format_immediate_sign_extends() {
        let fields = Fields { rd: 1, rn: 2, imm: -1, ..Default::default() };
        let decoded = round_trip("ADDI", fields);
        assert_eq!(decoded.fields.imm, -1);
    }

    #[test]
    fn b_format_address_round_trips_extremes() {
        let max = (1i64 << 25) - 1;
        let min = -(1i64 << 25);
        for &addr in &[max, min] {
            let fields = Fields { address: addr, ..Default::default() };
            let decoded = round_trip("B", fields);
            assert_eq!(decoded.fields.address, addr);
        }
    }

    #[test]
    fn bcond_decodes_to_the_bcond_tag_regardless_of_which_row_encoded_it() {
        let entry = codec::table().by_mnemonic("B.LT").unwrap();
        let word = encode(entry, &Fields { address: 4, ..Default::default() });
        let decoded = decode(word).unwrap();
        assert_eq!(decoded.entry.tag, Tag::BCond);
    }
}
