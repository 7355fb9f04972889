//! Mutator (spec §4.3, C5): 21 havoc-style mutation operators over message
//! sequences, driven by a deterministic PRNG.
//!
//! Grounded directly in `original_source/Fuzzer.py`'s `Mutator` class: same
//! operator catalogue, same endianness handling, same clone/overwrite
//! probabilities, translated from Python's `random.Random` into `rand`'s
//! `StdRng`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dict::DictEntry;
use crate::testcase::Message;

pub const ARITH_MAX: i32 = 35;
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

const INTERESTING_8: [i8; 9] = [-128, -1, 0, 1, 16, 32, 64, 100, 127];
const INTERESTING_16: [i16; 10] = [-32768, -129, 128, 255, 256, 512, 1000, 1024, 4096, 32767];
const INTERESTING_32: [i32; 8] = [
    -2147483648,
    -100663046,
    -32769,
    32768,
    65535,
    65536,
    100663045,
    2147483647,
];

/// Deterministic default seed used to reproduce a fuzzing run byte-for-byte
/// (spec §4.3's worked example).
pub const DEFAULT_SEED: u64 = 12138;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    BitFlip,
    Interesting8,
    Interesting16,
    Interesting32,
    ByteSub,
    ByteAdd,
    WordSub,
    WordAdd,
    DwordSub,
    DwordAdd,
    XorByte,
    DeleteBlockA,
    DeleteBlockB,
    CloneOrInsertBlock,
    OverwriteBlock,
    OverwriteWithExtra,
    InsertWithExtra,
    RegionOverwrite,
    RegionInsertBefore,
    RegionInsertAfter,
    RegionDuplicate,
}

impl Operator {
    fn from_index(idx: u32) -> Self {
        match idx {
            0 => Operator::BitFlip,
            1 => Operator::Interesting8,
            2 => Operator::Interesting16,
            3 => Operator::Interesting32,
            4 => Operator::ByteSub,
            5 => Operator::ByteAdd,
            6 => Operator::WordSub,
            7 => Operator::WordAdd,
            8 => Operator::DwordSub,
            9 => Operator::DwordAdd,
            10 => Operator::XorByte,
            11 => Operator::DeleteBlockA,
            12 => Operator::DeleteBlockB,
            13 => Operator::CloneOrInsertBlock,
            14 => Operator::OverwriteBlock,
            15 => Operator::OverwriteWithExtra,
            16 => Operator::InsertWithExtra,
            17 => Operator::RegionOverwrite,
            18 => Operator::RegionInsertBefore,
            19 => Operator::RegionInsertAfter,
            20 => Operator::RegionDuplicate,
            _ => unreachable!("operator index out of range: {idx}"),
        }
    }

    fn is_region_level(self) -> bool {
        matches!(
            self,
            Operator::RegionOverwrite
                | Operator::RegionInsertBefore
                | Operator::RegionInsertAfter
                | Operator::RegionDuplicate
        )
    }
}

/// Returns a block length in `1..=max_len`, biased toward small edits: for
/// `max_len < 8` uniform over the whole range; otherwise 75% of the time
/// uniform over `[1, min(8, max_len)]`, 25% of the time over `[8, max_len]`.
pub fn choose_block_len(rng: &mut StdRng, max_len: usize) -> usize {
    assert!(max_len >= 1, "max_len must be at least 1");
    if max_len < 8 {
        return rng.gen_range(1..=max_len);
    }
    if rng.gen_bool(0.75) {
        rng.gen_range(1..=max_len.min(8))
    } else {
        rng.gen_range(8..=max_len)
    }
}

fn pick_other_index(rng: &mut StdRng, len: usize, exclude: usize) -> usize {
    debug_assert!(len >= 2);
    loop {
        let i = rng.gen_range(0..len);
        if i != exclude {
            return i;
        }
    }
}

pub struct Mutator {
    rng: StdRng,
    extras: Vec<DictEntry>,
    region_level_mutation: bool,
}

impl Mutator {
    pub fn new(seed: u64, extras: Vec<DictEntry>) -> Self {
        Mutator {
            rng: StdRng::seed_from_u64(seed),
            extras,
            region_level_mutation: false,
        }
    }

    pub fn set_region_level_mutation(&mut self, enabled: bool) {
        self.region_level_mutation = enabled;
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Apply one mutation operator, chosen uniformly from `0..=16`, plus
    /// `17..=20` when region-level mutation is enabled.
    pub fn mutate(&mut self, messages: &mut Vec<Message>, msg_idx: usize) {
        let max_choice = if self.region_level_mutation { 20 } else { 16 };
        let choice = self.rng.gen_range(0..=max_choice);
        let mut op = Operator::from_index(choice);

        if op.is_region_level() && messages.len() < 2 {
            op = Operator::BitFlip;
        }

        match op {
            Operator::RegionOverwrite => {
                let other = pick_other_index(&mut self.rng, messages.len(), msg_idx);
                messages[msg_idx] = messages[other].clone();
                return;
            }
            Operator::RegionInsertBefore => {
                let other = pick_other_index(&mut self.rng, messages.len(), msg_idx);
                let clone = messages[other].clone();
                messages.insert(msg_idx, clone);
                return;
            }
            Operator::RegionInsertAfter => {
                let other = pick_other_index(&mut self.rng, messages.len(), msg_idx);
                let clone = messages[other].clone();
                messages.insert(msg_idx + 1, clone);
                return;
            }
            Operator::RegionDuplicate => {
                let clone = messages[msg_idx].clone();
                messages.insert(msg_idx, clone);
                return;
            }
            _ => {}
        }

        let msg = &mut messages[msg_idx];
        match op {
            Operator::BitFlip => flip_single_bit(&mut self.rng, msg),
            Operator::Interesting8 => interesting_8(&mut self.rng, msg),
            Operator::Interesting16 => interesting_16(&mut self.rng, msg),
            Operator::Interesting32 => interesting_32(&mut self.rng, msg),
            Operator::ByteSub => arith_byte(&mut self.rng, msg, -1),
            Operator::ByteAdd => arith_byte(&mut self.rng, msg, 1),
            Operator::WordSub => arith_word(&mut self.rng, msg, -1),
            Operator::WordAdd => arith_word(&mut self.rng, msg, 1),
            Operator::DwordSub => arith_dword(&mut self.rng, msg, -1),
            Operator::DwordAdd => arith_dword(&mut self.rng, msg, 1),
            Operator::XorByte => xor_byte(&mut self.rng, msg),
            Operator::DeleteBlockA | Operator::DeleteBlockB => delete_block(&mut self.rng, msg),
            Operator::CloneOrInsertBlock => clone_or_insert_block(&mut self.rng, msg),
            Operator::OverwriteBlock => overwrite_block(&mut self.rng, msg),
            Operator::OverwriteWithExtra => {
                overwrite_with_extra(&mut self.rng, msg, &mut self.extras)
            }
            Operator::InsertWithExtra => insert_with_extra(&mut self.rng, msg, &mut self.extras),
            Operator::RegionOverwrite
            | Operator::RegionInsertBefore
            | Operator::RegionInsertAfter
            | Operator::RegionDuplicate => unreachable!("handled above"),
        }
    }
}

fn flip_single_bit(rng: &mut StdRng, msg: &mut Message) {
    if msg.is_empty() {
        return;
    }
    let bit_pos = rng.gen_range(0..msg.len() * 8);
    let byte_pos = bit_pos / 8;
    let bit_in_byte = bit_pos % 8;
    msg[byte_pos] ^= 1 << (7 - bit_in_byte);
}

fn interesting_8(rng: &mut StdRng, msg: &mut Message) {
    if msg.is_empty() {
        return;
    }
    let pos = rng.gen_range(0..msg.len());
    let value = INTERESTING_8[rng.gen_range(0..INTERESTING_8.len())];
    msg[pos] = value as u8;
}

fn interesting_16(rng: &mut StdRng, msg: &mut Message) {
    if msg.len() < 2 {
        return;
    }
    let pos = rng.gen_range(0..=msg.len() - 2);
    let value = INTERESTING_16[rng.gen_range(0..INTERESTING_16.len())];
    let bytes = if rng.gen_bool(0.5) {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    msg[pos..pos + 2].copy_from_slice(&bytes);
}

fn interesting_32(rng: &mut StdRng, msg: &mut Message) {
    if msg.len() < 4 {
        return;
    }
    let pos = rng.gen_range(0..=msg.len() - 4);
    let value = INTERESTING_32[rng.gen_range(0..INTERESTING_32.len())];
    let bytes = if rng.gen_bool(0.5) {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    msg[pos..pos + 4].copy_from_slice(&bytes);
}

fn arith_byte(rng: &mut StdRng, msg: &mut Message, sign: i32) {
    if msg.is_empty() {
        return;
    }
    let pos = rng.gen_range(0..msg.len());
    let delta = 1 + rng.gen_range(0..ARITH_MAX);
    msg[pos] = ((msg[pos] as i32 + sign * delta).rem_euclid(256)) as u8;
}

fn arith_word(rng: &mut StdRng, msg: &mut Message, sign: i32) {
    if msg.len() < 2 {
        return;
    }
    let pos = rng.gen_range(0..=msg.len() - 2);
    let delta = 1 + rng.gen_range(0..ARITH_MAX);
    let big_endian = rng.gen_bool(0.5);
    let bytes = [msg[pos], msg[pos + 1]];
    let value = if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    };
    let new_value = ((value as i32 + sign * delta).rem_euclid(65536)) as u16;
    let out = if big_endian {
        new_value.to_be_bytes()
    } else {
        new_value.to_le_bytes()
    };
    msg[pos..pos + 2].copy_from_slice(&out);
}

fn arith_dword(rng: &mut StdRng, msg: &mut Message, sign: i32) {
    if msg.len() < 4 {
        return;
    }
    let pos = rng.gen_range(0..=msg.len() - 4);
    let delta = 1 + rng.gen_range(0..ARITH_MAX);
    let big_endian = rng.gen_bool(0.5);
    let bytes = [msg[pos], msg[pos + 1], msg[pos + 2], msg[pos + 3]];
    let value = if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    };
    let new_value = ((value as i64 + (sign * delta) as i64).rem_euclid(1i64 << 32)) as u32;
    let out = if big_endian {
        new_value.to_be_bytes()
    } else {
        new_value.to_le_bytes()
    };
    msg[pos..pos + 4].copy_from_slice(&out);
}

fn xor_byte(rng: &mut StdRng, msg: &mut Message) {
    if msg.is_empty() {
        return;
    }
    let pos = rng.gen_range(0..msg.len());
    let xor_value = 1 + rng.gen_range(0..255u16) as u8;
    msg[pos] ^= xor_value;
}

/// Remove a block of `choose_block_len` bytes. Requires at least 2 bytes so
/// the message never becomes empty.
fn delete_block(rng: &mut StdRng, msg: &mut Message) {
    if msg.len() < 2 {
        return;
    }
    let max_len = (msg.len() - 1).min(64);
    let del_len = choose_block_len(rng, max_len);
    let del_from = rng.gen_range(0..=msg.len() - del_len);
    msg.drain(del_from..del_from + del_len);
}

fn clone_or_insert_block(rng: &mut StdRng, msg: &mut Message) {
    if msg.len() >= MAX_MESSAGE_LEN || msg.is_empty() {
        return;
    }
    let block: Vec<u8> = if rng.gen_bool(0.75) {
        let clone_len = choose_block_len(rng, msg.len());
        let clone_from = rng.gen_range(0..=msg.len() - clone_len);
        msg[clone_from..clone_from + clone_len].to_vec()
    } else {
        let clone_len = choose_block_len(rng, 64);
        if rng.gen_bool(0.5) {
            (0..clone_len).map(|_| rng.gen_range(0..=255u16) as u8).collect()
        } else {
            vec![rng.gen_range(0..=255u16) as u8; clone_len]
        }
    };
    if msg.len() + block.len() > MAX_MESSAGE_LEN {
        return;
    }
    let clone_to = rng.gen_range(0..=msg.len());
    msg.splice(clone_to..clone_to, block);
}

fn overwrite_block(rng: &mut StdRng, msg: &mut Message) {
    if msg.len() < 2 {
        return;
    }
    let max_len = msg.len() - 1;
    let copy_len = choose_block_len(rng, max_len);
    let copy_from = rng.gen_range(0..=msg.len() - copy_len);
    let copy_to = rng.gen_range(0..=msg.len() - copy_len);

    if rng.gen_bool(0.75) {
        if copy_from != copy_to {
            let block = msg[copy_from..copy_from + copy_len].to_vec();
            msg[copy_to..copy_to + copy_len].copy_from_slice(&block);
        }
    } else {
        let fill_byte = if rng.gen_bool(0.5) {
            rng.gen_range(0..=255u16) as u8
        } else {
            msg[rng.gen_range(0..msg.len())]
        };
        for b in &mut msg[copy_to..copy_to + copy_len] {
            *b = fill_byte;
        }
    }
}

fn pick_extra<'a>(rng: &mut StdRng, extras: &'a mut [DictEntry]) -> Option<&'a mut DictEntry> {
    if extras.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..extras.len());
    Some(&mut extras[idx])
}

fn overwrite_with_extra(rng: &mut StdRng, msg: &mut Message, extras: &mut [DictEntry]) {
    let Some(entry) = pick_extra(rng, extras) else {
        return;
    };
    if entry.len > msg.len() {
        return;
    }
    let insert_at = rng.gen_range(0..=msg.len() - entry.len);
    let data = entry.data.clone();
    entry.hit_count += 1;
    msg[insert_at..insert_at + entry.len].copy_from_slice(&data);
}

fn insert_with_extra(rng: &mut StdRng, msg: &mut Message, extras: &mut [DictEntry]) {
    let Some(entry) = pick_extra(rng, extras) else {
        return;
    };
    if msg.len() + entry.len >= MAX_MESSAGE_LEN {
        return;
    }
    let insert_at = rng.gen_range(0..=msg.len());
    let data = entry.data.clone();
    entry.hit_count += 1;
    msg.splice(insert_at..insert_at, data);
}
