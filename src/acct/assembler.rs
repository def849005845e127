// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Two-pass assembler for escrow program byte code.
//!
//! Instructions are collected into an arena of fixed-size records whose
//! branch operands are integer label indices, not byte offsets. Pass one lays
//! the records out to learn every label's byte offset, pass two re-emits the
//! stream with resolved targets. Forward jumps make a single-pass emitter
//! impossible: the offset of a target block is only known once everything
//! before it has been laid out.

use super::layout::SlotIndex;
use num_derive::FromPrimitive;

/// Machine opcodes understood by the on-chain stack machine runtime.
///
/// Operand widths are fixed per opcode: data slot indices are 16 bit,
/// immediates 64 bit and branch targets 32 bit absolute byte offsets, all
/// big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Op {
    /// `[slot u16][imm u64]` — slot := immediate
    SetVal = 0x01,
    /// `[dst u16][src u16]` — dst := src
    SetDat = 0x02,
    /// `[dst u16][src u16]` — dst += src
    AddDat = 0x06,
    /// `[dst u16][src u16]` — dst -= src
    SubDat = 0x07,
    /// `[dst u16][src u16]` — dst *= src
    MulDat = 0x08,
    /// `[target u32]` — unconditional jump
    JmpAdr = 0x1a,
    /// `[slot u16][target u32]` — jump if slot == 0
    BzrDat = 0x1b,
    /// `[slot u16][target u32]` — jump if slot != 0
    BnzDat = 0x1e,
    /// `[lhs u16][rhs u16][target u32]` — jump if lhs >= rhs
    BgeDat = 0x21,
    /// sleep until the next block
    SlpImd = 0x25,
    /// finish execution; the runtime pays the remaining balance to the
    /// program creator
    FinImd = 0x28,
    /// `[func u16]` — call platform function
    ExtFun = 0x32,
    /// `[func u16][slot u16]`
    ExtFunDat = 0x33,
    /// `[func u16][slot u16][slot u16]`
    ExtFunDat2 = 0x34,
    /// `[func u16][ret u16]`
    ExtFunRet = 0x35,
    /// `[func u16][ret u16][slot u16]`
    ExtFunRetDat2 = 0x37,
}

/// Platform functions provided by the host chain runtime.
///
/// `A` is the runtime's transaction register, `B` its 32 byte scratch
/// register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum FuncCode {
    /// ret := program creation timestamp
    GetCreationTimestamp = 0x0301,
    /// ret := current block timestamp
    GetBlockTimestamp = 0x0302,
    /// B := program creator's address
    PutCreatorIntoB = 0x0303,
    /// data[slot..slot+4] := B
    CopyBIntoData = 0x0304,
    /// A := first transaction to this program after data[slot], or zero
    PutTxAfterTimestampIntoA = 0x0305,
    /// ret := 1 if A holds no transaction
    CheckAIsZero = 0x0306,
    /// ret := timestamp of the transaction in A
    GetTimestampForTxInA = 0x0307,
    /// B := sender address of the transaction in A
    PutSenderOfTxInAIntoB = 0x0308,
    /// ret := message payload length of the transaction in A
    GetMessageLengthForTxInA = 0x0309,
    /// data[slot..] := entire message payload of the transaction in A
    CopyMessageIntoData = 0x030a,
    /// ret := 1 if B == data[slot..slot+4]
    CheckBEqualsData = 0x030b,
    /// data[dst..dst+3] := HASH160(data[src..src+4])
    Hash160IntoData = 0x030c,
    /// pay data[amount] of the host asset to the address at data[addr..addr+4]
    PayToAddressInData = 0x030d,
}

/// Handle into the assembler's label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u16);

/// One fixed-size instruction record in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    SetVal { slot: SlotIndex, value: u64 },
    SetDat { dst: SlotIndex, src: SlotIndex },
    AddDat { dst: SlotIndex, src: SlotIndex },
    SubDat { dst: SlotIndex, src: SlotIndex },
    MulDat { dst: SlotIndex, src: SlotIndex },
    JmpAdr { target: Label },
    BzrDat { slot: SlotIndex, target: Label },
    BnzDat { slot: SlotIndex, target: Label },
    BgeDat { lhs: SlotIndex, rhs: SlotIndex, target: Label },
    SlpImd,
    FinImd,
    ExtFun { func: FuncCode },
    ExtFunDat { func: FuncCode, slot: SlotIndex },
    ExtFunDat2 { func: FuncCode, slot_a: SlotIndex, slot_b: SlotIndex },
    ExtFunRet { func: FuncCode, ret: SlotIndex },
    ExtFunRetDat2 { func: FuncCode, ret: SlotIndex, slot: SlotIndex },
}

impl Instr {
    /// Encoded size in bytes. Fixed per record kind, which is what lets pass
    /// one compute label offsets without emitting anything.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::SetVal { .. } => 1 + 2 + 8,
            Self::SetDat { .. } | Self::AddDat { .. } | Self::SubDat { .. } | Self::MulDat { .. } => {
                1 + 2 + 2
            }
            Self::JmpAdr { .. } => 1 + 4,
            Self::BzrDat { .. } | Self::BnzDat { .. } => 1 + 2 + 4,
            Self::BgeDat { .. } => 1 + 2 + 2 + 4,
            Self::SlpImd | Self::FinImd => 1,
            Self::ExtFun { .. } => 1 + 2,
            Self::ExtFunDat { .. } | Self::ExtFunRet { .. } => 1 + 2 + 2,
            Self::ExtFunDat2 { .. } | Self::ExtFunRetDat2 { .. } => 1 + 2 + 2 + 2,
        }
    }

    fn encode(&self, targets: &[Option<u32>], out: &mut Vec<u8>) -> Result<(), AssembleErr> {
        let resolve = |label: &Label| -> Result<u32, AssembleErr> {
            targets
                .get(label.0 as usize)
                .copied()
                .flatten()
                .ok_or(AssembleErr::UnboundLabel(label.0))
        };

        match self {
            Self::SetVal { slot, value } => {
                out.push(Op::SetVal as u8);
                out.extend_from_slice(&slot.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
            Self::SetDat { dst, src } => {
                out.push(Op::SetDat as u8);
                out.extend_from_slice(&dst.to_be_bytes());
                out.extend_from_slice(&src.to_be_bytes());
            }
            Self::AddDat { dst, src } => {
                out.push(Op::AddDat as u8);
                out.extend_from_slice(&dst.to_be_bytes());
                out.extend_from_slice(&src.to_be_bytes());
            }
            Self::SubDat { dst, src } => {
                out.push(Op::SubDat as u8);
                out.extend_from_slice(&dst.to_be_bytes());
                out.extend_from_slice(&src.to_be_bytes());
            }
            Self::MulDat { dst, src } => {
                out.push(Op::MulDat as u8);
                out.extend_from_slice(&dst.to_be_bytes());
                out.extend_from_slice(&src.to_be_bytes());
            }
            Self::JmpAdr { target } => {
                out.push(Op::JmpAdr as u8);
                out.extend_from_slice(&resolve(target)?.to_be_bytes());
            }
            Self::BzrDat { slot, target } => {
                out.push(Op::BzrDat as u8);
                out.extend_from_slice(&slot.to_be_bytes());
                out.extend_from_slice(&resolve(target)?.to_be_bytes());
            }
            Self::BnzDat { slot, target } => {
                out.push(Op::BnzDat as u8);
                out.extend_from_slice(&slot.to_be_bytes());
                out.extend_from_slice(&resolve(target)?.to_be_bytes());
            }
            Self::BgeDat { lhs, rhs, target } => {
                out.push(Op::BgeDat as u8);
                out.extend_from_slice(&lhs.to_be_bytes());
                out.extend_from_slice(&rhs.to_be_bytes());
                out.extend_from_slice(&resolve(target)?.to_be_bytes());
            }
            Self::SlpImd => out.push(Op::SlpImd as u8),
            Self::FinImd => out.push(Op::FinImd as u8),
            Self::ExtFun { func } => {
                out.push(Op::ExtFun as u8);
                out.extend_from_slice(&(*func as u16).to_be_bytes());
            }
            Self::ExtFunDat { func, slot } => {
                out.push(Op::ExtFunDat as u8);
                out.extend_from_slice(&(*func as u16).to_be_bytes());
                out.extend_from_slice(&slot.to_be_bytes());
            }
            Self::ExtFunDat2 { func, slot_a, slot_b } => {
                out.push(Op::ExtFunDat2 as u8);
                out.extend_from_slice(&(*func as u16).to_be_bytes());
                out.extend_from_slice(&slot_a.to_be_bytes());
                out.extend_from_slice(&slot_b.to_be_bytes());
            }
            Self::ExtFunRet { func, ret } => {
                out.push(Op::ExtFunRet as u8);
                out.extend_from_slice(&(*func as u16).to_be_bytes());
                out.extend_from_slice(&ret.to_be_bytes());
            }
            Self::ExtFunRetDat2 { func, ret, slot } => {
                out.push(Op::ExtFunRetDat2 as u8);
                out.extend_from_slice(&(*func as u16).to_be_bytes());
                out.extend_from_slice(&ret.to_be_bytes());
                out.extend_from_slice(&slot.to_be_bytes());
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleErr {
    UnboundLabel(u16),
    TooManyLabels,
}

/// Instruction arena plus label table.
#[derive(Debug, Default)]
pub struct Assembler {
    instrs: Vec<Instr>,
    /// Label -> instruction index, bound by [`Self::bind`].
    labels: Vec<Option<usize>>,
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, unbound label.
    pub fn label(&mut self) -> Result<Label, AssembleErr> {
        if self.labels.len() > u16::MAX as usize {
            return Err(AssembleErr::TooManyLabels);
        }

        self.labels.push(None);
        Ok(Label((self.labels.len() - 1) as u16))
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.instrs.len());
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Assembles the arena into byte code.
    ///
    /// Pass one walks the records accumulating fixed sizes to resolve every
    /// bound label to a byte offset; pass two emits the final stream. The
    /// result is deterministic for a given emission sequence.
    pub fn assemble(&self) -> Result<Vec<u8>, AssembleErr> {
        // Pass 1: label index -> byte offset.
        let mut offsets = Vec::with_capacity(self.instrs.len() + 1);
        let mut position = 0_u32;
        for instr in &self.instrs {
            offsets.push(position);
            position += instr.encoded_len() as u32;
        }
        // A label bound past the last instruction addresses the end of code.
        offsets.push(position);

        let mut targets: Vec<Option<u32>> = Vec::with_capacity(self.labels.len());
        for bound in &self.labels {
            targets.push(bound.map(|idx| offsets[idx]));
        }

        // Pass 2: emit with resolved targets.
        let mut out = Vec::with_capacity(position as usize);
        for instr in &self.instrs {
            instr.encode(&targets, &mut out)?;
        }

        debug_assert_eq!(out.len(), position as usize);
        Ok(out)
    }
}
