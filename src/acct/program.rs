// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use super::assembler::{Assembler, AssembleErr, FuncCode, Instr};
use super::layout::*;
use super::messages::{CANCEL_MESSAGE_LENGTH, REDEEM_MESSAGE_LENGTH, TRADE_MESSAGE_LENGTH};
use super::{AcctMode, TradeParameterErr, TradeParameters};
use crate::foreign::ForeignChain;
use crate::primitives::Hash256;

/// Program format version understood by the stack machine runtime.
pub const PROGRAM_FORMAT_VERSION: u16 = 1;

/// Stack pages reserved for the escrow program. The escrow never calls into
/// subroutines so the minimum allocation suffices.
pub const CALL_STACK_PAGES: u16 = 1;
pub const USER_STACK_PAGES: u16 = 1;

/// Balance below which the runtime will not schedule the program.
pub const MIN_ACTIVATION_BALANCE: u64 = 1;

/// Flat binary envelope consumed by the stack machine runtime.
///
/// The SHA256 of `code` alone is the ACCT discriminator: the data segment
/// varies per trade while the code segment is identical for every trade of
/// one (foreign chain, version) variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedProgram {
    pub version: u16,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub call_stack_pages: u16,
    pub user_stack_pages: u16,
    pub min_activation_balance: u64,
}

impl DeployedProgram {
    #[must_use]
    pub fn code_hash(&self) -> Hash256 {
        Hash256::sha256(&self.code)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.code.len() + self.data.len());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.call_stack_pages.to_be_bytes());
        out.extend_from_slice(&self.user_stack_pages.to_be_bytes());
        out.extend_from_slice(&self.min_activation_balance.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramDecodeErr> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let version = u16::from_be_bytes(cursor.take_array()?);
        let code_len = u32::from_be_bytes(cursor.take_array()?) as usize;
        let code = cursor.take(code_len)?.to_vec();
        let data_len = u32::from_be_bytes(cursor.take_array()?) as usize;
        let data = cursor.take(data_len)?.to_vec();
        let call_stack_pages = u16::from_be_bytes(cursor.take_array()?);
        let user_stack_pages = u16::from_be_bytes(cursor.take_array()?);
        let min_activation_balance = u64::from_be_bytes(cursor.take_array()?);

        if cursor.pos != bytes.len() {
            return Err(ProgramDecodeErr::TrailingBytes);
        }

        Ok(Self {
            version,
            code,
            data,
            call_stack_pages,
            user_stack_pages,
            min_activation_balance,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProgramDecodeErr> {
        if self.pos + n > self.bytes.len() {
            return Err(ProgramDecodeErr::Truncated);
        }

        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProgramDecodeErr> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramDecodeErr {
    Truncated,
    TrailingBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildErr {
    Params(TradeParameterErr),
    Assemble(AssembleErr),
}

impl From<TradeParameterErr> for BuildErr {
    fn from(err: TradeParameterErr) -> Self {
        Self::Params(err)
    }
}

impl From<AssembleErr> for BuildErr {
    fn from(err: AssembleErr) -> Self {
        Self::Assemble(err)
    }
}

/// Compiles escrow programs for one (foreign chain, protocol version) pair.
///
/// `build` is pure and deterministic: identical parameters always yield byte
/// identical programs, because the code hash is how counterparties recognise
/// the contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowProgramBuilder {
    pub chain: ForeignChain,
    pub version: u16,
}

impl EscrowProgramBuilder {
    #[must_use]
    pub fn new(chain: ForeignChain, version: u16) -> Self {
        Self { chain, version }
    }

    pub fn build(&self, params: &TradeParameters) -> Result<DeployedProgram, BuildErr> {
        params.validate()?;

        Ok(DeployedProgram {
            version: PROGRAM_FORMAT_VERSION,
            code: self.build_code()?,
            data: self.build_data(params),
            call_stack_pages: CALL_STACK_PAGES,
            user_stack_pages: USER_STACK_PAGES,
            min_activation_balance: MIN_ACTIVATION_BALANCE,
        })
    }

    /// Emits the variant's code segment. Parameter-free: trade parameters
    /// live in the data segment so every trade of one variant shares one code
    /// hash.
    pub fn build_code(&self) -> Result<Vec<u8>, AssembleErr> {
        let mut asm = Assembler::new();

        let offering_poll = asm.label()?;
        let offering_have_tx = asm.label()?;
        let offering_check_cancel = asm.label()?;
        let trading_poll = asm.label()?;
        let trading_have_tx = asm.label()?;
        let refund = asm.label()?;

        // Phase 1: initialization. Capture creation time and creator, seed
        // the transaction cursor and arm the offer deadline. The variant tag
        // write pins a distinct code hash per (chain, version).
        asm.emit(Instr::SetVal {
            slot: SLOT_TMP_B,
            value: (u64::from(self.chain.chain_id()) << 16) | u64::from(self.version),
        });
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetCreationTimestamp,
            ret: SLOT_CREATION_TIMESTAMP,
        });
        asm.emit(Instr::SetDat {
            dst: SLOT_LAST_TX_TIMESTAMP,
            src: SLOT_CREATION_TIMESTAMP,
        });
        asm.emit(Instr::ExtFun {
            func: FuncCode::PutCreatorIntoB,
        });
        asm.emit(Instr::ExtFunDat {
            func: FuncCode::CopyBIntoData,
            slot: SLOT_CREATOR_ADDRESS,
        });
        // offer deadline = creation timestamp + trade timeout minutes * 60
        asm.emit(Instr::SetDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_TRADE_TIMEOUT_MINUTES,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_TMP_B,
            value: 60,
        });
        asm.emit(Instr::MulDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_TMP_B,
        });
        asm.emit(Instr::AddDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_CREATION_TIMESTAMP,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_MODE,
            value: AcctMode::Offering as u64,
        });

        // Phase 2: wait for a trade message from the creator's trade address
        // or a cancel message from the creator's main address. An elapsed
        // offer deadline refunds the creator.
        asm.bind(offering_poll);
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetBlockTimestamp,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::BgeDat {
            lhs: SLOT_TMP_A,
            rhs: SLOT_REFUND_DEADLINE,
            target: refund,
        });
        asm.emit(Instr::ExtFunDat {
            func: FuncCode::PutTxAfterTimestampIntoA,
            slot: SLOT_LAST_TX_TIMESTAMP,
        });
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::CheckAIsZero,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::BzrDat {
            slot: SLOT_TMP_A,
            target: offering_have_tx,
        });
        asm.emit(Instr::SlpImd);
        asm.emit(Instr::JmpAdr {
            target: offering_poll,
        });

        asm.bind(offering_have_tx);
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetTimestampForTxInA,
            ret: SLOT_LAST_TX_TIMESTAMP,
        });
        asm.emit(Instr::ExtFun {
            func: FuncCode::PutSenderOfTxInAIntoB,
        });
        asm.emit(Instr::ExtFunRetDat2 {
            func: FuncCode::CheckBEqualsData,
            ret: SLOT_TMP_A,
            slot: SLOT_CREATOR_TRADE_ADDRESS,
        });
        asm.emit(Instr::BzrDat {
            slot: SLOT_TMP_A,
            target: offering_check_cancel,
        });
        // Trade message: exact length or the transaction is not ours.
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetMessageLengthForTxInA,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::SetDat {
            dst: SLOT_TMP_B,
            src: SLOT_TRADE_MSG_LENGTH,
        });
        asm.emit(Instr::SubDat {
            dst: SLOT_TMP_B,
            src: SLOT_TMP_A,
        });
        asm.emit(Instr::BnzDat {
            slot: SLOT_TMP_B,
            target: offering_poll,
        });
        // Partner details land on their slots verbatim.
        asm.emit(Instr::ExtFunDat {
            func: FuncCode::CopyMessageIntoData,
            slot: SLOT_PARTNER_TRADE_ADDRESS,
        });
        // refund deadline = block timestamp + refund timeout minutes * 60
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetBlockTimestamp,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::SetDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_REFUND_TIMEOUT_MINUTES,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_TMP_B,
            value: 60,
        });
        asm.emit(Instr::MulDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_TMP_B,
        });
        asm.emit(Instr::AddDat {
            dst: SLOT_REFUND_DEADLINE,
            src: SLOT_TMP_A,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_MODE,
            value: AcctMode::Trading as u64,
        });
        asm.emit(Instr::JmpAdr {
            target: trading_poll,
        });

        asm.bind(offering_check_cancel);
        asm.emit(Instr::ExtFunRetDat2 {
            func: FuncCode::CheckBEqualsData,
            ret: SLOT_TMP_A,
            slot: SLOT_CREATOR_ADDRESS,
        });
        asm.emit(Instr::BzrDat {
            slot: SLOT_TMP_A,
            target: offering_poll,
        });
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetMessageLengthForTxInA,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::SetDat {
            dst: SLOT_TMP_B,
            src: SLOT_CANCEL_MSG_LENGTH,
        });
        asm.emit(Instr::SubDat {
            dst: SLOT_TMP_B,
            src: SLOT_TMP_A,
        });
        asm.emit(Instr::BnzDat {
            slot: SLOT_TMP_B,
            target: offering_poll,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_MODE,
            value: AcctMode::Cancelled as u64,
        });
        asm.emit(Instr::FinImd);

        // Phase 3: wait for a redeem message from the registered partner
        // carrying the correct secret preimage, or an elapsed refund
        // deadline.
        asm.bind(trading_poll);
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetBlockTimestamp,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::BgeDat {
            lhs: SLOT_TMP_A,
            rhs: SLOT_REFUND_DEADLINE,
            target: refund,
        });
        asm.emit(Instr::ExtFunDat {
            func: FuncCode::PutTxAfterTimestampIntoA,
            slot: SLOT_LAST_TX_TIMESTAMP,
        });
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::CheckAIsZero,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::BzrDat {
            slot: SLOT_TMP_A,
            target: trading_have_tx,
        });
        asm.emit(Instr::SlpImd);
        asm.emit(Instr::JmpAdr {
            target: trading_poll,
        });

        asm.bind(trading_have_tx);
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetTimestampForTxInA,
            ret: SLOT_LAST_TX_TIMESTAMP,
        });
        asm.emit(Instr::ExtFun {
            func: FuncCode::PutSenderOfTxInAIntoB,
        });
        asm.emit(Instr::ExtFunRetDat2 {
            func: FuncCode::CheckBEqualsData,
            ret: SLOT_TMP_A,
            slot: SLOT_PARTNER_TRADE_ADDRESS,
        });
        asm.emit(Instr::BzrDat {
            slot: SLOT_TMP_A,
            target: trading_poll,
        });
        asm.emit(Instr::ExtFunRet {
            func: FuncCode::GetMessageLengthForTxInA,
            ret: SLOT_TMP_A,
        });
        asm.emit(Instr::SetDat {
            dst: SLOT_TMP_B,
            src: SLOT_REDEEM_MSG_LENGTH,
        });
        asm.emit(Instr::SubDat {
            dst: SLOT_TMP_B,
            src: SLOT_TMP_A,
        });
        asm.emit(Instr::BnzDat {
            slot: SLOT_TMP_B,
            target: trading_poll,
        });
        asm.emit(Instr::ExtFunDat {
            func: FuncCode::CopyMessageIntoData,
            slot: SLOT_MSG_SECRET,
        });
        // Commitment check: HASH160 of the revealed preimage must equal the
        // hash of secret registered by the trade message.
        asm.emit(Instr::ExtFunDat2 {
            func: FuncCode::Hash160IntoData,
            slot_a: SLOT_MSG_SECRET,
            slot_b: SLOT_HASH_CHECK,
        });
        for word in 0..PKH_WORDS {
            asm.emit(Instr::SetDat {
                dst: SLOT_TMP_A,
                src: SLOT_HASH_CHECK + word,
            });
            asm.emit(Instr::SubDat {
                dst: SLOT_TMP_A,
                src: SLOT_HASH_OF_SECRET + word,
            });
            asm.emit(Instr::BnzDat {
                slot: SLOT_TMP_A,
                target: trading_poll,
            });
        }
        asm.emit(Instr::ExtFunDat2 {
            func: FuncCode::PayToAddressInData,
            slot_a: SLOT_REDEEM_AMOUNT,
            slot_b: SLOT_PAYOUT_ADDRESS,
        });
        asm.emit(Instr::SetVal {
            slot: SLOT_MODE,
            value: AcctMode::Redeemed as u64,
        });
        asm.emit(Instr::FinImd);

        // Phase 4: termination. The runtime releases any remaining balance to
        // the creator when the program finishes.
        asm.bind(refund);
        asm.emit(Instr::SetVal {
            slot: SLOT_MODE,
            value: AcctMode::Refunded as u64,
        });
        asm.emit(Instr::FinImd);

        asm.assemble()
    }

    /// Lays out the initial data segment for `params`.
    fn build_data(&self, params: &TradeParameters) -> Vec<u8> {
        let mut writer = DataSegmentWriter::new();

        writer.put_bytes(
            SLOT_CREATOR_TRADE_ADDRESS,
            ADDRESS_WORDS,
            params.creator_trade_address.as_bytes(),
        );
        writer.put_bytes(SLOT_CREATOR_FOREIGN_PKH, PKH_WORDS, &params.creator_foreign_pkh);
        writer.put_word(SLOT_REDEEM_AMOUNT, params.redeem_amount);
        writer.put_word(SLOT_EXPECTED_FOREIGN_AMOUNT, params.expected_foreign_amount);
        writer.put_word(SLOT_TRADE_TIMEOUT_MINUTES, params.trade_timeout_minutes);
        writer.put_word(SLOT_FOREIGN_CHAIN_ID, u64::from(self.chain.chain_id()));
        writer.put_word(SLOT_ACCT_VERSION, u64::from(self.version));
        writer.put_word(SLOT_TRADE_MSG_LENGTH, TRADE_MESSAGE_LENGTH as u64);
        writer.put_word(SLOT_REDEEM_MSG_LENGTH, REDEEM_MESSAGE_LENGTH as u64);
        writer.put_word(SLOT_CANCEL_MSG_LENGTH, CANCEL_MESSAGE_LENGTH as u64);
        writer.put_word(
            SLOT_PTR_PARTNER_TRADE_ADDRESS,
            u64::from(SLOT_PARTNER_TRADE_ADDRESS),
        );
        writer.put_word(SLOT_PTR_HASH_OF_SECRET, u64::from(SLOT_HASH_OF_SECRET));
        writer.put_word(SLOT_PTR_PAYOUT_ADDRESS, u64::from(SLOT_PAYOUT_ADDRESS));

        // Variables region starts zeroed; mode zero is Offering.
        writer.zero_through(SLOT_TMP_B);

        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acct::FOREIGN_PKH_BYTES;
    use crate::primitives::Address;

    fn params() -> TradeParameters {
        TradeParameters {
            creator_trade_address: Address([0x11; 20]),
            creator_foreign_pkh: vec![0x22; FOREIGN_PKH_BYTES],
            redeem_amount: 100,
            expected_foreign_amount: 1,
            trade_timeout_minutes: 120,
        }
    }

    #[test]
    fn build_is_deterministic() {
        let builder = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1);
        let a = builder.build(&params()).unwrap();
        let b = builder.build(&params()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.code_hash(), b.code_hash());
    }

    #[test]
    fn code_hash_ignores_trade_parameters() {
        let builder = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1);
        let a = builder.build(&params()).unwrap();

        let mut other = params();
        other.redeem_amount = 999;
        other.trade_timeout_minutes = 5000;
        let b = builder.build(&other).unwrap();

        assert_eq!(a.code, b.code);
        assert_eq!(a.code_hash(), b.code_hash());
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn code_hash_differs_per_variant() {
        let btc = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1)
            .build_code()
            .unwrap();
        let ltc = EscrowProgramBuilder::new(ForeignChain::Litecoin, 1)
            .build_code()
            .unwrap();
        let btc_v2 = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 2)
            .build_code()
            .unwrap();

        assert_ne!(Hash256::sha256(&btc), Hash256::sha256(&ltc));
        assert_ne!(Hash256::sha256(&btc), Hash256::sha256(&btc_v2));
    }

    #[test]
    fn build_rejects_invalid_parameters() {
        let builder = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1);

        let mut bad = params();
        bad.creator_foreign_pkh = vec![0; 33];
        assert!(matches!(builder.build(&bad), Err(BuildErr::Params(_))));

        let mut bad = params();
        bad.trade_timeout_minutes = 0;
        assert!(matches!(builder.build(&bad), Err(BuildErr::Params(_))));
    }

    #[test]
    fn data_segment_embeds_parameters_verbatim() {
        let builder = EscrowProgramBuilder::new(ForeignChain::Bitcoin, 1);
        let program = builder.build(&params()).unwrap();

        assert_eq!(program.data.len(), DATA_SEGMENT_BYTES);
        assert_eq!(read_word(&program.data, SLOT_REDEEM_AMOUNT), 100);
        assert_eq!(read_word(&program.data, SLOT_EXPECTED_FOREIGN_AMOUNT), 1);
        assert_eq!(read_word(&program.data, SLOT_TRADE_TIMEOUT_MINUTES), 120);
        assert_eq!(
            &read_bytes(&program.data, SLOT_CREATOR_TRADE_ADDRESS, ADDRESS_WORDS)[..20],
            &[0x11; 20]
        );
        assert_eq!(
            &read_bytes(&program.data, SLOT_CREATOR_FOREIGN_PKH, PKH_WORDS)[..20],
            &[0x22; 20]
        );
        // mode starts at Offering
        assert_eq!(
            AcctMode::from_word(read_word(&program.data, SLOT_MODE)),
            Some(AcctMode::Offering)
        );
    }

    #[test]
    fn envelope_roundtrip() {
        let builder = EscrowProgramBuilder::new(ForeignChain::Litecoin, 1);
        let program = builder.build(&params()).unwrap();
        let bytes = program.to_bytes();
        assert_eq!(DeployedProgram::from_bytes(&bytes).unwrap(), program);

        assert_eq!(
            DeployedProgram::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ProgramDecodeErr::Truncated)
        );

        let mut trailing = bytes;
        trailing.push(0);
        assert_eq!(
            DeployedProgram::from_bytes(&trailing),
            Err(ProgramDecodeErr::TrailingBytes)
        );
    }
}
