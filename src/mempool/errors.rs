// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use super::pool::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("mempool is full")]
    PoolFull,
    #[error("duplicate nonce {nonce} from {sender}")]
    DuplicateNonce { sender: Address, nonce: u64 },
    #[error("replacement fee too low for nonce {nonce} from {sender}")]
    FeeTooLow { sender: Address, nonce: u64 },
    #[error("transaction declares zero gas")]
    ZeroGas,
}
