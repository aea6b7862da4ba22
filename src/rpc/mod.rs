// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! JSON-RPC surface for transaction submission and chain identity.
//!
//! Raw transactions arrive hex-encoded; the payload itself is the
//! platform's canonical JSON transaction encoding. Receipts are resolved
//! from the block-anchor store's proof claims.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use jsonrpsee::RpcModule;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aicf::anchor::AnchorStore;
use crate::db::Store;
use crate::mempool::{Address, Error as MempoolError, Mempool, Tx, TxId};
use crate::metrics::RPC_REQUESTS_TOTAL;
use crate::utils::{sha3_256, Clock};

const INVALID_PARAMS: i32 = -32602;
const POOL_REJECTED: i32 = -33000;

/// The canonical transaction payload carried inside the raw hex envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTx {
    pub sender: String,
    pub nonce: u64,
    pub fee: u64,
    pub gas: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub height: u64,
    pub job_id: String,
    pub provider_id: String,
    pub amount: Option<u64>,
    pub epoch: Option<u64>,
}

pub struct RpcContext<S, C> {
    pub chain_id: u64,
    pub mempool: Mutex<Mempool>,
    pub anchor: AnchorStore<S, C>,
    pub clock: C,
}

fn invalid_params(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(INVALID_PARAMS, message.into(), None::<()>)
}

fn pool_rejected(e: MempoolError) -> ErrorObjectOwned {
    ErrorObject::owned(POOL_REJECTED, e.to_string(), None::<()>)
}

fn internal(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(-32603, message.into(), None::<()>)
}

fn observe(method: &str, outcome: &str) {
    RPC_REQUESTS_TOTAL.with_label_values(&[method, outcome]).inc();
}

/// Build the RPC module over shared node state.
pub fn build_module<S, C>(
    ctx: Arc<RpcContext<S, C>>,
) -> anyhow::Result<RpcModule<Arc<RpcContext<S, C>>>>
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    let mut module = RpcModule::new(ctx);

    module.register_method("chain.getChainId", |_params, ctx, _ext| {
        observe("chain.getChainId", "ok");
        Ok::<u64, ErrorObjectOwned>(ctx.chain_id)
    })?;

    module.register_method("tx.sendRawTransaction", |params, ctx, _ext| {
        let raw_hex: String = params.one()?;
        let stripped = raw_hex.strip_prefix("0x").unwrap_or(&raw_hex);
        let raw = hex::decode(stripped).map_err(|e| {
            observe("tx.sendRawTransaction", "invalid");
            invalid_params(format!("bad raw transaction hex: {e}"))
        })?;
        let decoded: RawTx = serde_json::from_slice(&raw).map_err(|e| {
            observe("tx.sendRawTransaction", "invalid");
            invalid_params(format!("undecodable transaction: {e}"))
        })?;

        let tx = Tx {
            id: TxId(sha3_256(&raw)),
            sender: Address::new(decoded.sender),
            nonce: decoded.nonce,
            fee: decoded.fee,
            gas: decoded.gas,
            size: raw.len() as u64,
            received_at: ctx.clock.now(),
        };
        let txid = tx.id;
        ctx.mempool.lock().add(tx).map_err(|e| {
            observe("tx.sendRawTransaction", "rejected");
            pool_rejected(e)
        })?;
        observe("tx.sendRawTransaction", "ok");
        Ok::<String, ErrorObjectOwned>(txid.to_string())
    })?;

    module.register_method("tx.getTransactionReceipt", |params, ctx, _ext| {
        let txid: String = params.one()?;
        let claim = ctx.anchor.find_claim_by_tx_hash(&txid).map_err(|e| {
            observe("tx.getTransactionReceipt", "error");
            internal(e.to_string())
        })?;
        observe("tx.getTransactionReceipt", "ok");
        Ok::<Option<Receipt>, ErrorObjectOwned>(claim.map(|claim| Receipt {
            tx_hash: txid,
            height: claim.height,
            job_id: claim.job_id.0,
            provider_id: claim.provider_id.0,
            amount: claim.amount,
            epoch: claim.epoch,
        }))
    })?;

    Ok(module)
}

/// Bind and start the JSON-RPC server.
pub async fn serve<S, C>(
    listen: SocketAddr,
    ctx: Arc<RpcContext<S, C>>,
) -> anyhow::Result<ServerHandle>
where
    S: Store + Send + Sync + 'static,
    C: Clock + 'static,
{
    let module = build_module(ctx)?;
    let server = Server::builder().build(listen).await?;
    let addr = server.local_addr()?;
    info!(%addr, "rpc server listening");
    Ok(server.start(module))
}

#[cfg(test)]
mod tests {
    use jsonrpsee::core::params::ArrayParams;

    use super::*;
    use crate::aicf::provider::{JobId, ProviderId};
    use crate::db::MemoryDb;
    use crate::mempool::MempoolConfig;
    use crate::utils::ManualClock;

    fn context() -> Arc<RpcContext<MemoryDb, ManualClock>> {
        Arc::new(RpcContext {
            chain_id: 777,
            mempool: Mutex::new(Mempool::new(MempoolConfig::default())),
            anchor: AnchorStore::new(MemoryDb::new(), ManualClock::new(5_000.0)),
            clock: ManualClock::new(5_000.0),
        })
    }

    fn raw_tx_hex(sender: &str, nonce: u64) -> String {
        let raw = serde_json::to_vec(&RawTx {
            sender: sender.to_string(),
            nonce,
            fee: 1_000,
            gas: 21_000,
        })
        .unwrap();
        format!("0x{}", hex::encode(raw))
    }

    fn one_param(value: impl serde::Serialize) -> ArrayParams {
        let mut params = ArrayParams::new();
        params.insert(value).unwrap();
        params
    }

    #[tokio::test]
    async fn chain_id_round_trip() {
        let module = build_module(context()).unwrap();
        let chain_id: u64 = module
            .call("chain.getChainId", ArrayParams::new())
            .await
            .unwrap();
        assert_eq!(chain_id, 777);
    }

    #[tokio::test]
    async fn send_raw_transaction_lands_in_mempool() {
        let ctx = context();
        let module = build_module(ctx.clone()).unwrap();
        let txid: String = module
            .call("tx.sendRawTransaction", one_param(raw_tx_hex("alice", 0)))
            .await
            .unwrap();
        assert!(txid.starts_with("0x"));
        assert_eq!(ctx.mempool.lock().len(), 1);
        let pending = ctx.mempool.lock().pending_for(&Address::new("alice"));
        assert_eq!(pending[0].nonce, 0);
        assert_eq!(pending[0].received_at, 5_000.0);

        // resubmitting the same bytes is a duplicate
        let err = module
            .call::<_, String>("tx.sendRawTransaction", one_param(raw_tx_hex("alice", 0)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate nonce"));
    }

    #[tokio::test]
    async fn malformed_raw_transactions_are_invalid_params() {
        let module = build_module(context()).unwrap();
        let err = module
            .call::<_, String>("tx.sendRawTransaction", one_param("0xzz"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad raw transaction hex"));

        let err = module
            .call::<_, String>(
                "tx.sendRawTransaction",
                one_param(format!("0x{}", hex::encode(b"not json"))),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("undecodable transaction"));
    }

    #[tokio::test]
    async fn receipt_resolves_from_anchor_claims() {
        let ctx = context();
        ctx.anchor
            .record_proof_claim(
                42,
                &JobId::new("job_x"),
                &ProviderId::new("prov_9"),
                Some("0xfeed".to_string()),
                None,
                Some(1_234),
                Some(3),
                serde_json::Value::Null,
            )
            .unwrap();
        let module = build_module(ctx).unwrap();

        let receipt: Option<Receipt> = module
            .call("tx.getTransactionReceipt", one_param("0xfeed"))
            .await
            .unwrap();
        let receipt = receipt.unwrap();
        assert_eq!(receipt.height, 42);
        assert_eq!(receipt.job_id, "job_x");
        assert_eq!(receipt.amount, Some(1_234));

        let missing: Option<Receipt> = module
            .call("tx.getTransactionReceipt", one_param("0xdead"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
