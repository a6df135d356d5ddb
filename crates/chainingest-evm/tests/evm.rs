//! EVM modules driven through `BlockProcessor` against a canned JSON-RPC node.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use chainingest_core::ledger::tsv::encode_event;
use chainingest_core::{
    BlockId, BlockProcessor, ConsensusConfig, ErrorClass, HttpCall, HttpTransport, ModuleConfig,
    Node, ProcessorError, RawResponse, RequesterError,
};
use chainingest_evm::ens::{namehash, MAINNET_REGISTRY};
use chainingest_evm::erc20::TRANSFER_TOPIC;
use chainingest_evm::{Erc20Module, EvmModule};

// ─── Fixture chain ────────────────────────────────────────────────────────────

const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";
const CAROL: &str = "0x00000000000000000000000000000000000000c3";
const CREATED: &str = "0x00000000000000000000000000000000000000d4";
const MINER: &str = "0x00000000000000000000000000000000000000e5";
const VALIDATOR: &str = "0x00000000000000000000000000000000000000f6";
const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
const JUNK: &str = "0x000000000000000000000000000000000000007e";
const RESOLVER: &str = "0x4976fb03c32e5b8cfe2b6ccb31c09ba78ebaba41";

const HEIGHT: u64 = 16;
const BLOCK_HASH: &str = "0xb16";

fn word(hex_tail: &str) -> String {
    format!("0x{hex_tail:0>64}")
}

fn topic(address: &str) -> String {
    word(address.trim_start_matches("0x"))
}

fn abi_string(s: &str) -> String {
    let mut padded = hex::encode(s);
    while padded.len() % 64 != 0 {
        padded.push('0');
    }
    format!("0x{:0>64}{:0>64x}{padded}", "20", s.len())
}

fn header(parent: &str) -> Value {
    json!({
        "number": "0x10",
        "hash": BLOCK_HASH,
        "parentHash": parent,
        "timestamp": "0x6553f100",
        "miner": MINER,
        "baseFeePerGas": "0x5",
    })
}

fn tx(hash: &str, from: &str, to: Option<&str>, value: &str) -> Value {
    json!({
        "hash": hash, "from": from, "to": to, "value": value,
        "gasPrice": "0x9", "nonce": "0x1", "gas": "0x5208", "type": "0x2", "input": "0x"
    })
}

fn full_block() -> Value {
    let mut block = header("0xb15");
    block["transactions"] = json!([
        tx("0x01", ALICE, Some(BOB), "0x64"),
        tx("0x02", ALICE, Some(CAROL), "0x1"),
        tx("0x03", ALICE, None, "0x0"),
    ]);
    block["withdrawals"] = json!([{ "index": "0x0", "address": VALIDATOR, "amount": "0x2" }]);
    block
}

fn receipt(hash: &str) -> Value {
    match hash {
        "0x01" => json!({ "transactionHash": "0x01", "status": "0x1", "gasUsed": "0x5208", "effectiveGasPrice": "0x7", "contractAddress": null }),
        "0x02" => json!({ "transactionHash": "0x02", "status": "0x0", "gasUsed": "0x10", "effectiveGasPrice": "0x5", "contractAddress": null }),
        _ => json!({ "transactionHash": "0x03", "status": "0x1", "gasUsed": "0x1", "effectiveGasPrice": "0x6", "contractAddress": CREATED }),
    }
}

fn transfer_log(token: &str, from: &str, to: &str, value: &str) -> Value {
    json!({
        "address": token,
        "topics": [TRANSFER_TOPIC, topic(from), topic(to)],
        "data": word(value),
        "blockHash": BLOCK_HASH,
        "transactionHash": "0x01",
        "removed": false
    })
}

fn logs() -> Value {
    let mut nft = transfer_log(JUNK, ALICE, BOB, "0");
    nft["topics"].as_array_mut().unwrap().push(json!(word("7")));
    nft["data"] = json!("0x");
    json!([
        transfer_log(USDT, ALICE, BOB, "f4240"),
        transfer_log(JUNK, BOB, CAROL, "5"),
        nft,
        transfer_log(USDT, BOB, CAROL, "0"),
        transfer_log(USDT, CAROL, ALICE, "2"),
    ])
}

/// JSON-RPC node serving one mined block, a pending block, ERC-20 contract
/// calls and an ENS registry.
struct CannedNode {
    /// Parent hash this node reports, to simulate a fork.
    parent: &'static str,
    calls: Mutex<Vec<String>>,
    /// Block tag of every `eth_call`, in arrival order.
    call_tags: Mutex<Vec<String>>,
}

impl CannedNode {
    fn new() -> Self {
        Self::with_parent("0xb15")
    }

    fn with_parent(parent: &'static str) -> Self {
        Self {
            parent,
            calls: Mutex::new(Vec::new()),
            call_tags: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_tags(&self) -> Vec<String> {
        self.call_tags.lock().unwrap().clone()
    }

    fn eth_call(&self, to: &str, data: &str) -> Option<Value> {
        let selector = &data[..10.min(data.len())];
        let vitalik = format!("0x{}", hex::encode(namehash("vitalik.eth")));
        match (to, selector) {
            (USDT, "0x06fdde03") => Some(json!(abi_string("Tether USD"))),
            (USDT, "0x95d89b41") => Some(json!(abi_string("USDT"))),
            (USDT, "0x313ce567") => Some(json!(word("6"))),
            (USDT, "0x18160ddd") => Some(json!(word("e8d4a51000"))),
            (USDT, "0x70a08231") if data.ends_with(&ALICE[2..]) => Some(json!(word("2a"))),
            (MAINNET_REGISTRY, "0x0178b8bf") if data.ends_with(&vitalik[2..]) => {
                Some(json!(topic(RESOLVER)))
            }
            (MAINNET_REGISTRY, "0x0178b8bf") => Some(json!(word("0"))),
            (RESOLVER, "0x3b3b57de") => Some(json!(topic(CAROL))),
            _ => None,
        }
    }

    fn answer(&self, method: &str, params: &Value) -> Option<Value> {
        let first = params[0].clone();
        let result = match method {
            "eth_blockNumber" => json!("0x20"),
            "eth_getBlockByNumber" if first == "pending" => json!({
                "number": null,
                "hash": null,
                "parentHash": BLOCK_HASH,
                "timestamp": "0x6553f10c",
                "miner": null,
                "baseFeePerGas": "0x5",
                "transactions": [tx("0x99", BOB, Some(CAROL), "0x5"), tx("0x9a", CAROL, None, "0x0")]
            }),
            "eth_getBlockByNumber" if first == "0x10" => {
                let mut block = if params[1] == true { full_block() } else { header("") };
                block["parentHash"] = json!(self.parent);
                if params[1] == false {
                    block["transactions"] = json!(["0x01", "0x02", "0x03"]);
                }
                block
            }
            "eth_getTransactionReceipt" => receipt(first.as_str().unwrap_or_default()),
            "eth_getBlockReceipts" => json!([receipt("0x01"), receipt("0x02"), receipt("0x03")]),
            "eth_getLogs" => {
                assert_eq!(first["blockHash"], BLOCK_HASH);
                logs()
            }
            "eth_getBalance" if first == ALICE => json!("0xde0b6b3a7640000"),
            "eth_getBalance" => json!("0x0"),
            "eth_getCode" if first == USDT => json!("0x6080"),
            "eth_getCode" => json!("0x"),
            "eth_getTransactionCount" => json!("0x1f"),
            "eth_getTransactionByHash" => {
                let mut t = tx("0x01", ALICE, Some(USDT), "0x0");
                t["input"] = json!(format!("0xa9059cbb{}", &word("1")[2..]));
                t
            }
            "eth_sendRawTransaction" => json!("0xfeed"),
            "eth_call" => {
                self.call_tags
                    .lock()
                    .unwrap()
                    .push(params[1].as_str().unwrap_or_default().to_string());
                return self.eth_call(
                    first["to"].as_str().unwrap_or_default(),
                    first["data"].as_str().unwrap_or_default(),
                )
            }
            _ => return None,
        };
        Some(result)
    }

    fn respond(&self, req: &Value) -> Value {
        let method = req["method"].as_str().unwrap_or_default();
        match self.answer(method, &req["params"]) {
            Some(result) => json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }),
            None => json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32000, "message": "execution reverted" }
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for CannedNode {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, RequesterError> {
        let body: Value = serde_json::from_str(call.body.as_deref().unwrap_or("null")).unwrap();
        let reply = match &body {
            Value::Array(reqs) => {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("batch:{}", reqs.len()));
                // answer out of order; the dispatcher realigns by id
                Value::Array(reqs.iter().rev().map(|r| self.respond(r)).collect())
            }
            req => {
                self.calls
                    .lock()
                    .unwrap()
                    .push(req["method"].as_str().unwrap_or_default().to_string());
                self.respond(req)
            }
        };
        Ok(RawResponse::new(200, serde_json::to_vec(&reply).unwrap()))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn config(name: &str, settings: &[(&str, &str)]) -> ModuleConfig {
    let mut config = ModuleConfig::new(name, vec![Node::new("http://node")]);
    for (k, v) in settings {
        config.settings.insert(k.to_string(), v.to_string());
    }
    config
}

async fn native(node: Arc<CannedNode>, settings: &[(&str, &str)]) -> BlockProcessor<EvmModule> {
    let mut processor = BlockProcessor::new(config("ethereum", settings), EvmModule::new(), node).unwrap();
    processor.initialize().await.unwrap();
    processor
}

async fn tokens(node: Arc<CannedNode>) -> BlockProcessor<Erc20Module> {
    let mut processor = BlockProcessor::new(config("erc20", &[]), Erc20Module::new(), node).unwrap();
    processor.initialize().await.unwrap();
    processor
}

fn rows(events: &[chainingest_core::ledger::Event]) -> Vec<(Option<&str>, &str, &str, Option<bool>)> {
    events
        .iter()
        .map(|e| (e.transaction.as_deref(), e.address.as_str(), e.effect.as_str(), e.failed))
        .collect()
}

// ─── Native module ────────────────────────────────────────────────────────────

#[tokio::test]
async fn native_block_splits_fees_and_pays_withdrawals() {
    let node = Arc::new(CannedNode::new());
    let processor = native(node.clone(), &[]).await;

    let out = processor.process_block(BlockId::Height(HEIGHT)).await.unwrap();
    assert_eq!(out.fingerprint.as_ref().and_then(|f| f.hash()), Some(BLOCK_HASH));
    assert!(out.currencies.is_empty());

    // fee = 21000 * 7 = 147000, burnt = 21000 * 5, tip = 21000 * 2
    assert_eq!(
        rows(&out.events),
        vec![
            (Some("0x01"), ALICE, "-100", None),
            (Some("0x01"), BOB, "100", None),
            (Some("0x01"), ALICE, "-147000", None),
            (Some("0x01"), MINER, "42000", None),
            (Some("0x01"), "the-void", "105000", None),
            (Some("0x02"), ALICE, "-1", Some(true)),
            (Some("0x02"), CAROL, "1", Some(true)),
            (Some("0x02"), ALICE, "-80", None),
            (Some("0x02"), "the-void", "80", None),
            (Some("0x03"), ALICE, "-6", None),
            (Some("0x03"), MINER, "1", None),
            (Some("0x03"), "the-void", "5", None),
            (None, "the-void", "-2000000000", None),
            (None, VALIDATOR, "2000000000", None),
        ]
    );
    assert!(out.events.iter().all(|e| e.block == HEIGHT as i64 && e.currency.is_none()));

    let calls = node.calls();
    assert_eq!(calls.iter().filter(|c| c.as_str() == "batch:3").count(), 1);

    let policy = processor.export_policy().unwrap();
    let line = encode_event(&out.events[1], policy);
    assert!(line.contains("\tethereum\t"), "{line}");
}

#[tokio::test]
async fn receipt_modes_agree() {
    let batch = native(Arc::new(CannedNode::new()), &[]).await;
    let expected = batch.process_block(BlockId::Height(HEIGHT)).await.unwrap();

    for mode in ["block", "multi"] {
        let node = Arc::new(CannedNode::new());
        let processor = native(node.clone(), &[("receipts", mode)]).await;
        let out = processor.process_block(BlockId::Height(HEIGHT)).await.unwrap();
        assert_eq!(out.events, expected.events, "receipts = {mode}");

        let calls = node.calls();
        match mode {
            "block" => assert!(calls.contains(&"eth_getBlockReceipts".to_string())),
            _ => assert_eq!(
                calls.iter().filter(|c| c.as_str() == "eth_getTransactionReceipt").count(),
                3
            ),
        }
        assert!(!calls.iter().any(|c| c.starts_with("batch:")));
    }
}

#[tokio::test]
async fn unknown_receipt_mode_is_a_config_error() {
    let mut processor = BlockProcessor::new(
        config("ethereum", &[("receipts", "sometimes")]),
        EvmModule::new(),
        Arc::new(CannedNode::new()),
    )
    .unwrap();
    let err = processor.initialize().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn mempool_has_transfers_but_no_fees() {
    let processor = native(Arc::new(CannedNode::new()), &[]).await;
    let out = processor.process_block(BlockId::Mempool).await.unwrap();

    assert!(out.fingerprint.is_none());
    assert_eq!(
        rows(&out.events),
        vec![(Some("0x99"), BOB, "-5", None), (Some("0x99"), CAROL, "5", None)]
    );
    assert!(out.events.iter().all(|e| e.block == -1));
}

#[tokio::test]
async fn forked_node_fails_strict_consensus() {
    struct TwoNodes {
        a: CannedNode,
        b: CannedNode,
    }
    #[async_trait]
    impl HttpTransport for TwoNodes {
        async fn execute(&self, call: HttpCall) -> Result<RawResponse, RequesterError> {
            if call.url == "http://b" {
                self.b.execute(call).await
            } else {
                self.a.execute(call).await
            }
        }
    }

    let transport = Arc::new(TwoNodes {
        a: CannedNode::new(),
        b: CannedNode::with_parent("0xuncle"),
    });
    let mut config = ModuleConfig::new("ethereum", vec![Node::new("http://a"), Node::new("http://b")]);
    config.consensus = ConsensusConfig {
        enabled: true,
        break_on_first: false,
        sample_size: 2,
    };
    let mut processor = BlockProcessor::new(config, EvmModule::new(), transport).unwrap();
    processor.initialize().await.unwrap();

    let err = processor.process_block(BlockId::Height(HEIGHT)).await.unwrap_err();
    assert!(
        matches!(&err, ProcessorError::ConsensusMismatch { field, .. } if field == "parent_hash"),
        "{err}"
    );
    assert_eq!(err.class(), ErrorClass::Semantic);
}

#[tokio::test]
async fn native_capabilities() {
    let node = Arc::new(CannedNode::new());
    let processor = native(node.clone(), &[]).await;

    assert_eq!(processor.balance(ALICE, None).await.unwrap(), "1000000000000000000");
    assert!(matches!(
        processor.balance(ALICE, Some(USDT)).await,
        Err(ProcessorError::Unsupported { .. })
    ));
    let balances = processor
        .balances(&[BOB.to_string(), ALICE.to_string()], None)
        .await
        .unwrap();
    assert_eq!(balances, vec!["0", "1000000000000000000"]);

    let specials = processor.address_specials(USDT).await.unwrap();
    assert_eq!(specials["contract"], true);
    assert_eq!(specials["nonce"], 31);

    let specials = processor.transaction_specials("0x01").await.unwrap();
    assert_eq!(specials["selector"], "0xa9059cbb");
    assert_eq!(specials["contract_creation"], false);

    assert_eq!(processor.broadcast_transaction("0xf86c").await.unwrap(), "0xfeed");
    assert!(processor.broadcast_transaction("not hex").await.is_err());
    assert_eq!(processor.inquire_latest_block().await.unwrap(), 32);
}

#[tokio::test]
async fn ens_names_resolve_through_the_registry() {
    let processor = native(Arc::new(CannedNode::new()), &[]).await;
    assert_eq!(
        processor.resolve_handle("Vitalik.eth").await.unwrap().as_deref(),
        Some(CAROL)
    );
    assert_eq!(processor.resolve_handle("nobody.eth").await.unwrap(), None);
    assert_eq!(processor.resolve_handle("bad..name").await.unwrap(), None);

    let disabled = native(Arc::new(CannedNode::new()), &[("ens_registry", "none")]).await;
    assert!(matches!(
        disabled.resolve_handle("vitalik.eth").await,
        Err(ProcessorError::Unsupported { .. })
    ));
}

// ─── ERC-20 module ────────────────────────────────────────────────────────────

#[tokio::test]
async fn token_transfers_and_currency_metadata() {
    let node = Arc::new(CannedNode::new());
    let processor = tokens(node.clone()).await;
    let out = processor.process_block(BlockId::Height(HEIGHT)).await.unwrap();

    // metadata is read at the processed block, never at the tip
    let tags = node.call_tags();
    assert_eq!(tags.len(), 6);
    assert!(tags.iter().all(|t| t == "0x10"), "{tags:?}");

    let with_currency: Vec<_> = out
        .events
        .iter()
        .map(|e| (e.address.as_str(), e.currency.as_deref(), e.effect.as_str()))
        .collect();
    assert_eq!(
        with_currency,
        vec![
            (ALICE, Some(USDT), "-1000000"),
            (BOB, Some(USDT), "1000000"),
            (BOB, Some(JUNK), "-5"),
            (CAROL, Some(JUNK), "5"),
            (CAROL, Some(USDT), "-2"),
            (ALICE, Some(USDT), "2"),
        ]
    );

    assert_eq!(out.currencies.len(), 2);
    let usdt = &out.currencies[0];
    assert_eq!(usdt.id, USDT);
    assert_eq!(usdt.name.as_deref(), Some("Tether USD"));
    assert_eq!(usdt.symbol.as_deref(), Some("USDT"));
    assert_eq!(usdt.decimals, Some(6));
    let junk = &out.currencies[1];
    assert_eq!(junk.id, JUNK);
    assert!(junk.symbol.is_none() && junk.decimals.is_none());

    let line = encode_event(&out.events[0], processor.export_policy().unwrap());
    assert!(line.contains(&format!("\terc20/{USDT}\t")), "{line}");
}

#[tokio::test]
async fn token_module_has_no_mempool() {
    let processor = tokens(Arc::new(CannedNode::new())).await;
    assert!(matches!(
        processor.process_block(BlockId::Mempool).await,
        Err(ProcessorError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn token_balance_and_supply() {
    let node = Arc::new(CannedNode::new());
    let processor = tokens(node.clone()).await;
    assert_eq!(processor.balance(ALICE, Some(USDT)).await.unwrap(), "42");
    assert_eq!(processor.currency_supply(Some(USDT)).await.unwrap(), "1000000000000");
    assert_eq!(node.call_tags(), vec!["latest", "latest"]);

    let err = processor.balance(ALICE, None).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(matches!(
        processor.resolve_handle("vitalik.eth").await,
        Err(ProcessorError::Unsupported { .. })
    ));
}
