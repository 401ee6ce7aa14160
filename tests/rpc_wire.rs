use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use serde_json::{json, Value};
use slot_forge::{
    Account, BalanceInjector, LedgerClient, LedgerDialect, MappingSlotFormula, RpcLedger,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TOKEN: Address = Address::repeat_byte(0x70);
const HOLDER: Address = Address::repeat_byte(0x44);
const SIGNER: Address = Address::repeat_byte(0x33);

fn tx_hash() -> B256 {
    B256::repeat_byte(0x22)
}

fn hex_word(value: U256) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

/// Scripted JSON-RPC node: records every request and answers from `respond`.
struct FakeNode {
    calls: Mutex<Vec<(String, Value)>>,
    receipt_polls: AtomicUsize,
    amount: U256,
}

impl FakeNode {
    fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn params(&self, method: &str) -> Value {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .unwrap_or_else(|| panic!("{method} was never called"))
    }

    fn respond(&self, method: &str) -> Value {
        let slot = MappingSlotFormula::solidity(0).slot_for_key(&HOLDER.into_word().0);
        match method {
            "eth_sendTransaction" => json!(tx_hash()),
            "eth_getTransactionReceipt" => {
                if self.receipt_polls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Value::Null
                } else {
                    json!({ "transactionHash": tx_hash(), "status": "0x1", "blockNumber": "0x7" })
                }
            }
            "debug_traceTransaction" => json!({
                "structLogs": [
                    { "pc": 0, "op": "PUSH1", "depth": 1, "stack": [] },
                    { "pc": 40, "op": "SLOAD", "depth": 1, "stack": [hex_word(slot)] },
                    { "pc": 41, "op": "RETURN", "depth": 1, "stack": ["0x20", "0x0"] }
                ]
            }),
            "eth_getStorageAt" => json!(hex_word(U256::ZERO)),
            "anvil_setStorageAt" => json!(true),
            "eth_call" => json!(hex_word(self.amount)),
            other => panic!("unexpected method {other}"),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn serve(mut stream: TcpStream, node: Arc<FakeNode>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let head_end = loop {
            if let Some(end) = find_head_end(&buf) {
                break end;
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        let total = head_end + content_length(&buf[..head_end]);
        while buf.len() < total {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let request: Value = serde_json::from_slice(&buf[head_end..total]).expect("json body");
        buf.drain(..total);

        let method = request["method"].as_str().expect("method").to_string();
        let params = request["params"].clone();
        let result = node.respond(&method);
        node.calls.lock().expect("calls").push((method, params));

        let body = json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }).to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn spawn_fake_node(amount: U256) -> (String, Arc<FakeNode>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let node = Arc::new(FakeNode {
        calls: Mutex::new(Vec::new()),
        receipt_polls: AtomicUsize::new(0),
        amount,
    });
    let shared = Arc::clone(&node);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&shared)));
        }
    });
    (format!("http://{addr}"), node)
}

#[tokio::test]
async fn test_injection_over_json_rpc_sends_expected_payloads() {
    let amount = U256::from(1_000u64);
    let (url, node) = spawn_fake_node(amount).await;
    let ledger = Arc::new(
        RpcLedger::connect(&url, LedgerDialect::Anvil)
            .expect("connect")
            .with_poll_interval(Duration::from_millis(10)),
    );
    let injector = BalanceInjector::new(ledger).with_signer(Account::signer(SIGNER));

    let record = injector
        .set_balance(TOKEN, Some(HOLDER), amount)
        .await
        .expect("injection over rpc");

    let slot = MappingSlotFormula::solidity(0).slot_for_key(&HOLDER.into_word().0);
    assert_eq!(record.slot.index, slot);
    assert_eq!(
        node.methods(),
        vec![
            "eth_sendTransaction",
            "eth_getTransactionReceipt",
            "eth_getTransactionReceipt",
            "debug_traceTransaction",
            "eth_getStorageAt",
            "anvil_setStorageAt",
            "eth_call",
        ]
    );

    let tx = node.params("eth_sendTransaction");
    assert_eq!(tx[0]["from"], json!("0x3333333333333333333333333333333333333333"));
    assert_eq!(tx[0]["to"], json!("0x7070707070707070707070707070707070707070"));

    let trace = node.params("debug_traceTransaction");
    assert_eq!(trace[0], json!(tx_hash()));
    assert_eq!(trace[1]["disableStorage"], json!(true));

    let write = node.params("anvil_setStorageAt");
    assert_eq!(write[1], json!(format!("{slot:#x}")));
    assert_eq!(write[2], json!(hex_word(amount)));
    assert_eq!(write[2].as_str().map(str::len), Some(66));

    assert_eq!(node.params("eth_getStorageAt")[2], json!("latest"));
}

#[tokio::test]
async fn test_wait_for_inclusion_polls_past_missing_receipt() {
    let (url, node) = spawn_fake_node(U256::ZERO).await;
    let ledger = RpcLedger::connect(&url, LedgerDialect::Hardhat)
        .expect("connect")
        .with_poll_interval(Duration::from_millis(10));

    let outcome = ledger
        .wait_for_inclusion(tx_hash())
        .await
        .expect("receipt");

    assert!(outcome.success);
    assert_eq!(outcome.block_number, Some(7));
    assert_eq!(node.receipt_polls.load(Ordering::SeqCst), 2);
    assert_eq!(node.params("eth_getTransactionReceipt"), json!([tx_hash()]));
}
