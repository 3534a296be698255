//! Integration tests running ledger-style batches through a full runtime.
//!
//! The ledger engine understands three functions: `mint`, `transfer` and
//! `close`. Balances are decimal strings stored under account keys.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use lyncs_core::{
    Bytecode, Call, CallOutput, EngineError, Error, KeyRules, Runtime, RuntimeConfig,
    ScriptEngine, Session, SharedState, StateMap,
};
use serde_json::json;

// =============================================================================
// Test Engine
// =============================================================================

struct LedgerContext {
    functions: Vec<String>,
}

#[derive(Default)]
struct LedgerEngine {
    closed: AtomicUsize,
}

fn balance(state: &BTreeMap<String, Vec<u8>>, account: &str) -> i64 {
    state
        .get(account)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn field<'a>(session: &'a Session, name: &str) -> Result<&'a str, EngineError> {
    session.payload[name]
        .as_str()
        .ok_or_else(|| EngineError::Malformed(format!("missing {}", name)))
}

impl ScriptEngine for LedgerEngine {
    type Context = LedgerContext;

    fn compile(&self, source: &str) -> Result<(LedgerContext, Bytecode), EngineError> {
        if source.contains("os.") {
            return Err(EngineError::Sandbox("os is not available".to_string()));
        }
        let context = self.load(&Bytecode::new(source.as_bytes().to_vec()))?;
        Ok((context, Bytecode::new(source.as_bytes().to_vec())))
    }

    fn load(&self, bytecode: &Bytecode) -> Result<LedgerContext, EngineError> {
        let text = std::str::from_utf8(bytecode.as_bytes())
            .map_err(|_| EngineError::Load("not ledger bytecode".to_string()))?;
        Ok(LedgerContext {
            functions: text.split_whitespace().map(str::to_string).collect(),
        })
    }

    fn has_entry_point(&self, context: &LedgerContext, name: &str) -> bool {
        context.functions.iter().any(|f| f == name)
    }

    fn invoke(
        &self,
        context: &mut LedgerContext,
        function: &str,
        session: &Session,
    ) -> Result<Option<CallOutput>, EngineError> {
        if !self.has_entry_point(context, function) {
            return Err(EngineError::Runtime(format!("no function {}", function)));
        }
        let amount = session.payload["amount"].as_i64().unwrap_or(0);
        match function {
            "mint" => {
                let to = field(session, "to")?;
                let total = balance(&session.state, to) + amount;
                Ok(Some(
                    CallOutput::new().with_write(to, total.to_string().into_bytes()),
                ))
            }
            "transfer" => {
                let from = field(session, "from")?;
                let to = field(session, "to")?;
                let available = balance(&session.state, from);
                if available < amount {
                    return Ok(Some(CallOutput::new().with_extra(json!({"status": "insufficient"}))));
                }
                Ok(Some(
                    CallOutput::new()
                        .with_write(from, (available - amount).to_string().into_bytes())
                        .with_write(to, (balance(&session.state, to) + amount).to_string().into_bytes())
                        .with_extra(json!({"status": "ok"})),
                ))
            }
            "close" => Ok(Some(CallOutput::new().with_tombstone(field(session, "account")?))),
            _ => Ok(None),
        }
    }

    fn close(&self, _context: LedgerContext) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

const LEDGER: &str = "run mint transfer close";

fn runtime(workers: usize) -> Runtime<LedgerEngine> {
    let config = RuntimeConfig::default()
        .with_workers(workers)
        .with_slot_capacity(128);
    let runtime = Runtime::new(LedgerEngine::default(), config).unwrap();
    runtime.load_from_source("ledger", LEDGER).unwrap();
    runtime
}

fn mint(to: &str, amount: i64) -> Call {
    Call::new("ledger", "mint")
        .with_keys(KeyRules::new().write(to))
        .with_payload(json!({"to": to, "amount": amount}))
}

fn transfer(from: &str, to: &str, amount: i64) -> Call {
    Call::new("ledger", "transfer")
        .with_keys(KeyRules::new().write(from).write(to))
        .with_payload(json!({"from": from, "to": to, "amount": amount}))
}

/// Apply the same calls one at a time, in list order.
fn serial_reference(calls: &[Call]) -> StateMap {
    let engine = LedgerEngine::default();
    let mut context = engine.load(&Bytecode::new(LEDGER.as_bytes().to_vec())).unwrap();
    let mut map = StateMap::new();
    for (index, call) in calls.iter().enumerate() {
        let session = Session {
            index,
            program: call.program.clone(),
            function: call.function.clone(),
            state: call
                .keys
                .keys()
                .filter_map(|k| map.get(k).map(|v| (k.to_string(), v.clone())))
                .collect(),
            payload: call.payload.clone(),
        };
        if let Ok(Some(output)) = engine.invoke(&mut context, &call.function, &session) {
            for (key, value) in output.writes {
                if value.is_empty() {
                    map.remove(&key);
                } else {
                    map.insert(key, value);
                }
            }
        }
    }
    map
}

/// Deterministic pseudo-random batch of mints and transfers over few accounts.
fn random_batch(seed: u64, len: usize) -> Vec<Call> {
    let mut x = seed;
    let mut next = move || {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (x >> 33) as usize
    };
    let accounts = ["alice", "bob", "carol", "dave", "erin", "frank"];
    (0..len)
        .map(|_| {
            let a = accounts[next() % accounts.len()];
            let b = accounts[next() % accounts.len()];
            let amount = (next() % 50) as i64;
            if next() % 3 == 0 || a == b {
                mint(a, amount)
            } else {
                transfer(a, b, amount)
            }
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_reader_gets_writer_value() {
    let runtime = runtime(2);

    let calls = vec![
        mint("x", 7),
        Call::new("ledger", "transfer")
            .with_keys(KeyRules::new().read("x").write("sink"))
            .with_payload(json!({"from": "x", "to": "sink", "amount": 0})),
        mint("y", 3),
    ];
    let state = SharedState::new();
    let results = runtime.execute(&calls, &state);

    assert!(results.iter().all(|r| r.is_ok()));
    // The reader saw x = 7 and may not write it back.
    let reader = results[1].as_ref().unwrap();
    assert_eq!(reader.extra["status"], "ok");
    assert!(!reader.writes.contains_key("x"));
    assert_eq!(state.get("x").unwrap(), Some(b"7".to_vec()));
    assert_eq!(state.get("y").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_disjoint_writers_each_land() {
    let runtime = runtime(4);
    let calls: Vec<Call> = (0..32).map(|i| mint(&format!("acct{}", i), i)).collect();

    let mut map = StateMap::new();
    let results = runtime.execute_map(&calls, &mut map);

    assert_eq!(results.len(), 32);
    assert!(results.iter().all(|r| r.is_ok()));
    for i in 1..32 {
        assert_eq!(map[&format!("acct{}", i)], i.to_string().into_bytes());
    }
}

#[test]
fn test_matches_serial_execution_for_any_worker_count() {
    for seed in [1, 7, 42, 1234] {
        let calls = random_batch(seed, 120);
        let expected = serial_reference(&calls);

        for workers in 1..=4 {
            let runtime = runtime(workers);
            let mut map = StateMap::new();
            let results = runtime.execute_map(&calls, &mut map);

            assert_eq!(results.len(), calls.len());
            assert!(results.iter().all(|r| r.is_ok()));
            assert_eq!(map, expected, "seed {} with {} workers", seed, workers);
        }
    }
}

#[test]
fn test_small_slot_capacity_still_serial_equivalent() {
    let calls = random_batch(99, 60);
    let expected = serial_reference(&calls);

    let config = RuntimeConfig::default().with_workers(3).with_slot_capacity(2);
    let runtime = Runtime::new(LedgerEngine::default(), config).unwrap();
    runtime.load_from_source("ledger", LEDGER).unwrap();

    let mut map = StateMap::new();
    runtime.execute_map(&calls, &mut map);
    assert_eq!(map, expected);
}

#[test]
fn test_close_deletes_account() {
    let runtime = runtime(2);
    let calls = vec![
        mint("temp", 10),
        Call::new("ledger", "close")
            .with_keys(KeyRules::new().write("temp"))
            .with_payload(json!({"account": "temp"})),
        Call::new("ledger", "transfer")
            .with_keys(KeyRules::new().write("temp").write("other"))
            .with_payload(json!({"from": "temp", "to": "other", "amount": 1})),
    ];
    let state = SharedState::new();
    let results = runtime.execute(&calls, &state);

    assert_eq!(results[2].as_ref().unwrap().extra["status"], "insufficient");
    assert_eq!(state.get("temp").unwrap(), None);
    assert!(state.is_empty());
}

#[test]
fn test_missing_entry_point_creates_no_pool() {
    let runtime = Runtime::new(LedgerEngine::default(), RuntimeConfig::default()).unwrap();

    let err = runtime.load_from_source("broken", "mint transfer").unwrap_err();
    assert!(matches!(err, Error::EntryPointMissing { ref entry_point, .. } if entry_point == "run"));
    assert!(runtime.list().unwrap().is_empty());
    assert_eq!(runtime.engine().closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sandbox_violation_rejected() {
    let runtime = Runtime::new(LedgerEngine::default(), RuntimeConfig::default()).unwrap();
    let err = runtime.load_from_source("evil", "run os.execute").unwrap_err();
    assert!(matches!(err, Error::SandboxViolation { .. }));
}

#[test]
fn test_checkout_at_ceiling_fails_fast() {
    let runtime = runtime(2);
    let a = runtime.checkout("ledger").unwrap();
    let b = runtime.checkout("ledger").unwrap();

    let err = runtime.checkout("ledger").unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { limit: 2, .. }));
    assert_eq!(runtime.list().unwrap()[0].in_use, 2);

    drop(a);
    drop(b);
    assert_eq!(runtime.list().unwrap()[0].idle, 2);
}

#[test]
fn test_exhausted_pool_is_a_per_call_error() {
    let runtime = runtime(1);
    let held = runtime.checkout("ledger").unwrap();

    let calls = vec![mint("a", 1), mint("b", 2)];
    let state = SharedState::new();
    let results = runtime.execute(&calls, &state);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| matches!(r, Err(Error::PoolExhausted { .. }))));
    assert!(state.is_empty());
    drop(held);

    let results = runtime.execute(&calls, &state);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[test]
fn test_retirement_bounds_idle_set() {
    let config = RuntimeConfig::default().with_workers(3).with_retire_after(1);
    let runtime = Runtime::new(LedgerEngine::default(), config).unwrap();
    runtime.load_from_source("ledger", LEDGER).unwrap();

    let calls: Vec<Call> = (0..12).map(|i| mint(&format!("k{}", i), 1)).collect();
    let results = runtime.execute(&calls, &SharedState::new());

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(runtime.engine().closed.load(Ordering::SeqCst), 12);
    let stats = runtime.list().unwrap();
    assert_eq!(stats[0].idle, 0);
    assert_eq!(stats[0].in_use, 0);
}

#[test]
fn test_reload_from_bytecode_and_destroy() {
    let runtime = runtime(2);
    let bytecode = runtime.pools().bytecode("ledger").unwrap();

    runtime.load_from_bytecode("copy", bytecode).unwrap();
    let names: Vec<String> = runtime.list().unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["copy".to_string(), "ledger".to_string()]);

    let held = runtime.checkout("copy").unwrap();
    assert!(runtime.destroy("copy").unwrap_err().is_retryable());
    drop(held);
    runtime.destroy("copy").unwrap();
    assert!(!runtime.pools().contains("copy"));
}
