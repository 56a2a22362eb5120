use crate::{sha256_hex, LedgerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A named contract as persisted in `smart_contracts`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractBinding {
    pub address: String,
    pub abi: Value,
}

/// Connection to an external contract-capable chain.
pub trait ExternalChain: Send + Sync {
    /// Deploy compiled code and return the contract address.
    fn deploy(&self, bytecode: &str) -> anyhow::Result<String>;
    fn call(&self, address: &str, abi: &Value, function: &str, args: &[Value])
        -> anyhow::Result<Value>;
}

/// Where contracts run.
#[derive(Clone)]
pub enum ContractEngine {
    /// Simulated in-process. The code is kept as the binding's `abi` and its
    /// hash is the address.
    Local,
    External(Arc<dyn ExternalChain>),
}

impl ContractEngine {
    pub fn deploy(&self, code: &str) -> Result<ContractBinding> {
        match self {
            Self::Local => Ok(ContractBinding {
                address: sha256_hex(code.as_bytes()),
                abi: Value::String(code.to_string()),
            }),
            Self::External(chain) => {
                let address = chain
                    .deploy(code)
                    .map_err(|e| LedgerError::collaborator("contract deployment failed", e))?;
                Ok(ContractBinding {
                    address,
                    abi: Value::Array(vec![]),
                })
            }
        }
    }

    pub fn execute(
        &self,
        name: &str,
        binding: &ContractBinding,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        match self {
            Self::Local => Ok(Value::String(format!(
                "Executed {function} on {name} with args {}",
                args_tuple(args)
            ))),
            Self::External(chain) => chain
                .call(&binding.address, &binding.abi, function, args)
                .map_err(|e| LedgerError::collaborator("contract call failed", e)),
        }
    }
}

/// Render call arguments the way the Python node printed its `*args`
/// tuple: `()`, `('a',)`, `('a', 1)`.
fn args_tuple(args: &[Value]) -> String {
    let mut out = String::from("(");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(&mut out, arg);
    }
    if args.len() == 1 {
        out.push(',');
    }
    out.push(')');
    out
}

fn write_repr(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_str_repr(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_str_repr(out, key);
                out.push_str(": ");
                write_repr(out, item);
            }
            out.push('}');
        }
    }
}

/// Single quotes unless the text holds a `'` and no `"`.
fn write_str_repr(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

impl std::fmt::Debug for ContractEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::External(_) => f.write_str("External"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, Ledger, LedgerStore};
    use crate::clock::SystemClock;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl ExternalChain for Recorder {
        fn deploy(&self, _bytecode: &str) -> anyhow::Result<String> {
            Ok("0xabc".into())
        }

        fn call(
            &self,
            address: &str,
            _abi: &Value,
            function: &str,
            _args: &[Value],
        ) -> anyhow::Result<Value> {
            self.0.lock().unwrap().push(format!("{address}.{function}"));
            Ok(json!(true))
        }
    }

    #[derive(Default)]
    struct NullStore(Mutex<Option<Chain>>);

    impl LedgerStore for NullStore {
        fn load(&self) -> Result<Option<Chain>> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn save(&self, chain: &Chain) -> Result<()> {
            *self.0.lock().unwrap() = Some(chain.clone());
            Ok(())
        }
    }

    #[test]
    fn local_engine_addresses_by_code_hash() {
        let binding = ContractEngine::Local.deploy("contract Vault {}").unwrap();
        assert_eq!(binding.address, sha256_hex(b"contract Vault {}"));
        assert_eq!(binding.abi, json!("contract Vault {}"));
    }

    #[test]
    fn local_engine_simulates_calls() {
        let engine = ContractEngine::Local;
        let binding = engine.deploy("code").unwrap();
        let out = engine
            .execute("vault", &binding, "unlock", &[json!(1), json!("x")])
            .unwrap();
        assert_eq!(out, json!("Executed unlock on vault with args (1, 'x')"));
    }

    #[test]
    fn simulated_args_print_like_a_python_tuple() {
        assert_eq!(args_tuple(&[]), "()");
        assert_eq!(args_tuple(&[json!("a")]), "('a',)");
        assert_eq!(
            args_tuple(&[json!(null), json!(true), json!([1, 2.5]), json!({"k": "v"})]),
            "(None, True, [1, 2.5], {'k': 'v'})"
        );
        assert_eq!(args_tuple(&[json!("it's")]), "(\"it's\",)");
        assert_eq!(args_tuple(&[json!("a'b\"c\n")]), "('a\\'b\"c\\n',)");
    }

    #[test]
    fn external_engine_delegates() {
        let recorder = Arc::new(Recorder(Mutex::new(vec![])));
        let engine = ContractEngine::External(recorder.clone());
        let binding = engine.deploy("6080").unwrap();
        assert_eq!(binding.address, "0xabc");
        assert_eq!(engine.execute("t", &binding, "ping", &[]).unwrap(), json!(true));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["0xabc.ping".to_string()]);
    }

    #[test]
    fn ledger_registers_and_executes_contracts() {
        let store = Arc::new(NullStore::default());
        let mut ledger = Ledger::open(store.clone(), 1, Arc::new(SystemClock)).unwrap();
        let engine = ContractEngine::Local;
        let address = ledger.deploy_contract(&engine, "code", "vault").unwrap();
        assert_eq!(ledger.chain().contracts()["vault"].address, address);
        assert!(ledger.execute_contract(&engine, "vault", "f", &[]).is_ok());
        assert!(matches!(
            ledger.execute_contract(&engine, "missing", "f", &[]),
            Err(LedgerError::ContractNotFound(name)) if name == "missing"
        ));
        let stored = store.load().unwrap().unwrap();
        assert!(stored.contracts().contains_key("vault"));
    }
}
