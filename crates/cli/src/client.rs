//! Runs CLI commands against a local, sled-backed host

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info};

use modelchain::build_host;
use modelchain::core::{init_tracing, ClientIdentity, LedgerHost, MarketConfig, Response, SledStorage, Storage};
use modelchain::registry::contract::INPUT_KEY;

/// Which contract a call addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Token,
    Model,
}

/// One operation to run
#[derive(Debug, Clone)]
pub struct Call {
    pub target: Target,
    pub function: String,
    pub args: Vec<String>,
    pub transient: HashMap<String, Vec<u8>>,
    /// Evaluate instead of submitting
    pub read_only: bool,
}

impl Call {
    pub fn token(function: &str, args: Vec<String>) -> Self {
        Self::new(Target::Token, function, args)
    }

    pub fn model(function: &str, args: Vec<String>) -> Self {
        Self::new(Target::Model, function, args)
    }

    /// `RunModel` with raw tensor bytes passed through the transient map
    pub fn run_model(name: &str, input: &[u8]) -> Self {
        let mut call = Self::model("RunModel", vec![name.to_string()]);
        call.transient.insert(INPUT_KEY.to_string(), STANDARD.encode(input).into_bytes());
        call
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn new(target: Target, function: &str, args: Vec<String>) -> Self {
        Self {
            target,
            function: function.to_string(),
            args,
            transient: HashMap::new(),
            read_only: false,
        }
    }
}

pub struct Client {
    config: MarketConfig,
    host: LedgerHost,
    identity: ClientIdentity,
}

impl Client {
    /// Load configuration, start logging and open the local state database
    pub async fn open(config_path: Option<&Path>, id: &str, msp: &str) -> Result<Self> {
        let config = MarketConfig::load(config_path).await.context("loading configuration")?;
        init_tracing(&config.log_level).map_err(anyhow::Error::msg)?;

        let storage = SledStorage::open(&config.storage.path)
            .with_context(|| format!("opening state database at {}", config.storage.path.display()))?;
        debug!("State database at {}", storage.path().display());
        let storage: Arc<dyn Storage> = Arc::new(storage);

        let host = build_host(&config, storage).context("building contracts")?;
        Ok(Self::with_host(config, host, ClientIdentity::new(id, msp)))
    }

    pub fn with_host(config: MarketConfig, host: LedgerHost, identity: ClientIdentity) -> Self {
        Self { config, host, identity }
    }

    /// Run a call and print its result
    pub async fn run(&self, call: Call) -> Result<()> {
        let response = self.execute(call).await?;
        print_response(&response);
        Ok(())
    }

    /// Send `amount` to `to`, minting whatever the caller's balance lacks first
    pub async fn buy(&self, to: &str, amount: i64) -> Result<()> {
        let balance = self.execute(Call::token("GetBalance", vec![]).read_only()).await?;
        let balance: i64 = String::from_utf8_lossy(&balance.payload)
            .parse()
            .context("decoding balance")?;

        if balance < amount {
            let shortfall = amount - balance;
            info!("Minting {} to cover a sale of {}", shortfall, amount);
            self.execute(Call::token("Mint", vec![shortfall.to_string()])).await?;
        }
        self.run(Call::token("Transfer", vec![to.to_string(), amount.to_string()])).await
    }

    async fn execute(&self, call: Call) -> Result<Response> {
        let contract = match call.target {
            Target::Token => &self.config.token.contract_name,
            Target::Model => &self.config.registry.contract_name,
        };
        let args: Vec<&str> = call.args.iter().map(String::as_str).collect();

        let response = if call.read_only {
            self.host.evaluate(contract, &call.function, &args, &self.identity).await
        } else {
            self.host.submit(contract, &call.function, &args, &self.identity, call.transient).await
        };

        if !response.is_ok() {
            match response.class {
                Some(class) => bail!("{} failed ({}): {}", call.function, class, response.message),
                None => bail!("{} failed: {}", call.function, response.message),
            }
        }
        Ok(response)
    }
}

fn print_response(response: &Response) {
    if !response.payload.is_empty() {
        println!("{}", render(&response.payload));
    }
    for event in &response.events {
        println!("event {}: {}", event.name, render(&event.payload));
    }
}

/// Pretty-print JSON payloads and pass text through
fn render(payload: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        }
        _ => String::from_utf8_lossy(payload).into_owned(),
    }
}
