// Modelchain CLI entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
use client::{Call, Client};

#[derive(Parser, Debug)]
#[command(author, version, about = "Modelchain token ledger and model marketplace")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity to act as
    #[arg(long, default_value = "admin")]
    id: String,

    /// Organization the identity belongs to
    #[arg(long, default_value = "Org1MSP")]
    msp: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Token ledger operations
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Model registry operations
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Open an account for the caller
    Register {
        /// Display name
        name: String,
    },
    /// Approve an account and assign its role (issuer only)
    Authorize {
        id: String,
        role: String,
    },
    /// Bind the administrator to the caller (issuer only)
    Bootstrap,
    /// Mint tokens to the caller (issuer only)
    Mint { amount: i64 },
    /// Burn tokens from the caller (issuer only)
    Burn { amount: i64 },
    /// Send tokens to another account
    Transfer { to: String, amount: i64 },
    /// Let a spender withdraw from the caller's account
    Approve { spender: String, amount: i64 },
    /// Show what a spender may still withdraw from an owner
    Allowance { owner: String, spender: String },
    /// Withdraw from an owner's account under an allowance
    TransferFrom { from: String, to: String, amount: i64 },
    /// Show the caller's balance
    Balance,
    /// Show another account's balance
    UserBalance { id: String },
    /// Show the total supply
    Supply,
    /// Set the upload and use fees (issuer only)
    SetPrices {
        upload: i64,
        #[arg(value_name = "USE")]
        use_price: i64,
    },
    /// Show the current fees
    Prices,
    /// Sell tokens to an account, minting whatever the issuer lacks
    Buy { to: String, amount: i64 },
}

#[derive(Subcommand, Debug)]
enum ModelCommands {
    /// Upload a model bundle by content identifier
    Upload {
        name: String,
        cid: String,
        /// Input tensor as name:type:shape:index, e.g. x:float:-1,4:0
        #[arg(long)]
        input: String,
        /// Output tensor as name:type:shape:index
        #[arg(long)]
        output: String,
    },
    /// Show a model
    Get { name: String },
    /// List all models
    List,
    /// List a developer's models
    ByDev { dev: String },
    /// Let another account run a model
    Authorize { name: String, user: String },
    /// Run a model on the raw tensor bytes in a file
    Run {
        name: String,
        #[arg(long)]
        input: PathBuf,
    },
    /// List uploads and runs that have not completed
    Pending,
    /// Classify and clear pending uploads and runs
    Reconcile,
    /// Clear one of your own pending uploads or runs once it is settled
    Acknowledge { tx_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::open(cli.config.as_deref(), &cli.id, &cli.msp).await?;

    match cli.command {
        Commands::Token { command: TokenCommands::Buy { to, amount } } => client.buy(&to, amount).await,
        Commands::Token { command } => client.run(token_call(command)).await,
        Commands::Model { command: ModelCommands::Run { name, input } } => {
            let bytes = tokio::fs::read(&input).await?;
            client.run(Call::run_model(&name, &bytes)).await
        }
        Commands::Model { command } => client.run(model_call(command)?).await,
    }
}

fn token_call(command: TokenCommands) -> Call {
    use TokenCommands::*;
    match command {
        Register { name } => Call::token("Register", vec![name]),
        Authorize { id, role } => Call::token("Authorize", vec![id, role]),
        Bootstrap => Call::token("Bootstrap", vec![]),
        Mint { amount } => Call::token("Mint", vec![amount.to_string()]),
        Burn { amount } => Call::token("Burn", vec![amount.to_string()]),
        Transfer { to, amount } => Call::token("Transfer", vec![to, amount.to_string()]),
        Approve { spender, amount } => Call::token("Approve", vec![spender, amount.to_string()]),
        Allowance { owner, spender } => Call::token("Allowance", vec![owner, spender]).read_only(),
        TransferFrom { from, to, amount } => Call::token("TransferFrom", vec![from, to, amount.to_string()]),
        Balance => Call::token("GetBalance", vec![]).read_only(),
        UserBalance { id } => Call::token("GetUserBalance", vec![id]).read_only(),
        Supply => Call::token("TotalSupply", vec![]).read_only(),
        SetPrices { upload, use_price } => Call::token("SetPrices", vec![upload.to_string(), use_price.to_string()]),
        Prices => Call::token("GetPrices", vec![]).read_only(),
        // handled by Client::buy
        Buy { to, amount } => Call::token("Transfer", vec![to, amount.to_string()]),
    }
}

fn model_call(command: ModelCommands) -> Result<Call> {
    use ModelCommands::*;
    Ok(match command {
        Upload { name, cid, input, output } => {
            let mut args = vec![name, cid];
            args.extend(tensor_args(&input)?);
            args.extend(tensor_args(&output)?);
            Call::model("SaveModel", args)
        }
        Get { name } => Call::model("GetModel", vec![name]).read_only(),
        List => Call::model("GetAllModels", vec![]).read_only(),
        ByDev { dev } => Call::model("GetModelsByDev", vec![dev]).read_only(),
        Authorize { name, user } => Call::model("Authorize", vec![name, user]),
        Run { name, .. } => Call::model("RunModel", vec![name]),
        Pending => Call::model("ListPending", vec![]).read_only(),
        Reconcile => Call::model("Reconcile", vec![]),
        Acknowledge { tx_id } => Call::model("Acknowledge", vec![tx_id]),
    })
}

/// Split `name:type:shape:index`; the shape may itself hold commas
fn tensor_args(spec: &str) -> Result<[String; 4]> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [name, datatype, shape, idx] => Ok([name, datatype, shape, idx].map(|s| s.to_string())),
        [name, datatype, shape] => Ok([name, datatype, shape, &"0"].map(|s| s.to_string())),
        _ => anyhow::bail!("tensor spec {:?} is not name:type:shape[:index]", spec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::Target;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("modelchain").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_token_commands_map_to_operations() {
        let cli = parse(&["--id", "issuer", "--msp", "Org2MSP", "token", "set-prices", "10", "5"]);
        assert_eq!(cli.id, "issuer");
        let Commands::Token { command } = cli.command else { panic!("expected a token command") };
        let call = token_call(command);
        assert_eq!(call.target, Target::Token);
        assert_eq!(call.function, "SetPrices");
        assert_eq!(call.args, vec!["10", "5"]);
        assert!(!call.read_only);

        let Commands::Token { command } = parse(&["token", "balance"]).command else { panic!() };
        assert!(token_call(command).read_only);
    }

    #[test]
    fn test_upload_arguments() {
        let cli = parse(&["model", "upload", "m1", "QmCid", "--input", "x:float:-1,4:0", "--output", "y:float:-1,2"]);
        let Commands::Model { command } = cli.command else { panic!("expected a model command") };
        let call = model_call(command).unwrap();
        assert_eq!(call.function, "SaveModel");
        assert_eq!(call.args, vec!["m1", "QmCid", "x", "float", "-1,4", "0", "y", "float", "-1,2", "0"]);

        let Commands::Model { command } = parse(&["model", "acknowledge", "tx-1"]).command else { panic!() };
        let call = model_call(command).unwrap();
        assert_eq!(call.function, "Acknowledge");
        assert!(!call.read_only);
    }

    #[test]
    fn test_bad_tensor_spec() {
        assert!(tensor_args("x:float").is_err());
        assert!(tensor_args("a:b:c:d:e").is_err());
    }
}
