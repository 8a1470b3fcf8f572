use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use edge_identity::commands::inspect::{ListObjectsCommand, MechanismsCommand};
use edge_identity::commands::keys::{
    AddressCommand, ChecksumCommand, DeleteAllExceptCommand, GenerateKeyPairCommand,
    ImportKeyCommand,
};
use edge_identity::commands::sign::SignCommand;
use edge_identity::commands::verify::VerifyCommand;
use edge_identity::commands::HashInput;
use edge_identity::utils::config::{CliOverrides, Config, TokenSettings};
use edge_identity::utils::output::print_error;

#[derive(Parser)]
#[command(name = "edge-identity")]
#[command(about = "Manage PKCS#11 token keys and produce Ethereum signatures")]
#[command(version = env!("EDGE_IDENTITY_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.toml (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the PKCS#11 module
    #[arg(long, global = true)]
    module: Option<PathBuf>,

    /// Label of the token to use
    #[arg(long, global = true)]
    token: Option<String>,

    /// How to obtain the PIN: none, prompt or env
    #[arg(long, global = true)]
    auth: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Input to sign or verify
#[derive(Args)]
#[group(required = true, multiple = false)]
struct HashArgs {
    /// Message, hashed with Keccak-256
    #[arg(long)]
    message: Option<String>,
    /// 32-byte hash as hex
    #[arg(long)]
    hash: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new secp256k1 or RSA key pair, or an AES key
    GenerateKeyPair {
        /// Label for the generated key
        #[arg(long)]
        label: String,
        /// Key id for the generated key (defaults to the label)
        #[arg(long)]
        keyid: Option<String>,
        /// Key type: EC, RSA or AES
        #[arg(long)]
        keytype: String,
        /// Key size (EC 256, AES 128/192/256, RSA 1024/2048/3072/4096)
        #[arg(long)]
        keysize: u32,
        /// Curve for EC keys; only S256 (secp256k1) is supported
        #[arg(long, default_value = "")]
        algorithm: String,
    },
    /// Sign a message or hash
    Sign {
        /// Label of the signing key
        #[arg(long)]
        label: String,
        /// Key id of the signing key
        #[arg(long)]
        keyid: Option<String>,
        #[command(flatten)]
        input: HashArgs,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify a signature against an on-token key
    Verify {
        /// Label of the key
        #[arg(long)]
        label: String,
        /// Key id of the key
        #[arg(long)]
        keyid: Option<String>,
        /// 65-byte signature as hex
        #[arg(long)]
        signature: String,
        #[command(flatten)]
        input: HashArgs,
    },
    /// Print the Ethereum address of an EC key
    Address {
        /// Label of the key
        #[arg(long)]
        label: String,
        /// Key id of the key
        #[arg(long)]
        keyid: Option<String>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the checksum of an AES key
    Checksum {
        /// Label of the key
        #[arg(long)]
        label: String,
    },
    /// Import raw AES key material
    ImportKey {
        /// Label for the imported key
        #[arg(long)]
        label: String,
        /// Key value as hex
        #[arg(long)]
        value: String,
    },
    /// List objects on the token
    ListObjects {
        /// Only list objects with this label
        #[arg(long)]
        label: Option<String>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every object except those with the given labels
    DeleteAllExcept {
        /// Labels to keep
        #[arg(long = "keep")]
        keep: Vec<String>,
        /// Proceed without confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// List mechanisms supported by the token
    Mechanisms {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_filter = if verbose {
        "edge_identity=debug"
    } else {
        "edge_identity=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    let overrides = CliOverrides {
        module: cli.module,
        token: cli.token,
        auth: cli.auth,
    };
    let settings = TokenSettings::resolve(&overrides, &config)?;

    match cli.command {
        Commands::GenerateKeyPair {
            label,
            keyid,
            keytype,
            keysize,
            algorithm,
        } => {
            GenerateKeyPairCommand::new(settings, label, keyid, keytype, keysize, algorithm)
                .execute()
        }
        Commands::Sign {
            label,
            keyid,
            input,
            json,
        } => {
            let input = HashInput::from_args(input.message, input.hash)?;
            SignCommand::new(settings, label, keyid, input, json).execute()
        }
        Commands::Verify {
            label,
            keyid,
            signature,
            input,
        } => {
            let input = HashInput::from_args(input.message, input.hash)?;
            VerifyCommand::new(settings, label, keyid, input, signature).execute()
        }
        Commands::Address { label, keyid, json } => {
            AddressCommand::new(settings, label, keyid, json).execute()
        }
        Commands::Checksum { label } => ChecksumCommand::new(settings, label).execute(),
        Commands::ImportKey { label, value } => {
            ImportKeyCommand::new(settings, label, value).execute()
        }
        Commands::ListObjects { label, json } => {
            ListObjectsCommand::new(settings, label, json).execute()
        }
        Commands::DeleteAllExcept { keep, force } => {
            DeleteAllExceptCommand::new(settings, keep, force).execute()
        }
        Commands::Mechanisms { json } => MechanismsCommand::new(settings, json).execute(),
    }
}
