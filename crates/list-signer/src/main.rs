use std::{fs, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use server_list::{parse_entries, ServerEntry, SignedServerList};

/// Env var containing the hex-encoded 32-byte Ed25519 private seed
const ENV_PRIVKEY: &str = "SERVER_LIST_PRIVKEY";

#[derive(Parser, Debug)]
#[command(name = "list-signer", version, about = "Sign and verify remote server lists")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign a newline-delimited list of hex server entries
    Sign(SignArgs),
    /// Verify a signed list against a pinned public key
    Verify(VerifyArgs),
    /// Derive and print the Ed25519 public key (hex) from SERVER_LIST_PRIVKEY seed
    Pubkey,
    /// Encode one server entry as a hex list line
    Encode(EncodeArgs),
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Input list, one hex entry per line
    #[arg(long)]
    list: PathBuf,
    /// Output signed JSON path
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct VerifyArgs {
    /// Signed JSON produced by `sign`
    #[arg(long)]
    signed: PathBuf,
    /// Pinned publisher public key file (hex, 32 bytes)
    #[arg(long, required = true)]
    pubkey_file: PathBuf,
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    #[arg(long)]
    address: String,
    #[arg(long)]
    web_port: u16,
    #[arg(long)]
    web_secret: String,
    /// Base64 DER web certificate
    #[arg(long)]
    web_certificate: String,
    #[arg(long, default_value_t = 0)]
    ssh_port: u16,
    #[arg(long, default_value = "")]
    ssh_username: String,
    #[arg(long, default_value = "")]
    ssh_password: String,
    #[arg(long, default_value = "")]
    ssh_host_key: String,
    #[arg(long, default_value_t = 0)]
    ssh_obfuscated_port: u16,
    #[arg(long, default_value = "")]
    ssh_obfuscated_key: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sign(args) => sign_cmd(args),
        Commands::Verify(args) => verify_cmd(args),
        Commands::Pubkey => pubkey_cmd(),
        Commands::Encode(args) => encode_cmd(args),
    }
}

fn sign_cmd(args: SignArgs) -> Result<()> {
    let text = fs::read_to_string(&args.list).with_context(|| format!("read {:?}", &args.list))?;
    // refuse to publish a list the client would reject
    let entries = parse_entries(&text).context("list contains a corrupt entry")?;
    let data: String = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let seed = seed_from_env()?;
    let signed = SignedServerList::sign(&seed, data).map_err(|e| anyhow!("sign: {e}"))?;
    write_json(&args.out, &signed)?;
    println!("signed {} entries -> {}", entries.len(), args.out.display());
    Ok(())
}

fn verify_cmd(args: VerifyArgs) -> Result<()> {
    let raw = fs::read(&args.signed).with_context(|| format!("read {:?}", &args.signed))?;
    let signed = SignedServerList::from_json(&raw).context("parse signed list")?;
    let pk_hex = read_pubkey_file(&args.pubkey_file)?;
    let entries = signed.verified_entries(&pk_hex).map_err(|e| anyhow!("verify failed: {e}"))?;
    println!("verify ok: entries={}", entries.len());
    for e in entries {
        println!("  {}:{}", e.address, e.web_port);
    }
    Ok(())
}

fn pubkey_cmd() -> Result<()> {
    let seed = seed_from_env()?;
    let pk = core_crypto::ed25519::public_key(&seed).map_err(|_| anyhow!("invalid ed25519 seed"))?;
    println!("{}", hex::encode(pk));
    let fp = core_crypto::digest::sha256(&pk);
    eprintln!("fingerprint sha256:{}", hex::encode(&fp[..8]));
    Ok(())
}

fn encode_cmd(args: EncodeArgs) -> Result<()> {
    let mut e = ServerEntry::new(args.address, args.web_port, args.web_secret, args.web_certificate);
    e.ssh_port = args.ssh_port;
    e.ssh_username = args.ssh_username;
    e.ssh_password = args.ssh_password;
    e.ssh_host_key = args.ssh_host_key;
    e.ssh_obfuscated_port = args.ssh_obfuscated_port;
    e.ssh_obfuscated_key = args.ssh_obfuscated_key;
    println!("{}", e.encode().context("encode entry")?);
    Ok(())
}

fn seed_from_env() -> Result<[u8; 32]> {
    let seed_hex = std::env::var(ENV_PRIVKEY).context(format!("missing env {} (hex 32 bytes)", ENV_PRIVKEY))?;
    parse_seed(&seed_hex)
}

fn parse_seed(seed_hex: &str) -> Result<[u8; 32]> {
    let seed = hex::decode(seed_hex.trim()).context("hex decode seed")?;
    seed.try_into().map_err(|_| anyhow!("{} must be 32 bytes hex", ENV_PRIVKEY))
}

/// Public key file contents; comment lines starting with '#' are skipped.
fn read_pubkey_file(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).context("read pubkey file")?;
    Ok(raw
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<String>()
        .trim()
        .to_string())
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(path, data).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
