use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use argon2::{
    Argon2, PasswordHasher,
    password_hash::SaltString,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use clap::{Parser, Subcommand};
use ed25519_dalek::{
    SigningKey,
    pkcs8::{EncodePrivateKey, EncodePublicKey, spki::der::pem::LineEnding},
};
use sha2::{Digest, Sha256};

/// Operator tooling for authgate credentials.
///
/// - `keypair`: Ed25519 signing key pair for access tokens (PKCS#8 / SPKI PEM)
/// - `hash-password`: Argon2id PHC string for a local account
/// - `key-id`: the `kid` the server derives from a public key PEM
#[derive(Parser, Debug)]
#[command(name = "cred-gen", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write access_private.pem and access_public.pem into DIR
    Keypair {
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Overwrite existing files
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Read a password from stdin (first line) and print its Argon2id hash
    HashPassword,
    /// Print the key id of a public key PEM
    KeyId {
        #[arg(long, value_name = "FILE")]
        public_pem: PathBuf,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

// Must match the server: sha256 over the PEM body, first 8 bytes, hex.
fn key_id(public_key_pem: &str) -> String {
    let body: String = public_key_pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .flat_map(|l| l.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::encode(&Sha256::digest(body.as_bytes())[..8])
}

fn random_bytes<const N: usize>() -> CliResult<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| format!("random source failed: {e}"))?;
    Ok(bytes)
}

fn write_file(path: &Path, contents: &str, force: bool, private: bool) -> CliResult<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

fn keypair(out_dir: &Path, force: bool) -> CliResult<()> {
    fs::create_dir_all(out_dir)?;

    let signing_key = SigningKey::from_bytes(&random_bytes::<32>()?);
    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| format!("encoding private key failed: {e}"))?;
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| format!("encoding public key failed: {e}"))?;

    let private_path = out_dir.join("access_private.pem");
    let public_path = out_dir.join("access_public.pem");
    write_file(&private_path, &private_pem, force, true)?;
    write_file(&public_path, &public_pem, force, false)?;

    println!("private key: {}", private_path.display());
    println!("public key:  {}", public_path.display());
    println!("kid: {}", key_id(&public_pem));
    // Raw public key for publishing as an OKP JWK.
    println!(
        "jwk x: {}",
        URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes())
    );
    Ok(())
}

fn hash_password() -> CliResult<()> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err("empty password".into());
    }

    let salt = SaltString::encode_b64(&random_bytes::<16>()?)
        .map_err(|e| format!("salt encoding failed: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| format!("hashing failed: {e}"))?;

    println!("{hash}");
    Ok(())
}

fn main() -> CliResult<()> {
    match Args::parse().command {
        Command::Keypair { out_dir, force } => keypair(&out_dir, force),
        Command::HashPassword => hash_password(),
        Command::KeyId { public_pem } => {
            let pem = fs::read_to_string(&public_pem)?;
            println!("{}", key_id(&pem));
            Ok(())
        }
    }
}
