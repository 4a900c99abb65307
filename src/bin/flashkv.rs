// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! FlashKV CLI Tool
//!
//! Command-line driver for the store. Each invocation opens the store,
//! performs one operation and closes again; the process exit code is the
//! magnitude of the numeric status of the operation (0 on success).

use anyhow::Context;
use clap::{Parser, Subcommand};
use flashkv::sim::SimDevice;
use flashkv::{KvStore, KvsError, Status, KEY_SIZE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "flashkv")]
#[command(version = "0.1.0")]
#[command(about = "FlashKV CLI - key-value store on simulated flash", long_about = None)]
struct Cli {
    /// Data directory holding the storage file and the log
    #[arg(short, long, default_value = "data")]
    dir: PathBuf,

    /// User-data area size in bytes (only used when creating a new store)
    #[arg(short, long, default_value_t = 512 * 1024)]
    user_size: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store (or load an existing one) and report its state
    Init,

    /// Store a value under a key
    Put {
        /// Key (up to 128 bytes, zero-padded)
        key: String,

        /// Value bytes
        value: String,
    },

    /// Print the value stored under a key
    Get { key: String },

    /// Delete a key
    Delete { key: String },

    /// Check whether a key exists (prints 1 or 0)
    Exists { key: String },

    /// Replace the value of an existing key
    Update { key: String, value: String },

    /// Delete the storage file, discarding the whole store
    Wipe,
}

fn pad_key(key: &str) -> Result<[u8; KEY_SIZE], KvsError> {
    let bytes = key.as_bytes();
    if bytes.len() > KEY_SIZE {
        return Err(KvsError::InvalidParam {
            reason: format!("key longer than {} bytes", KEY_SIZE),
        });
    }
    let mut padded = [0u8; KEY_SIZE];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Wipe = cli.command {
        let path = SimDevice::storage_path(&cli.dir);
        if path.exists() {
            std::fs::remove_file(&path).context("removing storage file")?;
        }
        println!("wiped");
        return Ok(());
    }

    let mut store = KvStore::open(&cli.dir, cli.user_size)?;

    match &cli.command {
        Commands::Init => {
            println!("store ready ({} keys)", store.key_count());
        }
        Commands::Put { key, value } => {
            let key = pad_key(key)?;
            store.put(&key, value.as_bytes())?;
            println!("stored");
        }
        Commands::Get { key } => {
            let key = pad_key(key)?;
            let mut buf = vec![0u8; 64];
            let n = match store.get(&key, &mut buf) {
                Ok(n) => n,
                Err(KvsError::BufferTooSmall { required }) => {
                    buf.resize(required, 0);
                    store.get(&key, &mut buf)?
                }
                Err(err) => return Err(err.into()),
            };
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        }
        Commands::Delete { key } => {
            let key = pad_key(key)?;
            store.delete(&key)?;
            println!("deleted");
        }
        Commands::Exists { key } => {
            let key = pad_key(key)?;
            let found = store.exists(&key)?;
            println!("{}", if found { 1 } else { 0 });
        }
        Commands::Update { key, value } => {
            let key = pad_key(key)?;
            store.update(&key, value.as_bytes())?;
            println!("updated");
        }
        Commands::Wipe => unreachable!("handled before the store is opened"),
    }

    store.close()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = err
                .downcast_ref::<KvsError>()
                .map(KvsError::status)
                .unwrap_or(Status::Unknown);
            eprintln!("error: {:#} (status {})", err, status.code());
            // Exit codes are unsigned; report the status magnitude.
            ExitCode::from(status.code().unsigned_abs() as u8)
        }
    }
}
