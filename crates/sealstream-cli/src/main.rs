//! sealstream: encrypt, decrypt and inspect block-encrypted streams
//!
//! Commands:
//!   encrypt <input> <output>                   - seal a file into a stream
//!   decrypt <input> <output> [--offset N] [--length N]
//!                                              - open a stream (optionally a byte range)
//!   inspect <input>                            - print header and block layout
//!   config show                                - print the active configuration

mod config;
mod key;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sealstream::{
    header::{parse_header, HEADER_SIZE},
    AeadTransform, CipherId, Reader, Writer, BLOCK_SIZE, ENC_BUFFER_SIZE,
};

use crate::config::{LogFormat, SealstreamConfig};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealstream",
    version,
    about = "Seekable authenticated stream encryption",
    long_about = "sealstream: seal files into fixed-size authenticated blocks and read them back, \
                  optionally starting at any plaintext offset"
)]
struct Cli {
    /// Path to sealstream.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALSTREAM_CONFIG",
        default_value = "~/.config/sealstream/config.toml"
    )]
    config: PathBuf,

    /// Key file (raw bytes or base64); overrides config crypto.key_file
    #[arg(long, short = 'k', env = "SEALSTREAM_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "SEALSTREAM_LOG")]
    log: Option<String>,

    /// Log format; overrides config
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file into a sealed block stream
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Cipher for the new stream (overrides config)
        #[arg(long)]
        cipher: Option<CipherId>,
    },

    /// Decrypt a sealed block stream
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Plaintext offset to start from
        #[arg(long)]
        offset: Option<u64>,
        /// Number of plaintext bytes to write (default: to the end)
        #[arg(long)]
        length: Option<u64>,
    },

    /// Print the header and block layout of a stream (no key needed)
    Inspect { input: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, cli.log_format.unwrap_or(config.logging.format));

    tracing::debug!(config = %config_path.display(), "sealstream starting");

    match cli.command {
        Commands::Encrypt { input, output, cipher } => {
            let key = resolve_key(&config, cli.key_file.as_deref())?;
            cmd_encrypt(&key, cipher.unwrap_or(config.crypto.cipher), &input, &output)
        }
        Commands::Decrypt { input, output, offset, length } => {
            let key = resolve_key(&config, cli.key_file.as_deref())?;
            cmd_decrypt(&key, &input, &output, offset, length)
        }
        Commands::Inspect { input } => cmd_inspect(&input),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

// ── Config, logging and keys ──────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<SealstreamConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(SealstreamConfig::default())
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn resolve_key(
    config: &SealstreamConfig,
    override_path: Option<&Path>,
) -> Result<zeroize::Zeroizing<Vec<u8>>> {
    let path = override_path
        .map(Path::to_path_buf)
        .or_else(|| config.crypto.key_file.clone())
        .context(
            "no key file configured\n\
             Pass --key-file, set SEALSTREAM_KEY_FILE, or set crypto.key_file in the config.",
        )?;
    key::load_key(&expand_tilde(&path))
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    expand_tilde_in(path, &std::env::var("HOME").unwrap_or_default())
}

fn expand_tilde_in(path: &Path, home: &str) -> PathBuf {
    match path.to_string_lossy().strip_prefix("~/") {
        Some(rest) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

// ── `sealstream encrypt` ──────────────────────────────────────────────────────

fn cmd_encrypt(key: &[u8], cipher: CipherId, input: &Path, output: &Path) -> Result<()> {
    let mut source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let sink = File::create(output).with_context(|| format!("creating {}", output.display()))?;

    let mut writer = Writer::with_cipher(BufWriter::new(sink), key, cipher)
        .with_context(|| format!("starting stream in {}", output.display()))?;

    let copied = pump(&mut source, &mut writer);
    let closed = writer.close().context("closing stream");
    // A closed stream of partial input still authenticates; don't leave it around.
    let total = match copied.and_then(|n| closed.map(|()| n)) {
        Ok(n) => n,
        Err(e) => {
            drop(writer);
            let _ = std::fs::remove_file(output);
            return Err(e).with_context(|| format!("encrypting {}", input.display()));
        }
    };

    tracing::info!(bytes = total, blocks = writer.blocks_written(), %cipher, "encrypted");
    println!("encrypted {} → {}", input.display(), output.display());
    println!("  bytes:  {}", fmt_bytes(total));
    println!("  blocks: {}", writer.blocks_written());
    println!("  cipher: {cipher}");
    println!("  hash:   {}", writer.hash());
    Ok(())
}

fn pump(source: &mut impl Read, writer: &mut impl Write) -> Result<u64> {
    let mut buf = vec![0u8; ENC_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading input"),
        };
        writer.write_all(&buf[..n]).context("writing stream")?;
        total += n as u64;
    }
}

// ── `sealstream decrypt` ──────────────────────────────────────────────────────

fn cmd_decrypt(
    key: &[u8],
    input: &Path,
    output: &Path,
    offset: Option<u64>,
    length: Option<u64>,
) -> Result<()> {
    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut reader = Reader::new_seekable(BufReader::new(source), key)
        .with_context(|| format!("opening stream {}", input.display()))?;

    if let Some(offset) = offset {
        reader
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking to plaintext offset {offset}"))?;
    }

    let mut sink = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let written = match length {
        Some(len) => std::io::copy(&mut (&mut reader).take(len), &mut sink),
        None => reader.copy_to(&mut sink).map_err(std::io::Error::from),
    };
    // The output is untrustworthy once decryption failed; don't leave it around.
    let written = match written {
        Ok(n) => n,
        Err(e) => {
            drop(sink);
            let _ = std::fs::remove_file(output);
            return Err(anyhow::Error::new(sealstream::StreamError::from_io(e)))
                .with_context(|| format!("decrypting {}", input.display()));
        }
    };
    sink.flush().context("flushing output")?;

    tracing::info!(bytes = written, "decrypted");
    println!("decrypted {} → {}", input.display(), output.display());
    println!("  bytes: {}", fmt_bytes(written));
    // The running hash only identifies the content after a full sequential pass.
    if offset.unwrap_or(0) == 0 && length.is_none() {
        println!("  hash:  {}", reader.hash());
    }
    Ok(())
}

// ── `sealstream inspect` ──────────────────────────────────────────────────────

fn cmd_inspect(input: &Path) -> Result<()> {
    let mut file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)
        .with_context(|| format!("reading header of {}", input.display()))?;
    let info = parse_header(&header)
        .with_context(|| format!("parsing header of {}", input.display()))?;
    let total = file.metadata().context("reading file size")?.len();

    let layout = BlockLayout::from_stream_len(total);

    println!("stream:      {}", input.display());
    println!("  version:   {}", info.version);
    println!("  cipher:    {} (id {})", info.cipher, info.cipher.as_u16());
    println!("  key bytes: {}", info.key_length);
    println!("  block:     {}", fmt_bytes(info.block_size as u64));
    println!("  blocks:    {}", layout.blocks);
    println!("  plaintext: {}", fmt_bytes(layout.plaintext));
    if layout.dangling > 0 {
        println!("  warning:   {} trailing bytes do not form a block", layout.dangling);
    }
    Ok(())
}

/// Block layout derived from the physical stream length alone.
#[derive(Debug, PartialEq, Eq)]
struct BlockLayout {
    blocks: u64,
    plaintext: u64,
    /// Bytes too short to be a block (truncated stream).
    dangling: u64,
}

impl BlockLayout {
    fn from_stream_len(total: u64) -> Self {
        let overhead = (AeadTransform::NONCE_SIZE + AeadTransform::TAG_SIZE) as u64;
        let stride = overhead + BLOCK_SIZE as u64;
        let body = total.saturating_sub(HEADER_SIZE as u64);

        let full = body / stride;
        let rest = body % stride;
        let mut layout = Self {
            blocks: full,
            plaintext: full * BLOCK_SIZE as u64,
            dangling: 0,
        };
        if rest >= overhead {
            layout.blocks += 1;
            layout.plaintext += rest - overhead;
        } else {
            layout.dangling = rest;
        }
        layout
    }
}

// ── `sealstream config show` ──────────────────────────────────────────────────

fn cmd_config_show(config: &SealstreamConfig, path: &Path) -> Result<()> {
    let source = if path.exists() { "file" } else { "defaults" };
    println!("# source: {} ({source})", path.display());
    print!("{}", toml::to_string_pretty(config).context("serializing config")?);
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fmt_bytes(n: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if n >= GIB {
        format!("{:.2} GiB", n as f64 / GIB as f64)
    } else if n >= MIB {
        format!("{:.2} MiB", n as f64 / MIB as f64)
    } else if n >= KIB {
        format!("{:.2} KiB", n as f64 / KIB as f64)
    } else {
        format!("{n} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_of_empty_stream() {
        // header + one empty block
        let layout = BlockLayout::from_stream_len(20 + 28);
        assert_eq!(layout, BlockLayout { blocks: 1, plaintext: 0, dangling: 0 });
    }

    #[test]
    fn layout_of_multi_block_stream() {
        let stride = (12 + BLOCK_SIZE + 16) as u64;
        let layout = BlockLayout::from_stream_len(20 + 2 * stride + 28 + 5);
        assert_eq!(
            layout,
            BlockLayout { blocks: 3, plaintext: 2 * BLOCK_SIZE as u64 + 5, dangling: 0 }
        );
    }

    #[test]
    fn layout_reports_truncated_tail() {
        let layout = BlockLayout::from_stream_len(20 + 10);
        assert_eq!(layout, BlockLayout { blocks: 0, plaintext: 0, dangling: 10 });
    }

    #[test]
    fn encrypt_then_decrypt_range_via_commands() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.bin");
        let sealed = dir.path().join("plain.bin.seal");
        let range = dir.path().join("range.bin");
        let full = dir.path().join("full.bin");

        let data: Vec<u8> = (0..BLOCK_SIZE + 500).map(|i| (i % 241) as u8).collect();
        std::fs::write(&plain, &data).unwrap();
        let key = [5u8; 32];

        cmd_encrypt(&key, CipherId::AesGcm, &plain, &sealed).unwrap();
        cmd_decrypt(&key, &sealed, &range, Some(BLOCK_SIZE as u64 - 3), Some(10)).unwrap();
        cmd_decrypt(&key, &sealed, &full, None, None).unwrap();

        assert_eq!(std::fs::read(&range).unwrap(), &data[BLOCK_SIZE - 3..BLOCK_SIZE + 7]);
        assert_eq!(std::fs::read(&full).unwrap(), data);
        cmd_inspect(&sealed).unwrap();
    }

    #[test]
    fn failed_decrypt_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.bin");
        let sealed = dir.path().join("plain.bin.seal");
        let out = dir.path().join("out.bin");
        std::fs::write(&plain, b"attack at dawn").unwrap();

        cmd_encrypt(&[1u8; 32], CipherId::ChaCha20Poly1305, &plain, &sealed).unwrap();
        let err = cmd_decrypt(&[2u8; 32], &sealed, &out, None, None).unwrap_err();
        assert!(format!("{err:#}").contains("authentication"));
        assert!(!out.exists());
    }

    #[test]
    fn failed_encrypt_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.seal");

        // Opening a directory works, reading from it does not.
        let err = cmd_encrypt(&[1u8; 32], CipherId::ChaCha20Poly1305, dir.path(), &out)
            .unwrap_err();
        assert!(format!("{err:#}").contains("reading input"));
        assert!(!out.exists());
    }

    #[test]
    fn tilde_is_expanded() {
        let home = "/home/tester";
        assert_eq!(expand_tilde_in(Path::new("~/k"), home), PathBuf::from("/home/tester/k"));
        assert_eq!(expand_tilde_in(Path::new("/abs/k"), home), PathBuf::from("/abs/k"));
        assert_eq!(expand_tilde(Path::new("/abs/k")), PathBuf::from("/abs/k"));
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(12), "12 B");
        assert_eq!(fmt_bytes(2048), "2.00 KiB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.00 MiB");
    }
}
