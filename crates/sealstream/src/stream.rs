//! Whole-stream helpers for callers that don't need incremental access.

use std::io::{self, Read, Write};

use crate::error::{StreamError, StreamResult};
use crate::reader::Reader;
use crate::writer::Writer;
use crate::{DEC_BUFFER_SIZE, ENC_BUFFER_SIZE};

/// Encrypt all of `source` into `dest` with the default cipher.
///
/// The writer is closed on every path; a copy error takes precedence over
/// a close error. On error the output must be treated as untrustworthy.
pub fn encrypt<R, W>(key: &[u8], source: &mut R, dest: W) -> StreamResult<u64>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut writer = Writer::new(dest, key)?;
    let copied = copy_buffered(source, &mut writer, ENC_BUFFER_SIZE);
    let closed = writer.close();

    let n = copied?;
    closed?;

    tracing::debug!(bytes = n, hash = %writer.hash(), "stream encrypted");
    Ok(n)
}

/// Decrypt all of `source` into `dest`. Returns the plaintext length.
pub fn decrypt<R, W>(key: &[u8], source: R, dest: &mut W) -> StreamResult<u64>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut reader = Reader::new(source, key)?;
    let copied = copy_buffered(&mut reader, dest, DEC_BUFFER_SIZE);
    let closed = reader.close();

    let n = copied?;
    closed?;

    tracing::debug!(bytes = n, hash = %reader.hash(), "stream decrypted");
    Ok(n)
}

fn copy_buffered<R, W>(source: &mut R, dest: &mut W, buf_size: usize) -> StreamResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; buf_size];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::from_io(e)),
        };
        dest.write_all(&buf[..n]).map_err(StreamError::from_io)?;
        total += n as u64;
    }

    Ok(total)
}
