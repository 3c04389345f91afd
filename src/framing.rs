//! Length-prefixed message framing for the MQI wire protocol.
//!
//! Every message travels as a single frame:
//!
//! ```text
//! <len>.\n<payload>.\n
//! ```
//!
//! `<len>` is the decimal byte length of `<payload>.\n` - the payload's
//! trailing terminator is counted, the prefix's own `.\n` is not. Payloads
//! are UTF-8.
//!
//! While a synchronous query runs, the engine emits a bare `.` heartbeat
//! byte roughly every two seconds. Heartbeats appear only at frame
//! boundaries, never inside a payload, so the decoder absorbs leading `.`
//! bytes before the digit run begins and nowhere else.

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::MqiError;

/// Maximum frame size (100MB) to prevent OOM from a corrupt length prefix.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Two-byte terminator closing both the length prefix and the payload.
const TERMINATOR: &[u8] = b".\n";

/// Decoder position while scanning for the length prefix.
enum DecodeState {
    /// Before the digit run; `.` bytes here are heartbeats.
    AwaitingLenOrHeartbeat,
    /// Inside the digit run; the next `.` must be followed by `\n`.
    ReadingLen,
}

/// Write one frame containing `payload` to the stream.
///
/// The frame is assembled in memory and written with a single `write_all`,
/// so a frame is either fully written or the write fails as a unit.
///
/// # Errors
///
/// Returns `MqiError::Transport` if the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), MqiError>
where
    W: AsyncWrite + Unpin,
{
    let body = payload.as_bytes();
    let len = body.len() + TERMINATOR.len();

    let mut frame = Vec::with_capacity(len + 12);
    frame.extend_from_slice(len.to_string().as_bytes());
    frame.extend_from_slice(TERMINATOR);
    frame.extend_from_slice(body);
    frame.extend_from_slice(TERMINATOR);

    writer.write_all(&frame).await.map_err(MqiError::Transport)?;
    writer.flush().await.map_err(MqiError::Transport)?;
    Ok(())
}

/// Read one frame from the stream, absorbing any heartbeat bytes that
/// precede the length prefix, and return its payload without the
/// terminator.
///
/// # Errors
///
/// - `MqiError::ConnectionClosed` - EOF before the length prefix completed.
/// - `MqiError::MalformedFrame` - junk bytes before the digit run, a
///   truncated payload, a missing terminator, an oversized length, or
///   invalid UTF-8.
/// - `MqiError::Transport` - any other I/O failure.
pub async fn read_frame<R>(reader: &mut R) -> Result<String, MqiError>
where
    R: AsyncBufRead + Unpin,
{
    let len = read_length_prefix(reader).await?;

    if len > MAX_FRAME_SIZE {
        return Err(MqiError::MalformedFrame(format!(
            "frame length {} exceeds maximum {} bytes",
            len, MAX_FRAME_SIZE
        )));
    }
    if len < TERMINATOR.len() {
        return Err(MqiError::MalformedFrame(format!(
            "frame length {} is shorter than the terminator",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MqiError::MalformedFrame("truncated payload".to_string())
        } else {
            MqiError::Transport(e)
        }
    })?;

    if &body[len - TERMINATOR.len()..] != TERMINATOR {
        return Err(MqiError::MalformedFrame(
            "payload does not end with the frame terminator".to_string(),
        ));
    }
    body.truncate(len - TERMINATOR.len());

    String::from_utf8(body)
        .map_err(|e| MqiError::MalformedFrame(format!("payload is not valid UTF-8: {}", e)))
}

/// Scan for and parse the decimal length prefix, discarding heartbeats.
async fn read_length_prefix<R>(reader: &mut R) -> Result<usize, MqiError>
where
    R: AsyncBufRead + Unpin,
{
    let mut state = DecodeState::AwaitingLenOrHeartbeat;
    let mut digits = String::new();

    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(MqiError::ConnectionClosed);
            }
            Err(e) => return Err(MqiError::Transport(e)),
        };

        match state {
            DecodeState::AwaitingLenOrHeartbeat => match byte {
                b'.' => continue, // heartbeat
                b'0'..=b'9' => {
                    digits.push(byte as char);
                    state = DecodeState::ReadingLen;
                }
                other => {
                    return Err(MqiError::MalformedFrame(format!(
                        "unexpected byte 0x{:02x} before length prefix",
                        other
                    )));
                }
            },
            DecodeState::ReadingLen => match byte {
                b'0'..=b'9' => digits.push(byte as char),
                b'.' => {
                    let next = match reader.read_u8().await {
                        Ok(b) => b,
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            return Err(MqiError::ConnectionClosed);
                        }
                        Err(e) => return Err(MqiError::Transport(e)),
                    };
                    if next != b'\n' {
                        return Err(MqiError::MalformedFrame(format!(
                            "length prefix not terminated by '\\n' (got 0x{:02x})",
                            next
                        )));
                    }
                    return digits.parse::<usize>().map_err(|_| {
                        MqiError::MalformedFrame(format!("unparseable frame length '{}'", digits))
                    });
                }
                other => {
                    return Err(MqiError::MalformedFrame(format!(
                        "unexpected byte 0x{:02x} inside length prefix",
                        other
                    )));
                }
            },
        }
    }
}
