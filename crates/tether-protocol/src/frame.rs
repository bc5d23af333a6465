//! Length-prefixed framing and stream reassembly.
//!
//! Wire format of one frame:
//!
//! ```text
//! +----------------+--------------+-----------------+
//! | length: u32 LE | code: u16 LE | payload (bytes) |
//! +----------------+--------------+-----------------+
//! ```
//!
//! `length` counts everything after itself, so it is always
//! `2 + payload.len()`.

use crate::{PacketCode, ProtocolError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Size of the packet code that follows the length prefix.
pub const CODE_LEN: usize = 2;

/// Largest `length` value accepted from the wire (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One complete frame: a packet code and its still-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The registered code of the payload's packet type.
    pub code: PacketCode,
    /// The serialized payload.
    pub payload: Vec<u8>,
}

/// Wraps a payload into a frame.
///
/// # Errors
/// Returns `ProtocolError::FrameTooLarge` if the frame would exceed
/// [`MAX_FRAME_LEN`].
pub fn encode_frame(code: PacketCode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = CODE_LEN + payload.len();
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + len);
    // `len` fits in u32: it is bounded by MAX_FRAME_LEN above.
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// What one [`FrameBuffer::push`] produced.
///
/// A bad length prefix stops reassembly, but frames completed before it in
/// the same push are still returned.
#[derive(Debug, Default)]
pub struct Pushed {
    /// Complete frames, in order.
    pub frames: Vec<Frame>,
    /// The framing error that stopped reassembly, if any. The buffer was
    /// cleared when it happened.
    pub error: Option<ProtocolError>,
}

/// Accumulates bytes until whole frames can be cut out of them.
///
/// A stream transport may deliver a frame in many pieces, or several
/// frames in one piece. `FrameBuffer` keeps whatever is incomplete
/// between calls to [`push`](Self::push).
///
/// Cloning copies the buffered bytes and the known length, so a clone
/// taken mid-frame continues independently of the original.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Length prefix of the frame at the front of `buf`, once read.
    expected: Option<usize>,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` and returns every frame that is now complete, in
    /// order.
    ///
    /// No frames and no error is the normal "wait for more bytes" state.
    ///
    /// A length prefix below [`CODE_LEN`] or above [`MAX_FRAME_LEN`] is
    /// reported in [`Pushed::error`]. The stream can't be resynchronized
    /// after that, so the buffer is cleared; frames completed earlier in
    /// the same call are kept.
    pub fn push(&mut self, data: &[u8]) -> Pushed {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        let mut error = None;
        loop {
            let len = match self.expected {
                Some(len) => len,
                None => {
                    if self.buf.len() < HEADER_LEN {
                        break;
                    }
                    let mut prefix = [0u8; HEADER_LEN];
                    prefix.copy_from_slice(&self.buf[..HEADER_LEN]);
                    let len = u32::from_le_bytes(prefix) as usize;

                    if len < CODE_LEN {
                        error = Some(ProtocolError::MalformedFrame(len));
                    } else if len > MAX_FRAME_LEN {
                        error = Some(ProtocolError::FrameTooLarge {
                            len,
                            max: MAX_FRAME_LEN,
                        });
                    }
                    if error.is_some() {
                        self.reset();
                        break;
                    }
                    self.expected = Some(len);
                    len
                }
            };

            if self.buf.len() < HEADER_LEN + len {
                break;
            }

            let mut frame: Vec<u8> = self.buf.drain(..HEADER_LEN + len).collect();
            self.expected = None;

            let code = PacketCode::from_le_bytes([frame[HEADER_LEN], frame[HEADER_LEN + 1]]);
            let payload = frame.split_off(HEADER_LEN + CODE_LEN);
            frames.push(Frame { code, payload });
        }
        Pushed { frames, error }
    }

    /// Discards everything buffered.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The length prefix of the pending frame, if it has been read.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected
    }
}
