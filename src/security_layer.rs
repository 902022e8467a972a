//! Security layer pipe (C11, §4.7): wraps a mechanism's `encode`/`decode`
//! closures into a buffered byte-stream API with length-prefixed framing
//! and a negotiated `maxoutbuf`.

use crate::error::{SaslError, Status};

/// A mechanism's per-message codec, installed on successful completion of
/// an exchange that negotiated `mech_ssf > 0` (§4.3 step 3, §4.7).
pub trait Codec: Send {
    /// Encrypt/sign one plaintext chunk into ciphertext (no framing).
    fn encode_frame(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SaslError>;
    /// Decrypt/verify one ciphertext frame back into plaintext.
    fn decode_frame(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SaslError>;
}

/// Buffered encode/decode pipe (C11). `encode` coalesces a scatter/gather
/// input into one buffer and invokes the mechanism's codec once per call;
/// `decode` buffers partial frames and invokes the codec once per complete
/// frame extracted from however much input has accumulated.
pub struct SecurityLayer {
    codec: Box<dyn Codec>,
    maxoutbuf: usize,
    encode_buffer: Vec<u8>,
    decode_input: Vec<u8>,
    decode_buffer: Vec<u8>,
}

const FRAME_LEN_PREFIX: usize = 4;

impl SecurityLayer {
    pub fn new(codec: Box<dyn Codec>, maxoutbuf: usize) -> Self {
        Self {
            codec,
            maxoutbuf,
            encode_buffer: Vec::new(),
            decode_input: Vec::new(),
            decode_buffer: Vec::new(),
        }
    }

    pub fn maxoutbuf(&self) -> usize {
        self.maxoutbuf
    }

    /// Coalesce `iov` into one plaintext buffer, encode it as a single
    /// frame, and return a reference to the conn-owned output buffer
    /// (valid until the next `encode` call, §4.7, §5 "Resource ownership").
    pub fn encode(&mut self, iov: &[&[u8]]) -> Result<&[u8], SaslError> {
        let mut plaintext = Vec::new();
        for chunk in iov {
            plaintext.extend_from_slice(chunk);
        }
        if plaintext.len() > self.maxoutbuf {
            return Err(SaslError::with_detail(
                Status::BufOver,
                format!(
                    "encode input {} exceeds negotiated maxoutbuf {}",
                    plaintext.len(),
                    self.maxoutbuf
                ),
            ));
        }
        let ciphertext = self.codec.encode_frame(&plaintext)?;
        self.encode_buffer.clear();
        self.encode_buffer
            .extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        self.encode_buffer.extend_from_slice(&ciphertext);
        Ok(&self.encode_buffer)
    }

    /// Feed transport-chunked input; extract and decode as many complete
    /// length-prefixed frames as are buffered, returning the concatenated
    /// plaintext (may be empty if no frame is complete yet).
    pub fn decode(&mut self, input: &[u8]) -> Result<&[u8], SaslError> {
        self.decode_input.extend_from_slice(input);
        self.decode_buffer.clear();
        loop {
            if self.decode_input.len() < FRAME_LEN_PREFIX {
                break;
            }
            let len = u32::from_be_bytes(self.decode_input[..FRAME_LEN_PREFIX].try_into().unwrap())
                as usize;
            if self.decode_input.len() < FRAME_LEN_PREFIX + len {
                break;
            }
            let frame = self.decode_input[FRAME_LEN_PREFIX..FRAME_LEN_PREFIX + len].to_vec();
            self.decode_input.drain(..FRAME_LEN_PREFIX + len);
            let plaintext = self.codec.decode_frame(&frame)?;
            self.decode_buffer.extend_from_slice(&plaintext);
        }
        Ok(&self.decode_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A trivial reversible codec (XOR with a fixed key) used only to
    /// exercise the framing pipe — not a real security layer (§12).
    struct XorCodec {
        key: u8,
    }

    impl Codec for XorCodec {
        fn encode_frame(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SaslError> {
            Ok(plaintext.iter().map(|b| b ^ self.key).collect())
        }
        fn decode_frame(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SaslError> {
            Ok(ciphertext.iter().map(|b| b ^ self.key).collect())
        }
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let mut sender = SecurityLayer::new(Box::new(XorCodec { key: 0x42 }), 8192);
        let mut receiver = SecurityLayer::new(Box::new(XorCodec { key: 0x42 }), 8192);

        let wire = sender
            .encode(&[&b"hello, "[..], &b"world"[..]])
            .unwrap()
            .to_vec();
        let plaintext = receiver.decode(&wire).unwrap();
        assert_eq!(plaintext, b"hello, world");
    }

    #[test]
    fn decode_buffers_partial_frames_across_calls() {
        let mut sender = SecurityLayer::new(Box::new(XorCodec { key: 0x01 }), 8192);
        let mut receiver = SecurityLayer::new(Box::new(XorCodec { key: 0x01 }), 8192);

        let wire = sender.encode(&[&b"split me"[..]]).unwrap().to_vec();
        let (first, second) = wire.split_at(2);
        assert!(receiver.decode(first).unwrap().is_empty());
        let plaintext = receiver.decode(second).unwrap();
        assert_eq!(plaintext, b"split me");
    }

    #[test]
    fn decode_yields_multiple_frames_from_one_call() {
        let mut sender = SecurityLayer::new(Box::new(XorCodec { key: 0x7f }), 8192);
        let mut receiver = SecurityLayer::new(Box::new(XorCodec { key: 0x7f }), 8192);

        let mut wire = sender.encode(&[&b"one"[..]]).unwrap().to_vec();
        wire.extend(sender.encode(&[&b"two"[..]]).unwrap());
        let plaintext = receiver.decode(&wire).unwrap();
        assert_eq!(plaintext, b"onetwo");
    }

    #[test]
    fn encode_rejects_input_larger_than_maxoutbuf() {
        let mut sender = SecurityLayer::new(Box::new(XorCodec { key: 0 }), 4);
        let result = sender.encode(&[&b"too long"[..]]);
        assert!(matches!(result, Err(e) if e.status == Status::BufOver));
    }
}
