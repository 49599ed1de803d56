//! WAL record framing and payload.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tokmesh_core::error::{Error, Result};
use tokmesh_core::session::Session;

/// Upper bound on a single framed record. Anything larger is treated as a
/// corrupted length field.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Frame prefix: length (4) + crc (4).
pub(crate) const FRAME_PREFIX: usize = 8;

/// Mutation type carried in the frame's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalOp {
    /// New session enters the live set
    Create = 1,
    /// Existing session replaced (version bumped)
    Update = 2,
    /// Session leaves the live set
    Delete = 3,
}

impl WalOp {
    fn from_byte(byte: u8) -> Option<WalOp> {
        match byte {
            1 => Some(WalOp::Create),
            2 => Some(WalOp::Update),
            3 => Some(WalOp::Delete),
            _ => None,
        }
    }
}

/// Payload of one WAL record. `Delete` records carry neither session form;
/// `Create`/`Update` carry exactly one of `session` (plaintext) or
/// `enc_session` (base64 of the AEAD-sealed session JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Mutation type (redundant with the frame byte, kept for in-memory use)
    #[serde(skip)]
    pub op: WalOp,
    /// Wall-clock time of the mutation, ms since epoch
    pub ts: i64,
    /// Session ID the mutation applies to
    pub sid: String,
    /// Version the session holds after this mutation
    pub ver: u64,
    /// Plaintext session, when no cipher is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    /// Base64 AEAD-sealed session JSON, when a cipher is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_session: Option<String>,
}

// serde(skip) needs a default for deserialization; the real op comes from
// the frame's type byte.
impl Default for WalOp {
    fn default() -> Self {
        WalOp::Create
    }
}

impl WalRecord {
    /// Record for a session creation.
    pub fn create(ts: i64, session: Session) -> Self {
        WalRecord {
            op: WalOp::Create,
            ts,
            sid: session.id.as_str().to_string(),
            ver: session.version,
            session: Some(session),
            enc_session: None,
        }
    }

    /// Record for a session update.
    pub fn update(ts: i64, session: Session) -> Self {
        WalRecord {
            op: WalOp::Update,
            ts,
            sid: session.id.as_str().to_string(),
            ver: session.version,
            session: Some(session),
            enc_session: None,
        }
    }

    /// Record for a session deletion. Carries no session body.
    pub fn delete(ts: i64, sid: &str, ver: u64) -> Self {
        WalRecord {
            op: WalOp::Delete,
            ts,
            sid: sid.to_string(),
            ver,
            session: None,
            enc_session: None,
        }
    }

    /// Serialize into a framed record ready for appending.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.op as u8]);
        hasher.update(&payload);
        let crc = hasher.finalize();

        let length = (4 + 1 + payload.len()) as u32;
        let mut frame = Vec::with_capacity(FRAME_PREFIX + 1 + payload.len());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.push(self.op as u8);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode one framed record from the front of `bytes`.
    ///
    /// Returns `(record, bytes_consumed)` or a `FrameError` describing why
    /// the front of the buffer is not a record.
    pub fn decode(bytes: &[u8]) -> std::result::Result<(WalRecord, usize), FrameError> {
        if bytes.len() < FRAME_PREFIX {
            return Err(FrameError::Truncated);
        }
        let length = BigEndian::read_u32(&bytes[0..4]) as usize;
        if length < 5 || length > MAX_RECORD_SIZE {
            return Err(FrameError::BadLength(length));
        }
        if bytes.len() < 4 + length {
            return Err(FrameError::Truncated);
        }
        let stored_crc = BigEndian::read_u32(&bytes[4..8]);
        let type_byte = bytes[8];
        let payload = &bytes[9..4 + length];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[type_byte]);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(FrameError::ChecksumMismatch);
        }

        let op = WalOp::from_byte(type_byte).ok_or(FrameError::BadType(type_byte))?;
        let mut record: WalRecord =
            serde_json::from_slice(payload).map_err(|e| FrameError::Payload(e.to_string()))?;
        record.op = op;
        Ok((record, 4 + length))
    }

    /// Resolve the session carried by this record, opening the encrypted
    /// form with `cipher` when present.
    pub fn into_session(
        self,
        cipher: Option<&tokmesh_crypto::AeadCipher>,
    ) -> Result<Option<Session>> {
        match (self.session, self.enc_session) {
            (Some(session), None) => Ok(Some(session)),
            (None, Some(sealed)) => {
                let cipher = cipher.ok_or_else(|| {
                    Error::Corruption("encrypted record but no cipher configured".into())
                })?;
                let raw = base64_decode(&sealed)?;
                let plain = cipher
                    .decrypt(&raw, aad())
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(Some(serde_json::from_slice(&plain)?))
            }
            (None, None) => Ok(None),
            (Some(_), Some(_)) => Err(Error::Corruption(
                "record carries both plaintext and encrypted session".into(),
            )),
        }
    }

    /// Seal this record's plaintext session with `cipher`, replacing it with
    /// the base64 encrypted form. No-op for `Delete` records.
    pub fn seal_session(&mut self, cipher: &tokmesh_crypto::AeadCipher) -> Result<()> {
        if let Some(session) = self.session.take() {
            let plain = serde_json::to_vec(&session)?;
            let sealed = cipher
                .encrypt(&plain, aad())
                .map_err(|e| Error::Crypto(e.to_string()))?;
            self.enc_session = Some(base64_encode(&sealed));
        }
        Ok(())
    }
}

/// Associated data binding ciphertexts to their purpose.
fn aad() -> &'static [u8] {
    b"tokmesh-wal"
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD
        .decode(s)
        .map_err(|e| Error::Corruption(format!("bad base64 in record: {e}")))
}

/// Why the front of a buffer could not be decoded as a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the frame claims; expected at a crashed tail
    Truncated,
    /// Length field outside the sane range
    BadLength(usize),
    /// CRC32 over type ‖ payload does not match
    ChecksumMismatch,
    /// Type byte outside {1, 2, 3}
    BadType(u8),
    /// CRC was valid but the JSON payload did not parse
    Payload(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "truncated record"),
            FrameError::BadLength(len) => write!(f, "implausible record length {len}"),
            FrameError::ChecksumMismatch => write!(f, "record checksum mismatch"),
            FrameError::BadType(byte) => write!(f, "unknown record type {byte}"),
            FrameError::Payload(detail) => write!(f, "record payload error: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokmesh_core::session::SessionId;
    use tokmesh_core::time::now_millis;
    use tokmesh_crypto::AeadCipher;

    fn sample_session() -> Session {
        let now = now_millis();
        let id = SessionId::generate().unwrap();
        Session {
            shard_id: id.shard_id(16),
            id,
            user_id: "u1".into(),
            token_hash: "ab".repeat(32),
            ip_address: "127.0.0.1".into(),
            user_agent: "test".into(),
            device_id: "d1".into(),
            created_by: "tests".into(),
            created_at: now,
            expires_at: now + 60_000,
            last_active: now,
            last_access_ip: String::new(),
            last_access_ua: String::new(),
            data: BTreeMap::from([("k".to_string(), "v".to_string())]),
            version: 0,
            ttl: 60,
            is_deleted: false,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let session = sample_session();
        let record = WalRecord::create(session.created_at, session.clone());
        let frame = record.encode().unwrap();

        let (decoded, consumed) = WalRecord::decode(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.op, WalOp::Create);
        assert_eq!(decoded.sid, session.id.as_str());
        assert_eq!(decoded.into_session(None).unwrap(), Some(session));
    }

    #[test]
    fn delete_records_carry_no_session() {
        let record = WalRecord::delete(now_millis(), "tmss-x", 4);
        let frame = record.encode().unwrap();
        let (decoded, _) = WalRecord::decode(&frame).unwrap();
        assert_eq!(decoded.op, WalOp::Delete);
        assert_eq!(decoded.ver, 4);
        assert_eq!(decoded.into_session(None).unwrap(), None);
    }

    #[test]
    fn frame_layout_matches_wire_contract() {
        let record = WalRecord::delete(0, "tmss-x", 0);
        let frame = record.encode().unwrap();
        let length = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        // length counts crc + type + payload
        assert_eq!(4 + length, frame.len());
        assert_eq!(frame[8], 3); // Delete
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let record = WalRecord::delete(1, "tmss-x", 0);
        let mut frame = record.encode().unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(WalRecord::decode(&frame), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn bad_type_byte_is_rejected() {
        let record = WalRecord::delete(1, "tmss-x", 0);
        let mut frame = record.encode().unwrap();
        frame[8] = 9;
        // CRC covers the type byte, so flipping it trips the checksum first;
        // recompute the CRC to reach the type check.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&frame[8..]);
        let crc = hasher.finalize();
        frame[4..8].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(WalRecord::decode(&frame), Err(FrameError::BadType(9)));
    }

    #[test]
    fn truncated_frames_report_truncation() {
        let record = WalRecord::delete(1, "tmss-x", 0);
        let frame = record.encode().unwrap();
        assert_eq!(WalRecord::decode(&frame[..3]), Err(FrameError::Truncated));
        assert_eq!(
            WalRecord::decode(&frame[..frame.len() - 2]),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn implausible_length_is_bad_length() {
        let mut frame = vec![0xFFu8; 16];
        frame[0..4].copy_from_slice(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            WalRecord::decode(&frame),
            Err(FrameError::BadLength(_))
        ));
    }

    #[test]
    fn sealed_records_roundtrip_with_cipher() {
        let cipher = AeadCipher::new(&[5u8; 32]).unwrap();
        let session = sample_session();
        let mut record = WalRecord::update(session.created_at, session.clone());
        record.seal_session(&cipher).unwrap();
        assert!(record.session.is_none());
        assert!(record.enc_session.is_some());

        let frame = record.encode().unwrap();
        let (decoded, _) = WalRecord::decode(&frame).unwrap();
        assert_eq!(decoded.into_session(Some(&cipher)).unwrap(), Some(session));
    }

    #[test]
    fn sealed_record_without_cipher_is_an_error() {
        let cipher = AeadCipher::new(&[5u8; 32]).unwrap();
        let mut record = WalRecord::create(0, sample_session());
        record.seal_session(&cipher).unwrap();
        let (decoded, _) = WalRecord::decode(&record.encode().unwrap()).unwrap();
        assert!(decoded.into_session(None).is_err());
    }
}
