//! Moving application data through a forged session.
//!
//! Each direction owns a buffer which must be empty whenever no call is in progress. Finding
//! bytes left in it means the wire and the session have drifted apart, and the flow is lost.

use crate::{
    errors::*,
    session::{ForgedSession, SessionReader, SessionWriter},
    tls::{
        Alert, AlertDescription, RecordHeader, RecordType, RECORD_HEADER_LEN, RECORD_MAX_SIZE,
        TLS_VERSION_1_2,
    },
};
use log::{info, trace, warn};
use snafu::ensure;

impl SessionWriter {
    /// Encrypt `plaintext` into application data records, returning their wire bytes.
    ///
    /// The plaintext is split into records of at most `max_fragment_len` bytes. Each record uses
    /// the next write sequence number. Empty input produces no records.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_outbound_empty()?;
        ensure!(!self.closed, SessionClosedSnafu);
        for fragment in plaintext.chunks(self.max_fragment_len) {
            self.seal_record(RecordType::ApplicationData, fragment)?;
        }
        Ok(std::mem::take(&mut self.outbound))
    }

    /// Close the write direction, returning a `close_notify` alert record.
    ///
    /// The writer is closed even if sealing the alert fails.
    pub fn shutdown(&mut self) -> Result<Vec<u8>> {
        self.check_outbound_empty()?;
        ensure!(!self.closed, SessionClosedSnafu);
        self.closed = true;
        let alert: [u8; 2] = Alert::CLOSE_NOTIFY.into();
        self.seal_record(RecordType::Alert, &alert[..])?;
        info!("Sent close_notify at sequence number {}", self.sequence.0 - 1);
        Ok(std::mem::take(&mut self.outbound))
    }

    fn check_outbound_empty(&self) -> Result<()> {
        if !self.outbound.is_empty() {
            warn!("{} bytes were already pending on the write side", self.outbound.len());
            return PendingOutboundSnafu {
                len: self.outbound.len(),
            }
            .fail();
        }
        Ok(())
    }

    fn seal_record(&mut self, record_type: RecordType, fragment: &[u8]) -> Result<()> {
        self.protection.seal(
            self.sequence,
            record_type,
            fragment,
            &self.rng,
            &mut self.outbound,
        )?;
        trace!(
            "Sealed {:?} record with {} bytes at sequence number {}",
            record_type,
            fragment.len(),
            self.sequence.0
        );
        self.sequence.increment();
        Ok(())
    }
}

impl SessionReader {
    /// Decrypt every record in `ciphertext`, returning the concatenated application data.
    ///
    /// `ciphertext` must end on a record boundary. If it doesn't, the partial record is kept and
    /// `TrailingInbound` is returned; because the buffer is no longer empty, every later call
    /// fails too.
    ///
    /// Output is all or nothing. If any record fails, the plaintext of the records before it is
    /// discarded along with the error, even though those records were consumed and the read
    /// sequence number moved past them.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !self.inbound.is_empty() {
            warn!("{} bytes were already pending on the read side", self.inbound.len());
            return PendingInboundSnafu {
                len: self.inbound.len(),
            }
            .fail();
        }
        self.inbound.extend_from_slice(ciphertext);
        let mut plaintext = Vec::with_capacity(ciphertext.len());
        let mut consumed = 0;
        let result = self.open_records(&mut plaintext, &mut consumed);
        self.inbound.drain(..consumed);
        result?;
        if !self.inbound.is_empty() {
            warn!(
                "{} bytes of a partial record were left after decrypting",
                self.inbound.len()
            );
            return TrailingInboundSnafu {
                len: self.inbound.len(),
            }
            .fail();
        }
        Ok(plaintext)
    }

    /// Open each complete record at the front of the inbound buffer. `consumed` is advanced past
    /// every record that was opened successfully.
    fn open_records(&mut self, plaintext: &mut Vec<u8>, consumed: &mut usize) -> Result<()> {
        let SessionReader {
            protection,
            sequence,
            inbound,
            peer_closed,
        } = self;
        while let Some(header) = RecordHeader::parse(&inbound[*consumed..]) {
            ensure!(
                header.version == TLS_VERSION_1_2,
                TLSVersionMismatchSnafu {
                    expected: TLS_VERSION_1_2,
                    actual: header.version,
                }
            );
            ensure!(
                header.size <= RECORD_MAX_SIZE,
                RecordTooBigSnafu { size: header.size }
            );
            let start = *consumed + RECORD_HEADER_LEN;
            let end = start + header.size;
            if end > inbound.len() {
                break;
            }
            ensure!(!*peer_closed, RecordAfterCloseNotifySnafu { header });
            let opened = match protection.open(*sequence, &header, &mut inbound[start..end]) {
                Ok(opened) => opened,
                Err(e) => {
                    warn!("Unable to open record {:?}: {}", header, e);
                    return Err(e);
                }
            };
            trace!(
                "Opened {:?} record with {} bytes at sequence number {}",
                header.record_type,
                opened.len(),
                sequence.0
            );
            match header.record_type {
                RecordType::ApplicationData => plaintext.extend_from_slice(opened),
                RecordType::Alert => {
                    let raw: [u8; 2] = opened.try_into().ok().ok_or(
                        StationError::InvalidAlert {
                            length: opened.len(),
                        },
                    )?;
                    let alert = Alert::from(raw);
                    if alert.description != AlertDescription::CloseNotify {
                        return SawAlertSnafu { alert }.fail();
                    }
                    info!("Received close_notify at sequence number {}", sequence.0);
                    *peer_closed = true;
                }
                _ => return UnexpectedRecordTypeSnafu { header }.fail(),
            }
            sequence.increment();
            *consumed = end;
        }
        Ok(())
    }
}

impl ForgedSession {
    /// See [`SessionWriter::encrypt`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.writer.encrypt(plaintext)
    }

    /// See [`SessionReader::decrypt`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.reader.decrypt(ciphertext)
    }

    /// See [`SessionWriter::shutdown`].
    pub fn shutdown(&mut self) -> Result<Vec<u8>> {
        self.writer.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::StationConfig,
        session::{forge, MasterKey, Role},
        tls::{ClientRandom, SequenceNumber, ServerRandom},
    };
    use proptest::prelude::*;

    const SUITES: &[u16] = &[0x002f, 0x003d, 0x009c, 0x009f, 0xcca8];

    fn pair(suite: u16, max_fragment_len: usize) -> (ForgedSession, ForgedSession) {
        let master_key = MasterKey::new(&[0x42; 48]).unwrap();
        let cr = ClientRandom([1; 32]);
        let sr = ServerRandom([2; 32]);
        let make = |role| {
            let config = StationConfig::builder()
                .role(role)
                .max_fragment_len(max_fragment_len)
                .build()
                .unwrap();
            forge(&config, suite, &cr, &sr, &master_key).unwrap()
        };
        (make(Role::Server), make(Role::Client))
    }

    #[test]
    fn test_opposite_roles_round_trip() {
        for suite in SUITES.iter().copied() {
            let (mut server, mut client) = pair(suite, 16384);
            let wire = server.encrypt(b"hello from the station").unwrap();
            assert_eq!(client.decrypt(&wire).unwrap(), b"hello from the station");
            let wire = client.encrypt(b"hello from the client").unwrap();
            assert_eq!(server.decrypt(&wire).unwrap(), b"hello from the client");
        }
    }

    #[test]
    fn test_same_role_cannot_read_its_own_records() {
        for suite in SUITES.iter().copied() {
            let (mut server, _) = pair(suite, 16384);
            let (mut other_server, _) = pair(suite, 16384);
            let wire = server.encrypt(b"hello").unwrap();
            let err = other_server.decrypt(&wire).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TransformFailure);
        }
    }

    #[test]
    fn test_sequence_numbers_advance_per_record() {
        let (mut server, mut client) = pair(0x009c, 4);
        assert_eq!(server.write_sequence(), SequenceNumber(1));
        let wire = server.encrypt(b"0123456789").unwrap();
        // Three records: 4 + 4 + 2 bytes.
        assert_eq!(server.write_sequence(), SequenceNumber(4));
        assert_eq!(client.decrypt(&wire).unwrap(), b"0123456789");
        assert_eq!(client.read_sequence(), SequenceNumber(4));
        assert!(server.encrypt(b"").unwrap().is_empty());
        assert_eq!(server.write_sequence(), SequenceNumber(4));
        assert!(client.decrypt(b"").unwrap().is_empty());
        assert_eq!(client.read_sequence(), SequenceNumber(4));
    }

    #[test]
    fn test_partial_record_desyncs() {
        let (mut server, mut client) = pair(0x002f, 16384);
        let wire = client.encrypt(b"hello").unwrap();
        let err = server.decrypt(&wire[..wire.len() - 1]).unwrap_err();
        assert!(matches!(err, StationError::TrailingInbound { .. }));
        assert_eq!(err.kind(), ErrorKind::ProtocolDesync);
        assert_eq!(server.pending_inbound(), wire.len() - 1);
        let err = server.decrypt(&wire[wire.len() - 1..]).unwrap_err();
        assert!(matches!(err, StationError::PendingInbound { .. }));
        assert_eq!(err.kind(), ErrorKind::ProtocolDesync);
    }

    #[test]
    fn test_pending_outbound_desyncs() {
        let (server, _) = pair(0x009c, 16384);
        let (_, mut writer) = server.into_split();
        writer
            .seal_record(RecordType::ApplicationData, b"stuck")
            .unwrap();
        let pending = writer.pending_outbound();
        assert!(pending > 0);
        assert_eq!(writer.sequence(), SequenceNumber(2));

        let err = writer.encrypt(b"hello").unwrap_err();
        assert!(matches!(err, StationError::PendingOutbound { len } if len == pending));
        assert_eq!(err.kind(), ErrorKind::ProtocolDesync);
        let err = writer.shutdown().unwrap_err();
        assert!(matches!(err, StationError::PendingOutbound { len } if len == pending));
        assert_eq!(err.kind(), ErrorKind::ProtocolDesync);

        assert_eq!(writer.sequence(), SequenceNumber(2));
        assert_eq!(writer.pending_outbound(), pending);
        assert!(!writer.is_closed());
    }

    #[test]
    fn test_failed_decrypt_discards_earlier_plaintext() {
        let (mut server, mut client) = pair(0x009c, 16384);
        let mut wire = client.encrypt(b"first").unwrap();
        let mut second = client.encrypt(b"second").unwrap();
        let last = second.len() - 1;
        second[last] ^= 1;
        wire.extend_from_slice(&second);
        let err = server.decrypt(&wire).unwrap_err();
        assert!(matches!(err, StationError::BadRecordMac { sequence_number: 2 }));
        assert_eq!(server.read_sequence(), SequenceNumber(2));
        assert_eq!(server.pending_inbound(), second.len());
    }

    #[test]
    fn test_records_before_a_partial_one_are_consumed() {
        let (mut server, mut client) = pair(0xcca8, 16384);
        let mut wire = client.encrypt(b"first").unwrap();
        let second = client.encrypt(b"second").unwrap();
        wire.extend_from_slice(&second[..3]);
        assert!(server.decrypt(&wire).is_err());
        assert_eq!(server.read_sequence(), SequenceNumber(2));
        assert_eq!(server.pending_inbound(), 3);
    }

    #[test]
    fn test_tampered_record_fails() {
        let (mut server, mut client) = pair(0x009f, 16384);
        let mut wire = client.encrypt(b"hello").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 1;
        let err = server.decrypt(&wire).unwrap_err();
        assert!(matches!(
            err,
            StationError::BadRecordMac { sequence_number: 1 }
        ));
        assert_eq!(server.read_sequence(), SequenceNumber(1));
    }

    #[test]
    fn test_bad_headers() {
        let (mut server, _) = pair(0x009c, 16384);
        let err = server.decrypt(&[23, 3, 1, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            StationError::TLSVersionMismatch {
                expected: 0x0303,
                actual: 0x0301
            }
        ));
        let (mut server, _) = pair(0x009c, 16384);
        let err = server.decrypt(&[23, 3, 3, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, StationError::RecordTooBig { size: 0xffff }));
        assert_eq!(err.kind(), ErrorKind::ProtocolDesync);
    }

    #[test]
    fn test_close_notify() {
        let (mut server, mut client) = pair(0x009c, 16384);
        let mut wire = client.encrypt(b"bye").unwrap();
        wire.extend_from_slice(&client.shutdown().unwrap());
        assert_eq!(server.decrypt(&wire).unwrap(), b"bye");
        assert!(server.reader.peer_closed());
        assert_eq!(server.read_sequence(), SequenceNumber(3));

        let err = client.encrypt(b"more").unwrap_err();
        assert!(matches!(err, StationError::SessionClosed));
        assert!(matches!(
            client.shutdown().unwrap_err(),
            StationError::SessionClosed
        ));

        // Anything after close_notify is out of place.
        let (mut fresh_server, mut fresh_client) = pair(0x009c, 16384);
        let mut wire = fresh_client.shutdown().unwrap();
        wire.extend_from_slice(&[23, 3, 3, 0, 0]);
        let err = fresh_server.decrypt(&wire).unwrap_err();
        assert!(matches!(err, StationError::RecordAfterCloseNotify { .. }));
    }

    #[test]
    fn test_other_alerts_fail() {
        let (mut server, client) = pair(0x009c, 16384);
        let (_, mut writer) = client.into_split();
        let fatal: [u8; 2] = Alert {
            level: crate::tls::AlertLevel::Fatal,
            description: AlertDescription::InternalError,
        }
        .into();
        writer.seal_record(RecordType::Alert, &fatal[..]).unwrap();
        let wire = std::mem::take(&mut writer.outbound);
        let err = server.decrypt(&wire).unwrap_err();
        assert!(matches!(err, StationError::SawAlert { .. }));
        assert_eq!(err.kind(), ErrorKind::TransformFailure);
    }

    #[test]
    fn test_split_halves_run_on_separate_threads() {
        let (server, client) = pair(0xcca8, 16384);
        let (mut server_reader, mut server_writer) = server.into_split();
        let (mut client_reader, mut client_writer) = client.into_split();
        let upstream = std::thread::spawn(move || {
            (0..10)
                .map(|i| {
                    let wire = client_writer.encrypt(format!("up {}", i).as_bytes()).unwrap();
                    server_reader.decrypt(&wire).unwrap()
                })
                .collect::<Vec<_>>()
        });
        let downstream = std::thread::spawn(move || {
            (0..10)
                .map(|i| {
                    let wire = server_writer.encrypt(format!("down {}", i).as_bytes()).unwrap();
                    client_reader.decrypt(&wire).unwrap()
                })
                .collect::<Vec<_>>()
        });
        let upstream = upstream.join().unwrap();
        let downstream = downstream.join().unwrap();
        for i in 0..10 {
            assert_eq!(upstream[i], format!("up {}", i).into_bytes());
            assert_eq!(downstream[i], format!("down {}", i).into_bytes());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_fragmented_round_trip(
            suite in prop::sample::select(SUITES),
            max_fragment_len in 1_usize..64,
            messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..5),
        ) {
            let (mut server, mut client) = pair(suite, max_fragment_len);
            for message in messages.iter() {
                let wire = server.encrypt(message).unwrap();
                prop_assert_eq!(&client.decrypt(&wire).unwrap(), message);
                prop_assert_eq!(server.write_sequence(), client.read_sequence());
            }
        }
    }
}
